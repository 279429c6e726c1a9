//! Vector index construction and exact cosine search.

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedder::Embedder;
use crate::store::{IndexStore, StoreError};

/// Errors that abort an index build.
#[derive(Debug, Error)]
pub enum IndexError {
    /// There were no chunks to index.
    #[error("no content to index: the uploaded documents contain no extractable text")]
    NoContent,
    /// Every chunk failed to embed.
    #[error("failed to embed any of {attempted} chunks: {first_error}")]
    NothingEmbedded {
        /// Number of chunks submitted.
        attempted: usize,
        /// Reason reported for the first failure.
        first_error: String,
    },
    /// Entries disagree on vector length.
    #[error("entry {id} has {actual} dimensions, expected {expected}")]
    InconsistentDimensions {
        /// Offending entry.
        id: usize,
        /// Dimensionality of the first entry.
        expected: usize,
        /// Dimensionality of the offending entry.
        actual: usize,
    },
    /// Persisting the index failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One embedded chunk. Ids are insertion ordinals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Insertion ordinal (the chunk's position in the chunk sequence).
    pub id: usize,
    /// Chunk text.
    pub text: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// Search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Entry id.
    pub id: usize,
    /// Chunk text.
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// A chunk dropped from the index because it could not be embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFailure {
    /// Position of the chunk in the submitted sequence.
    pub chunk_id: usize,
    /// Why the chunk was dropped.
    pub reason: String,
}

/// Immutable set of embedded chunks tagged with the model that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    model: String,
    dimensions: usize,
    content_hash: u32,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Assembles an index from already-embedded entries.
    pub fn from_entries(
        model: impl Into<String>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, IndexError> {
        let dimensions = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
            return Err(IndexError::InconsistentDimensions {
                id: bad.id,
                expected: dimensions,
                actual: bad.embedding.len(),
            });
        }
        let model = model.into();
        let content_hash = content_hash(&model, entries.iter().map(|e| e.text.as_str()));
        Ok(Self {
            model,
            dimensions,
            content_hash,
            entries,
        })
    }

    /// Embeds `chunks` and builds an index from every chunk that succeeded.
    ///
    /// Chunks are sent in batches of [`Embedder::batch_size`]; a failed batch
    /// is retried one chunk at a time so one bad chunk only drops itself.
    pub fn build(
        embedder: &dyn Embedder,
        chunks: &[String],
    ) -> Result<(Self, Vec<EmbedFailure>), IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::NoContent);
        }
        let batch_size = embedder.batch_size().max(1);
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(chunks.len());
        let mut failures = Vec::new();
        let mut dimensions: Option<usize> = None;

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let vectors: Vec<Result<Vec<f32>, String>> = match embedder.embed_batch(&refs) {
                Ok(vectors) if vectors.len() == refs.len() => vectors.into_iter().map(Ok).collect(),
                Ok(vectors) => {
                    warn!(expected = refs.len(), got = vectors.len(), "embedding batch size mismatch; retrying per chunk");
                    embed_each(embedder, &refs)
                }
                Err(err) => {
                    warn!(error = %err, batch = batch_no, "embedding batch failed; retrying per chunk");
                    embed_each(embedder, &refs)
                }
            };

            for (pos, (text, vector)) in batch.iter().zip(vectors).enumerate() {
                let chunk_id = offset + pos;
                let accepted = vector.and_then(|vector| {
                    if vector.is_empty() {
                        return Err("embedding service returned an empty vector".to_string());
                    }
                    match dimensions {
                        Some(expected) if expected != vector.len() => Err(format!(
                            "embedding has {} dimensions, expected {}",
                            vector.len(),
                            expected
                        )),
                        _ => Ok(vector),
                    }
                });
                match accepted {
                    Ok(embedding) => {
                        dimensions.get_or_insert(embedding.len());
                        entries.push(IndexEntry {
                            id: chunk_id,
                            text: text.clone(),
                            embedding,
                        });
                    }
                    Err(reason) => {
                        warn!(chunk_id, %reason, "dropping chunk from index");
                        failures.push(EmbedFailure { chunk_id, reason });
                    }
                }
            }
        }

        if entries.is_empty() {
            let first_error = failures
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_else(|| "no embeddings returned".to_string());
            return Err(IndexError::NothingEmbedded {
                attempted: chunks.len(),
                first_error,
            });
        }
        let index = Self::from_entries(embedder.model(), entries)?;
        debug!(
            entries = index.len(),
            dropped = failures.len(),
            dimensions = index.dimensions,
            "built vector index"
        );
        Ok((index, failures))
    }

    /// Embedding model that produced the vectors.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Vector dimensionality (0 for an empty index).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// CRC32 over the model name and chunk texts.
    pub fn content_hash(&self) -> u32 {
        self.content_hash
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the `k` entries most similar to `query`, best first. Equal
    /// scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                id: entry.id,
                text: entry.text.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();
        // stable sort: ties stay in insertion order
        scored.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
        scored.truncate(k);
        scored
    }
}

/// Result of [`Indexer::index`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    /// Entries in the persisted index.
    pub entries: usize,
    /// Chunks that were dropped.
    pub failures: Vec<EmbedFailure>,
    /// True when a stored index with identical content was reused.
    pub reused: bool,
}

/// Builds an index for a chunk sequence and persists it under one key.
pub struct Indexer<'a> {
    embedder: &'a dyn Embedder,
    store: &'a IndexStore,
    key: &'a str,
    reuse: bool,
}

impl<'a> Indexer<'a> {
    /// Indexer that always rebuilds.
    pub fn new(embedder: &'a dyn Embedder, store: &'a IndexStore, key: &'a str) -> Self {
        Self {
            embedder,
            store,
            key,
            reuse: false,
        }
    }

    /// Skips embedding when the stored index already covers identical chunks
    /// produced by the same model.
    pub fn reuse_matching(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    /// Rebuilds (or reuses) the index for `chunks` and writes it to the store,
    /// replacing the previous index for the key.
    pub fn index(&self, chunks: &[String]) -> Result<IndexReport, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::NoContent);
        }
        if self.reuse {
            if let Some(existing) = self.reusable(chunks)? {
                info!(key = self.key, entries = existing.len(), "reusing stored vector index");
                return Ok(IndexReport {
                    entries: existing.len(),
                    failures: Vec::new(),
                    reused: true,
                });
            }
        }
        let (index, failures) = VectorIndex::build(self.embedder, chunks)?;
        self.store.save(&index, self.key)?;
        info!(
            key = self.key,
            entries = index.len(),
            dropped = failures.len(),
            "persisted vector index"
        );
        Ok(IndexReport {
            entries: index.len(),
            failures,
            reused: false,
        })
    }

    fn reusable(&self, chunks: &[String]) -> Result<Option<VectorIndex>, IndexError> {
        let Some(existing) = self.store.load(self.key)? else {
            return Ok(None);
        };
        let wanted = content_hash(self.embedder.model(), chunks.iter().map(String::as_str));
        let complete = existing.len() == chunks.len();
        if complete && existing.model() == self.embedder.model() && existing.content_hash() == wanted {
            Ok(Some(existing))
        } else {
            Ok(None)
        }
    }
}

fn embed_each(embedder: &dyn Embedder, inputs: &[&str]) -> Vec<Result<Vec<f32>, String>> {
    inputs
        .iter()
        .map(|input| embedder.embed(input).map_err(|err| format!("{err:#}")))
        .collect()
}

/// CRC32 over the model name followed by each text, length-prefixed.
pub fn content_hash<'t>(model: &str, texts: impl IntoIterator<Item = &'t str>) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(model.as_bytes());
    for text in texts {
        hasher.update(&(text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.finalize()
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyEmbedder, HashEmbedder};
    use pretty_assertions::assert_eq;

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn entry(id: usize, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id,
            text: format!("chunk {id}"),
            embedding,
        }
    }

    #[test]
    fn empty_chunk_list_reports_no_content() {
        let err = VectorIndex::build(&HashEmbedder::default(), &[]).unwrap_err();
        assert!(matches!(err, IndexError::NoContent));
    }

    #[test]
    fn builds_entries_in_insertion_order() {
        let embedder = HashEmbedder::with_batch_size(2);
        let (index, failures) =
            VectorIndex::build(&embedder, &chunks(&["red apples", "green pears", "blue sky"]))
                .unwrap();
        assert!(failures.is_empty());
        assert_eq!(index.len(), 3);
        assert_eq!(index.model(), embedder.model());
        let ids: Vec<usize> = index.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(index.dimensions(), embedder.dimensions());
    }

    #[test]
    fn failed_chunks_are_dropped_with_warnings() {
        let embedder = FlakyEmbedder::failing_on(&["poison"]);
        let (index, failures) =
            VectorIndex::build(&embedder, &chunks(&["good one", "poison pill", "good two"]))
                .unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].chunk_id, 1);
        let texts: Vec<&str> = index.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["good one", "good two"]);
    }

    #[test]
    fn all_failures_abort_the_build() {
        let embedder = FlakyEmbedder::failing_on(&["poison"]);
        let err = VectorIndex::build(&embedder, &chunks(&["poison a", "poison b"])).unwrap_err();
        match err {
            IndexError::NothingEmbedded { attempted, .. } => assert_eq!(attempted, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = VectorIndex::from_entries(
            "m",
            vec![
                entry(0, vec![0.0, 1.0]),
                entry(1, vec![1.0, 0.0]),
                entry(2, vec![2.0, 0.0]),
                entry(3, vec![0.5, 0.0]),
            ],
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 3);
        let ids: Vec<usize> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn search_is_deterministic_and_bounded() {
        let embedder = HashEmbedder::default();
        let texts = chunks(&["cats purr", "dogs bark", "cats and dogs", "fish swim"]);
        let (index, _) = VectorIndex::build(&embedder, &texts).unwrap();
        let query = embedder.embed("cats").unwrap();
        let first = index.search(&query, 2);
        assert_eq!(first.len(), 2);
        assert_eq!(first, index.search(&query, 2));
        assert_eq!(index.search(&query, 10).len(), 4);
    }

    #[test]
    fn inconsistent_dimensions_are_rejected() {
        let err = VectorIndex::from_entries("m", vec![entry(0, vec![1.0]), entry(1, vec![1.0, 2.0])])
            .unwrap_err();
        assert!(matches!(err, IndexError::InconsistentDimensions { id: 1, .. }));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn indexer_overwrites_and_optionally_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        let embedder = HashEmbedder::default();
        let first = chunks(&["alpha", "beta"]);

        let report = Indexer::new(&embedder, &store, "docs").index(&first).unwrap();
        assert_eq!(report.entries, 2);
        assert!(!report.reused);

        let reused = Indexer::new(&embedder, &store, "docs")
            .reuse_matching(true)
            .index(&first)
            .unwrap();
        assert!(reused.reused);
        let calls_before = embedder.calls();

        let rebuilt = Indexer::new(&embedder, &store, "docs")
            .index(&chunks(&["gamma"]))
            .unwrap();
        assert!(!rebuilt.reused);
        assert!(embedder.calls() > calls_before);
        let stored = store.load("docs").unwrap().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.entries()[0].text, "gamma");
    }
}
