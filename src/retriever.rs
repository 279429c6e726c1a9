//! Top-k similarity lookup against the persisted index.

use thiserror::Error;
use tracing::debug;

use crate::embedder::Embedder;
use crate::index::{ScoredChunk, VectorIndex};
use crate::store::{IndexStore, StoreError};

/// Number of passages handed to the synthesizer by default.
pub const DEFAULT_TOP_K: usize = 4;

/// Retrieval failures.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Nothing has been indexed under the key yet.
    #[error("No vector store found. Please upload and process a PDF file first.")]
    NotReady,
    /// The query was blank.
    #[error("question must not be empty")]
    EmptyQuery,
    /// The embedding service failed on the query.
    #[error("failed to embed query: {0}")]
    Embedding(String),
    /// The index was built by a different embedding model.
    #[error("index was built with model {index:?} but queries use {query:?}")]
    ModelMismatch {
        /// Model recorded in the index.
        index: String,
        /// Model of the query embedder.
        query: String,
    },
    /// The query vector does not match the index dimensionality.
    #[error("query vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch {
        /// Index dimensionality.
        expected: usize,
        /// Query dimensionality.
        actual: usize,
    },
    /// Reading the index failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-only view over the index stored under one key.
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    store: &'a IndexStore,
    key: &'a str,
}

impl<'a> Retriever<'a> {
    /// `embedder` must be the one the index was built with.
    pub fn new(embedder: &'a dyn Embedder, store: &'a IndexStore, key: &'a str) -> Self {
        Self {
            embedder,
            store,
            key,
        }
    }

    /// Loads the index and returns the `k` most similar chunks for `query`,
    /// best first.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, RetrieveError> {
        if query.trim().is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        let index = self.store.load(self.key)?.ok_or(RetrieveError::NotReady)?;
        self.search(&index, query, k)
    }

    /// Same as [`Retriever::retrieve`] against an index already in memory.
    pub fn search(
        &self,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrieveError> {
        if query.trim().is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        if index.model() != self.embedder.model() {
            return Err(RetrieveError::ModelMismatch {
                index: index.model().to_string(),
                query: self.embedder.model().to_string(),
            });
        }
        let vector = self
            .embedder
            .embed(query)
            .map_err(|err| RetrieveError::Embedding(format!("{err:#}")))?;
        if !index.is_empty() && vector.len() != index.dimensions() {
            return Err(RetrieveError::DimensionMismatch {
                expected: index.dimensions(),
                actual: vector.len(),
            });
        }
        let hits = index.search(&vector, k);
        debug!(
            key = self.key,
            candidates = index.len(),
            returned = hits.len(),
            best = hits.first().map(|hit| hit.score),
            "retrieved passages"
        );
        Ok(hits)
    }
}
