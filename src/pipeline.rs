//! One question submission, end to end.
//!
//! [`Pipeline::ask`] walks a submission through
//! `Idle → Extracting → Chunking → Indexing → Retrieving → Synthesizing →
//! Recorded`. Any failure short-circuits to [`Stage::Failed`] with a
//! user-facing message and leaves the [`Session`] untouched.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::{
    ChunkError, Chunker, ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
use crate::embedder::Embedder;
use crate::extract::{extract_corpus, Document, ExtractionReport};
use crate::index::{IndexError, IndexReport, Indexer, ScoredChunk};
use crate::llm::LlmProvider;
use crate::retriever::{RetrieveError, Retriever, DEFAULT_TOP_K};
use crate::session::Session;
use crate::store::{IndexStore, DEFAULT_INDEX_DIR, DEFAULT_INDEX_KEY};
use crate::synthesizer::{Answer, Synthesizer, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE};

/// Tunables for a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSettings {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Minimum characters shared by consecutive chunks.
    pub overlap: usize,
    /// Passages handed to the model.
    pub top_k: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_output_tokens: usize,
    /// Directory holding persisted indexes.
    pub index_dir: PathBuf,
    /// Slot the active document set is indexed under.
    pub index_key: String,
    /// Skip re-embedding when the stored index already matches the chunks.
    pub reuse_index: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            index_key: DEFAULT_INDEX_KEY.to_string(),
            reuse_index: false,
        }
    }
}

/// Submission lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for a submission.
    Idle,
    /// Pulling text out of the documents.
    Extracting,
    /// Splitting the corpus.
    Chunking,
    /// Embedding and persisting chunks.
    Indexing,
    /// Looking up passages for the question.
    Retrieving,
    /// Asking the language model.
    Synthesizing,
    /// The answer was added to the session.
    Recorded,
    /// The submission stopped early.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting",
            Stage::Chunking => "chunking",
            Stage::Indexing => "indexing",
            Stage::Retrieving => "retrieving",
            Stage::Synthesizing => "synthesizing",
            Stage::Recorded => "recorded",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reasons a submission stops before producing an answer. The display text is
/// what the user sees in place of the answer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No documents were supplied.
    #[error("Please upload at least one PDF file.")]
    NoDocuments,
    /// The question was blank.
    #[error("Please enter a question.")]
    EmptyQuestion,
    /// No index has been built yet.
    #[error("No vector store found. Please upload and process a PDF file first.")]
    NotReady,
    /// Indexing failed.
    #[error("An error occurred: {0}")]
    Index(#[from] IndexError),
    /// Retrieval failed for a reason other than a missing index.
    #[error("An error occurred: {0}")]
    Retrieve(RetrieveError),
}

impl From<RetrieveError> for PipelineError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::NotReady => PipelineError::NotReady,
            RetrieveError::EmptyQuery => PipelineError::EmptyQuestion,
            other => PipelineError::Retrieve(other),
        }
    }
}

/// Summary of the ingestion half of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Extraction counters.
    pub extraction: ExtractionReport,
    /// Chunks produced from the corpus.
    pub chunks: usize,
    /// Index build result.
    pub index: IndexReport,
}

impl IngestReport {
    /// Degradations worth surfacing to the user.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = extraction_warnings(&self.extraction);
        warnings.extend(self.index.failures.iter().map(|failure| {
            format!("chunk {} was not indexed: {}", failure.chunk_id, failure.reason)
        }));
        warnings
    }
}

/// Ingestion stopped early. `extraction` holds whatever counters were
/// gathered before the failure.
#[derive(Debug)]
pub struct IngestFailure {
    /// Stage that failed.
    pub stage: Stage,
    /// Cause.
    pub error: PipelineError,
    /// Extraction counters, when extraction ran.
    pub extraction: Option<ExtractionReport>,
}

impl IngestFailure {
    /// Degradations seen before the failure.
    pub fn warnings(&self) -> Vec<String> {
        self.extraction
            .as_ref()
            .map(extraction_warnings)
            .unwrap_or_default()
    }
}

fn extraction_warnings(report: &ExtractionReport) -> Vec<String> {
    let mut warnings = Vec::new();
    if report.unreadable_documents > 0 {
        warnings.push(format!(
            "{} document(s) could not be read",
            report.unreadable_documents
        ));
    }
    if report.empty_pages > 0 {
        warnings.push(format!(
            "{} page(s) contained no extractable text",
            report.empty_pages
        ));
    }
    warnings
}

/// Result of one submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskOutcome {
    /// Text shown in place of the answer.
    pub message: String,
    /// Classified answer, when synthesis ran.
    pub answer: Option<Answer>,
    /// Stage that failed, if any.
    pub failed_at: Option<Stage>,
    /// Whether the session gained or updated a turn.
    pub recorded: bool,
    /// Non-fatal degradations.
    pub warnings: Vec<String>,
}

impl AskOutcome {
    fn failed(stage: Stage, err: PipelineError, warnings: Vec<String>) -> Self {
        warn!(%stage, error = %err, "submission failed");
        debug!(from = %Stage::Failed, to = %Stage::Idle, "stage");
        Self {
            message: err.to_string(),
            answer: None,
            failed_at: Some(stage),
            recorded: false,
            warnings,
        }
    }
}

/// Extraction, chunking, indexing, retrieval and synthesis wired to concrete
/// services.
pub struct Pipeline {
    settings: PipelineSettings,
    chunker: Chunker,
    embedder: Box<dyn Embedder>,
    provider: Box<dyn LlmProvider>,
    store: IndexStore,
}

impl Pipeline {
    /// Validates the chunking settings and wires the services together.
    pub fn new(
        settings: PipelineSettings,
        embedder: Box<dyn Embedder>,
        provider: Box<dyn LlmProvider>,
    ) -> Result<Self, ChunkError> {
        let chunker = Chunker::new(ChunkerConfig::new(settings.chunk_size, settings.overlap)?);
        let store = IndexStore::new(settings.index_dir.clone());
        Ok(Self {
            settings,
            chunker,
            embedder,
            provider,
            store,
        })
    }

    /// Active settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Index storage.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Re-indexes `documents` and answers `question` from them, recording the
    /// turn in `session` when the answer is grounded or explicitly absent.
    pub fn ask(&self, session: &mut Session, documents: &[Document], question: &str) -> AskOutcome {
        if documents.is_empty() {
            return AskOutcome::failed(Stage::Idle, PipelineError::NoDocuments, Vec::new());
        }
        if question.trim().is_empty() {
            return AskOutcome::failed(Stage::Idle, PipelineError::EmptyQuestion, Vec::new());
        }
        let report = match self.ingest(documents) {
            Ok(report) => report,
            Err(failure) => {
                let warnings = failure.warnings();
                return AskOutcome::failed(failure.stage, failure.error, warnings);
            }
        };
        self.respond(Stage::Indexing, session, question, report.warnings())
    }

    /// Answers `question` from whatever index is already stored.
    pub fn ask_indexed(&self, session: &mut Session, question: &str) -> AskOutcome {
        if question.trim().is_empty() {
            return AskOutcome::failed(Stage::Idle, PipelineError::EmptyQuestion, Vec::new());
        }
        self.respond(Stage::Idle, session, question, Vec::new())
    }

    /// Extracts, chunks and indexes `documents`, replacing the stored index.
    pub fn ingest(&self, documents: &[Document]) -> Result<IngestReport, IngestFailure> {
        if documents.is_empty() {
            return Err(IngestFailure {
                stage: Stage::Idle,
                error: PipelineError::NoDocuments,
                extraction: None,
            });
        }
        transition(Stage::Idle, Stage::Extracting);
        let corpus = extract_corpus(documents);
        info!(
            documents = corpus.report.documents,
            pages = corpus.report.pages,
            empty_pages = corpus.report.empty_pages,
            chars = corpus.text.chars().count(),
            "extracted corpus"
        );

        transition(Stage::Extracting, Stage::Chunking);
        let chunks = self.chunker.split_text(&corpus.text);
        info!(chunks = chunks.len(), "chunked corpus");

        transition(Stage::Chunking, Stage::Indexing);
        let indexed = Indexer::new(self.embedder.as_ref(), &self.store, &self.settings.index_key)
            .reuse_matching(self.settings.reuse_index)
            .index(&chunks);
        let index = match indexed {
            Ok(index) => index,
            Err(err) => {
                return Err(IngestFailure {
                    stage: Stage::Indexing,
                    error: err.into(),
                    extraction: Some(corpus.report),
                })
            }
        };

        Ok(IngestReport {
            extraction: corpus.report,
            chunks: chunks.len(),
            index,
        })
    }

    /// Top-k passages for `query` from the stored index.
    pub fn query(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, RetrieveError> {
        self.retriever().retrieve(query, k)
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever::new(self.embedder.as_ref(), &self.store, &self.settings.index_key)
    }

    fn respond(
        &self,
        from: Stage,
        session: &mut Session,
        question: &str,
        warnings: Vec<String>,
    ) -> AskOutcome {
        transition(from, Stage::Retrieving);
        let passages = match self.query(question, self.settings.top_k) {
            Ok(passages) => passages,
            Err(err) => return AskOutcome::failed(Stage::Retrieving, err.into(), warnings),
        };

        transition(Stage::Retrieving, Stage::Synthesizing);
        let context: Vec<&str> = passages.iter().map(|hit| hit.text.as_str()).collect();
        let answer = Synthesizer::new(self.provider.as_ref())
            .temperature(self.settings.temperature)
            .max_tokens(self.settings.max_output_tokens)
            .synthesize(&context, question);
        let message = answer.text();

        let recorded = answer.is_recordable();
        if recorded {
            session.record(question, message.clone());
            transition(Stage::Synthesizing, Stage::Recorded);
            transition(Stage::Recorded, Stage::Idle);
        } else {
            transition(Stage::Synthesizing, Stage::Idle);
        }
        info!(
            passages = passages.len(),
            recorded,
            history = session.len(),
            "answered question"
        );
        AskOutcome {
            message,
            answer: Some(answer),
            failed_at: None,
            recorded,
            warnings,
        }
    }
}

fn transition(from: Stage, to: Stage) {
    debug!(%from, %to, "stage");
}
