#![warn(missing_docs)]
//! Core library entry points for the docrag document question-answering
//! pipeline.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod extract;
pub mod index;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod retriever;
pub mod session;
pub mod store;
pub mod synthesizer;

#[cfg(test)]
mod test_support;

pub use chunker::{Chunk, ChunkError, Chunker, ChunkerConfig};
pub use config::{build_pipeline, PipelineArgs, ProviderArgs};
pub use embedder::{Embedder, EmbedderKind};
pub use extract::{extract_corpus, Corpus, Document, DocumentKind, ExtractionReport, PageText};
pub use index::{IndexEntry, IndexError, IndexReport, Indexer, ScoredChunk, VectorIndex};
pub use llm::{LlmProvider, ProviderKind, ProviderRequest, ProviderResponse};
pub use pipeline::{AskOutcome, IngestFailure, Pipeline, PipelineError, PipelineSettings, Stage};
pub use retriever::{RetrieveError, Retriever};
pub use session::{ConversationTurn, Session, END_SESSION_MESSAGE};
pub use store::{IndexStore, StoreError};
pub use synthesizer::{Answer, Synthesizer, NOT_IN_CONTEXT, NO_VALID_ANSWER};
