//! Embedding service clients.
//!
//! Every client implements [`Embedder`]; the indexer and the retriever must be
//! handed the same implementation (same model identifier) so index and query
//! vectors live in one space.

use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use reqwest::StatusCode;
use serde::Serialize;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiEmbedder;
pub use openai::OpenAiEmbedder;

/// Blocking text-to-vector service.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside persisted indexes.
    fn model(&self) -> &str;

    /// Maximum number of inputs accepted by one [`Embedder::embed_batch`] call.
    fn batch_size(&self) -> usize;

    /// Embeds each input, returning vectors in input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single input.
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input])?
            .pop()
            .ok_or_else(|| anyhow!("{} returned no embedding", self.model()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(inputs)
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        (**self).embed(input)
    }
}

/// Embedding service backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Google Gemini `batchEmbedContents`.
    Gemini,
    /// OpenAI-compatible `/embeddings`.
    #[value(name = "openai")]
    OpenAi,
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(5), Duration::from_millis(16_000));
        assert_eq!(retry_backoff(50), retry_backoff(5));
    }

    #[test]
    fn retries_rate_limits_and_server_errors_only() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
