//! Google Generative Language embeddings client (`models/embedding-001`).

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{is_retryable_error, retry_backoff, should_retry, Embedder};

/// Default public endpoint of the Generative Language API.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini caps `batchEmbedContents` at 100 requests.
const MAX_BATCH: usize = 100;

/// Blocking client for `POST {base}/{model}:batchEmbedContents`.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
    batch_size: usize,
}

impl GeminiEmbedder {
    /// Builds a new Gemini embeddings client. `model` may be given with or
    /// without the `models/` prefix.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Google API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing Gemini embedding model name");
        let model = qualified_model(model);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key.trim()).context("invalid Google API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}:batchEmbedContents",
                base_url.trim_end_matches('/'),
                model
            ),
            model,
            max_retries: max_retries.max(1),
            batch_size: batch_size.clamp(1, MAX_BATCH),
        })
    }
}

pub(crate) fn qualified_model(model: &str) -> String {
    let model = model.trim();
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

impl Embedder for GeminiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        anyhow::ensure!(
            inputs.len() <= self.batch_size,
            "batch of {} exceeds configured max {}",
            inputs.len(),
            self.batch_size
        );
        let request = BatchEmbedRequest::new(&self.model, inputs);

        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload: BatchEmbedResponse = resp
                            .json()
                            .context("failed to parse Gemini embedding response")?;
                        return payload.into_vectors(inputs.len());
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "retrying Gemini embeddings request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("Gemini embeddings request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying Gemini embeddings request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).context("failed to call Gemini embeddings");
                }
            }
        }
    }
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

impl<'a> BatchEmbedRequest<'a> {
    fn new(model: &'a str, inputs: &[&'a str]) -> Self {
        Self {
            requests: inputs
                .iter()
                .map(|&text| EmbedContentRequest {
                    model,
                    content: Content {
                        parts: vec![Part { text }],
                    },
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

impl BatchEmbedResponse {
    fn into_vectors(self, expected: usize) -> Result<Vec<Vec<f32>>> {
        if self.embeddings.is_empty() {
            return Err(anyhow!("Gemini response missing embedding payloads"));
        }
        anyhow::ensure!(
            self.embeddings.len() == expected,
            "Gemini returned {} embeddings for {} inputs",
            self.embeddings.len(),
            expected
        );
        Ok(self.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}
