//! Gemini `generateContent` answer provider.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LlmProvider, ProviderRequest, ProviderResponse};
use crate::embedder::gemini::qualified_model;

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    model: String,
    endpoint: String,
    client: Client,
}

impl GeminiProvider {
    /// Builds a provider for `POST {base_url}/models/{model}:generateContent`.
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Google API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing Gemini model name");
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
            endpoint: format!("{}/{}:generateContent", base_url.trim_end_matches('/'), model),
            model,
            client,
        })
    }
}

impl LlmProvider for GeminiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &ProviderRequest<'_>) -> Result<ProviderResponse> {
        let body = GenerateRequest::new(request);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .context("failed to call Gemini generateContent")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("Gemini returned {}: {}", status, text);
        }
        let parsed: GenerateResponse = resp.json().context("failed to parse Gemini response")?;
        if let Some(reason) = parsed.block_reason() {
            debug!(reason, "Gemini blocked the prompt");
        }
        Ok(parsed.into_response())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn new(request: &ProviderRequest<'a>) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
    }

    fn into_response(self) -> ProviderResponse {
        let parts = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();
        ProviderResponse::from_segments(parts.into_iter().filter_map(|part| part.text))
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_carries_generation_config() {
        let request = ProviderRequest {
            prompt: "Question?",
            temperature: 0.3,
            max_tokens: 256,
        };
        let json = serde_json::to_value(GenerateRequest::new(&request)).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Question?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn first_candidate_text_is_answer() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Paris"}],"role":"model"}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_response().answer.as_deref(), Some("Paris"));
    }

    #[test]
    fn blocked_prompt_has_no_answer() {
        let raw = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.block_reason(), Some("SAFETY"));
        assert_eq!(parsed.into_response().answer, None);
    }
}
