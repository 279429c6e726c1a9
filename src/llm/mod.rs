//! Language model providers used for answer synthesis.

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::{AnthropicProvider, ANTHROPIC_BASE_URL};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

pub(crate) const SYSTEM_PROMPT: &str =
    "You answer questions strictly from the context supplied in the user message.";

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Runs one completion. Transport and API failures come back as `Err`.
    fn generate(&self, request: &ProviderRequest<'_>) -> Result<ProviderResponse>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for Box<P> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn generate(&self, request: &ProviderRequest<'_>) -> Result<ProviderResponse> {
        (**self).generate(request)
    }
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Fully rendered prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}

/// Structured provider reply; `answer` is `None` when the model produced no text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated answer text.
    pub answer: Option<String>,
}

impl ProviderResponse {
    /// Wraps collected text segments, treating an empty join as no answer.
    pub(crate) fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let joined = segments.into_iter().collect::<Vec<_>>().join("\n");
        Self {
            answer: (!joined.trim().is_empty()).then_some(joined),
        }
    }
}

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini `generateContent`.
    Gemini,
    /// OpenAI-compatible chat completions.
    #[value(name = "openai")]
    OpenAi,
    /// Anthropic messages API (answers only).
    Anthropic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_segments_mean_no_answer() {
        assert_eq!(ProviderResponse::from_segments(vec![]).answer, None);
        assert_eq!(
            ProviderResponse::from_segments(vec!["  ".to_string()]).answer,
            None
        );
        assert_eq!(
            ProviderResponse::from_segments(vec!["a".to_string(), "b".to_string()]).answer,
            Some("a\nb".to_string())
        );
    }
}
