//! Grounded answer synthesis.
//!
//! The synthesizer renders retrieved chunks and the user question into a single
//! prompt, asks the configured [`LlmProvider`] for a low-temperature completion
//! and classifies the reply. Provider failures are folded into
//! [`Answer::ServiceError`] so callers always get something printable back.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::{LlmProvider, ProviderRequest};

/// Phrase the model is told to reply with when the context lacks the answer.
pub const NOT_IN_CONTEXT: &str = "answer is not available in the context";
/// Rendered when the model returns no answer text at all.
pub const NO_VALID_ANSWER: &str = "Sorry, no valid answer found in the context.";
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
/// Default completion token cap.
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 1024;

/// Outcome of one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Answer {
    /// The model answered from the context.
    Grounded(String),
    /// The model replied with [`NOT_IN_CONTEXT`].
    NotInContext,
    /// The model returned no answer text.
    NoValidAnswer,
    /// The language model call failed.
    ServiceError(String),
}

impl Answer {
    /// User-facing rendering.
    pub fn text(&self) -> String {
        match self {
            Answer::Grounded(text) => text.clone(),
            Answer::NotInContext => NOT_IN_CONTEXT.to_string(),
            Answer::NoValidAnswer => NO_VALID_ANSWER.to_string(),
            Answer::ServiceError(message) => format!("An error occurred: {message}"),
        }
    }

    /// Whether the answer belongs in the conversation history.
    pub fn is_recordable(&self) -> bool {
        matches!(self, Answer::Grounded(_) | Answer::NotInContext)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Renders the grounding prompt. Context passages are separated by blank lines.
pub fn build_prompt<S: AsRef<str>>(context: &[S], question: &str) -> String {
    let context = context
        .iter()
        .map(|chunk| chunk.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Answer the question as detailed as possible from the provided context, \
make sure to provide all the details. If the answer is not in the provided context \
just say, \"{NOT_IN_CONTEXT}\", don't provide the wrong answer.\n\n\
Context:\n{context}\n\n\
Question:\n{question}\n\n\
Answer:\n"
    )
}

/// Prompt-and-classify wrapper around a language model.
pub struct Synthesizer<'a> {
    provider: &'a dyn LlmProvider,
    temperature: f32,
    max_tokens: usize,
}

impl<'a> Synthesizer<'a> {
    /// Uses `provider` with the default temperature and token cap.
    pub fn new(provider: &'a dyn LlmProvider) -> Self {
        Self {
            provider,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    /// Overrides the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Overrides the completion token cap.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Asks the model to answer `question` from `context`.
    pub fn synthesize<S: AsRef<str>>(&self, context: &[S], question: &str) -> Answer {
        let prompt = build_prompt(context, question);
        let request = ProviderRequest {
            prompt: &prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(
            model = self.provider.model(),
            passages = context.len(),
            prompt_chars = prompt.chars().count(),
            "requesting answer"
        );
        match self.provider.generate(&request) {
            Ok(response) => match response.answer {
                Some(text) if is_not_in_context(&text) => Answer::NotInContext,
                Some(text) if !text.trim().is_empty() => Answer::Grounded(text.trim().to_string()),
                _ => Answer::NoValidAnswer,
            },
            Err(err) => {
                warn!(model = self.provider.model(), error = %err, "language model call failed");
                Answer::ServiceError(format!("{err:#}"))
            }
        }
    }
}

fn is_not_in_context(reply: &str) -> bool {
    let normalized = reply
        .trim()
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '\u{201c}' | '\u{201d}' | '`'))
        .trim_end_matches('.')
        .trim();
    normalized.eq_ignore_ascii_case(NOT_IN_CONTEXT)
}
