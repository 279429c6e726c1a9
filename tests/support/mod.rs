//! Deterministic stand-ins for the embedding and language model services.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use docrag::{Embedder, LlmProvider, ProviderRequest, ProviderResponse, NOT_IN_CONTEXT};

const DIMENSIONS: usize = 64;
const STOPWORDS: &[&str] = &[
    "the", "is", "of", "a", "an", "in", "what", "which", "who", "does", "and", "to",
];

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
}

/// Bag-of-keywords embedder; counts calls through a shared handle.
pub struct KeywordEmbedder {
    calls: Arc<AtomicUsize>,
}

impl KeywordEmbedder {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Embedder for KeywordEmbedder {
    fn model(&self) -> &str {
        "keyword-embedder"
    }

    fn batch_size(&self) -> usize {
        8
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMENSIONS];
                for token in tokens(text) {
                    vector[crc32fast::hash(token.as_bytes()) as usize % DIMENSIONS] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Answers with the first context sentence sharing two keywords with the
/// question, or the not-in-context phrase.
pub struct ExtractiveModel;

impl ExtractiveModel {
    fn section<'p>(prompt: &'p str, start: &str, end: &str) -> &'p str {
        prompt
            .split_once(start)
            .and_then(|(_, rest)| rest.split_once(end))
            .map(|(section, _)| section)
            .unwrap_or_default()
    }
}

impl LlmProvider for ExtractiveModel {
    fn model(&self) -> &str {
        "extractive"
    }

    fn generate(&self, request: &ProviderRequest<'_>) -> Result<ProviderResponse> {
        let context = Self::section(request.prompt, "Context:\n", "\n\nQuestion:\n");
        let question = Self::section(request.prompt, "Question:\n", "\n\nAnswer:");
        let keywords: Vec<String> = tokens(question).filter(|t| t.len() >= 4).collect();
        let answer = context
            .split_inclusive('.')
            .map(str::trim)
            .find(|sentence| {
                let words: Vec<String> = tokens(sentence).collect();
                keywords.iter().filter(|k| words.contains(k)).count() >= 2
            })
            .unwrap_or(NOT_IN_CONTEXT);
        Ok(ProviderResponse {
            answer: Some(answer.to_string()),
        })
    }
}
