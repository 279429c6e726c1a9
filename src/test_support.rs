//! Deterministic service doubles shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::embedder::Embedder;
use crate::llm::{LlmProvider, ProviderRequest, ProviderResponse};

const DIMENSIONS: usize = 32;

/// Bag-of-words embedder hashing lowercase tokens into a fixed vector.
pub struct HashEmbedder {
    batch_size: usize,
    calls: AtomicUsize,
    model: String,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::with_batch_size(16)
    }
}

impl HashEmbedder {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            calls: AtomicUsize::new(0),
            model: "hash-embedder".to_string(),
        }
    }

    pub fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::default()
        }
    }

    pub fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSIONS];
    for token in text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
    {
        let bucket = crc32fast::hash(token.to_lowercase().as_bytes()) as usize % DIMENSIONS;
        vector[bucket] += 1.0;
    }
    vector
}

impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| hash_vector(text)).collect())
    }
}

/// Embedder that fails every batch containing one of the poison markers.
pub struct FlakyEmbedder {
    poison: Vec<String>,
}

impl FlakyEmbedder {
    pub fn failing_on(markers: &[&str]) -> Self {
        Self {
            poison: markers.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn model(&self) -> &str {
        "hash-embedder"
    }

    fn batch_size(&self) -> usize {
        8
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if let Some(bad) = inputs
            .iter()
            .find(|input| self.poison.iter().any(|p| input.contains(p.as_str())))
        {
            bail!("embedding service rejected {bad:?}");
        }
        Ok(inputs.iter().map(|text| hash_vector(text)).collect())
    }
}

/// Language model returning canned replies and recording prompts.
pub struct ScriptedProvider {
    reply: Result<Option<String>, String>,
    prompts: Mutex<Vec<(String, f32)>>,
}

impl ScriptedProvider {
    pub fn answering(text: &str) -> Self {
        Self::with_reply(Ok(Some(text.to_string())))
    }

    pub fn silent() -> Self {
        Self::with_reply(Ok(None))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_reply(Err(message.to_string()))
    }

    fn with_reply(reply: Result<Option<String>, String>) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<(String, f32)> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

impl LlmProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &ProviderRequest<'_>) -> Result<ProviderResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((request.prompt.to_string(), request.temperature));
        }
        match &self.reply {
            Ok(answer) => Ok(ProviderResponse {
                answer: answer.clone(),
            }),
            Err(message) => Err(anyhow!("{message}")),
        }
    }
}
