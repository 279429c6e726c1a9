//! Command-line and environment configuration shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Args;

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedder::gemini::GEMINI_BASE_URL;
use crate::embedder::{Embedder, EmbedderKind, GeminiEmbedder, OpenAiEmbedder};
use crate::llm::{
    AnthropicProvider, GeminiProvider, LlmProvider, OpenAiProvider, ProviderKind,
    ANTHROPIC_BASE_URL,
};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::retriever::DEFAULT_TOP_K;
use crate::store::{DEFAULT_INDEX_DIR, DEFAULT_INDEX_KEY};
use crate::synthesizer::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chunking, retrieval and storage knobs.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Maximum characters per chunk
    #[arg(long, env = "DOCRAG_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Minimum characters shared by consecutive chunks
    #[arg(long, env = "DOCRAG_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Passages retrieved per question
    #[arg(long, env = "DOCRAG_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Sampling temperature for the answer model
    #[arg(long, env = "DOCRAG_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Maximum tokens requested from the answer model
    #[arg(long, env = "DOCRAG_MAX_OUTPUT_TOKENS", default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
    pub max_output_tokens: usize,

    /// Directory holding persisted indexes
    #[arg(long, env = "DOCRAG_INDEX_DIR", default_value = DEFAULT_INDEX_DIR)]
    pub index_dir: PathBuf,

    /// Slot the active document set is indexed under
    #[arg(long, env = "DOCRAG_INDEX_KEY", default_value = DEFAULT_INDEX_KEY)]
    pub index_key: String,

    /// Reuse the stored index when the chunks and embedding model are unchanged
    #[arg(long, env = "DOCRAG_REUSE_INDEX", default_value_t = false)]
    pub reuse_index: bool,
}

impl PipelineArgs {
    /// Plain settings value.
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
            top_k: self.top_k.max(1),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            index_dir: self.index_dir.clone(),
            index_key: self.index_key.clone(),
            reuse_index: self.reuse_index,
        }
    }
}

/// External service selection and credentials.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Answer model backend
    #[arg(long, env = "DOCRAG_LLM_PROVIDER", value_enum, default_value = "gemini")]
    pub llm_provider: ProviderKind,

    /// Embedding backend
    #[arg(long, env = "DOCRAG_EMBEDDING_PROVIDER", value_enum, default_value = "gemini")]
    pub embedding_provider: EmbedderKind,

    /// Google API key (Gemini answers or embeddings)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Gemini API base URL
    #[arg(long, env = "DOCRAG_GEMINI_BASE_URL", default_value = GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    /// Gemini answer model
    #[arg(long, env = "DOCRAG_GEMINI_MODEL", default_value = "gemini-pro")]
    pub gemini_model: String,

    /// Gemini embedding model
    #[arg(long, env = "DOCRAG_GEMINI_EMBEDDING_MODEL", default_value = "models/embedding-001")]
    pub gemini_embedding_model: String,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "DOCRAG_OPENAI_BASE_URL", default_value = OPENAI_BASE_URL)]
    pub openai_base_url: String,

    /// OpenAI answer model
    #[arg(long, env = "DOCRAG_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// OpenAI embedding model
    #[arg(long, env = "DOCRAG_OPENAI_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub openai_embedding_model: String,

    /// Optional output dimensionality for OpenAI embeddings
    #[arg(long, env = "DOCRAG_OPENAI_EMBEDDING_DIMENSIONS")]
    pub openai_embedding_dimensions: Option<usize>,

    /// Anthropic API base URL
    #[arg(long, env = "DOCRAG_ANTHROPIC_BASE_URL", default_value = ANTHROPIC_BASE_URL)]
    pub anthropic_base_url: String,

    /// Anthropic answer model
    #[arg(long, env = "DOCRAG_ANTHROPIC_MODEL", default_value = "claude-3-5-sonnet-latest")]
    pub anthropic_model: String,

    /// HTTP timeout for every external call, in seconds
    #[arg(long, env = "DOCRAG_HTTP_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Attempts per embedding request before giving up
    #[arg(long, env = "DOCRAG_EMBEDDING_RETRIES", default_value_t = 3)]
    pub embedding_retries: usize,

    /// Chunks sent per embedding request
    #[arg(long, env = "DOCRAG_EMBEDDING_BATCH_SIZE", default_value_t = 32)]
    pub embedding_batch_size: usize,
}

impl ProviderArgs {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Builds the configured embedding client. Fails when its key is missing.
    pub fn embedder(&self) -> Result<Box<dyn Embedder>> {
        match self.embedding_provider {
            EmbedderKind::Gemini => {
                let key = require_key(&self.google_api_key, "GOOGLE_API_KEY", "Gemini embeddings")?;
                Ok(Box::new(GeminiEmbedder::new(
                    key,
                    &self.gemini_base_url,
                    &self.gemini_embedding_model,
                    self.timeout(),
                    self.embedding_retries,
                    self.embedding_batch_size,
                )?))
            }
            EmbedderKind::OpenAi => {
                let key = require_key(&self.openai_api_key, "OPENAI_API_KEY", "OpenAI embeddings")?;
                Ok(Box::new(OpenAiEmbedder::new(
                    key,
                    &self.openai_base_url,
                    self.openai_embedding_model.clone(),
                    self.openai_embedding_dimensions,
                    self.timeout(),
                    self.embedding_retries,
                    self.embedding_batch_size,
                )?))
            }
        }
    }

    /// Builds the configured answer model. Fails when its key is missing.
    pub fn provider(&self) -> Result<Box<dyn LlmProvider>> {
        match self.llm_provider {
            ProviderKind::Gemini => {
                let key = require_key(&self.google_api_key, "GOOGLE_API_KEY", "the Gemini provider")?;
                Ok(Box::new(GeminiProvider::new(
                    key,
                    &self.gemini_base_url,
                    &self.gemini_model,
                    self.timeout(),
                )?))
            }
            ProviderKind::OpenAi => {
                let key = require_key(&self.openai_api_key, "OPENAI_API_KEY", "the OpenAI provider")?;
                Ok(Box::new(OpenAiProvider::new(
                    key,
                    &self.openai_base_url,
                    self.openai_model.clone(),
                    self.timeout(),
                )?))
            }
            ProviderKind::Anthropic => {
                let key = require_key(
                    &self.anthropic_api_key,
                    "ANTHROPIC_API_KEY",
                    "the Anthropic provider",
                )?;
                Ok(Box::new(AnthropicProvider::new(
                    key,
                    &self.anthropic_base_url,
                    self.anthropic_model.clone(),
                    self.timeout(),
                )?))
            }
        }
    }
}

/// Builds a ready pipeline from parsed arguments.
pub fn build_pipeline(pipeline: &PipelineArgs, providers: &ProviderArgs) -> Result<Pipeline> {
    let embedder = providers.embedder()?;
    let provider = providers.provider()?;
    Ok(Pipeline::new(pipeline.settings(), embedder, provider)?)
}

fn require_key<'a>(key: &'a Option<String>, var: &str, purpose: &str) -> Result<&'a str> {
    key.as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("{var} must be set for {purpose}. Please check your .env file."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        providers: ProviderArgs,
    }

    fn parse(args: &[&str]) -> TestCli {
        let mut argv = vec!["docrag"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn pipeline_defaults_flow_into_settings() {
        let cli = parse(&["--chunk-size", "500", "--chunk-overlap", "50"]);
        let settings = cli.pipeline.settings();
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.overlap, 50);
        assert_eq!(settings.index_key, cli.pipeline.index_key);
    }

    #[test]
    fn missing_key_is_fatal() {
        let cli = parse(&[
            "--llm-provider",
            "anthropic",
            "--anthropic-api-key",
            "  ",
        ]);
        let err = cli.providers.provider().err().unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY must be set"));
    }

    #[test]
    fn explicit_keys_build_clients() {
        let cli = parse(&[
            "--llm-provider",
            "openai",
            "--embedding-provider",
            "openai",
            "--openai-api-key",
            "sk-test",
        ]);
        assert_eq!(cli.providers.provider().unwrap().model(), "gpt-4o-mini");
        assert_eq!(
            cli.providers.embedder().unwrap().model(),
            cli.providers.openai_embedding_model
        );
    }
}
