// Generation boundary
// The LLM that turns a grounded prompt into an answer sits behind this trait

#[cfg(test)]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::{RagError, Result};

pub const PLACEHOLDER_ANSWER: &str =
    "[LLM output would appear here. This is a placeholder response.]";

/// Sampling and bounding options passed with every prompt
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
    pub repeat_penalty: f32,
    /// Upper bound on one generation call, `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationOptions {
    #[inline]
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            stop_sequences: config.stop_sequences.clone(),
            repeat_penalty: 1.1,
            timeout: (config.timeout_seconds > 0)
                .then(|| Duration::from_secs(config.timeout_seconds)),
        }
    }
}

impl GenerationOptions {
    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[inline]
    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = stop_sequences;
        self
    }
}

/// Text generation service consumed by the pipeline
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a complete answer
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Generate an answer as a stream of text fragments.
    ///
    /// The default implementation yields the whole answer as one fragment.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.generate(prompt, options).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    fn model_name(&self) -> &str;
}

/// Returns a fixed answer without calling any model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderGenerator {
    answer: String,
}

impl Default for PlaceholderGenerator {
    fn default() -> Self {
        Self {
            answer: PLACEHOLDER_ANSWER.to_string(),
        }
    }
}

impl PlaceholderGenerator {
    #[inline]
    pub fn with_answer(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for PlaceholderGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        debug!("Placeholder generator received {} char prompt", prompt.len());
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "placeholder"
    }
}

/// Run `generate`, failing once `options.timeout` elapses
#[inline]
pub async fn generate_with_timeout(
    backend: &dyn GenerationBackend,
    prompt: &str,
    options: &GenerationOptions,
) -> Result<String> {
    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, backend.generate(prompt, options))
            .await
            .map_err(|_| {
                RagError::GenerationBackend(format!(
                    "{} did not answer within {:?}",
                    backend.model_name(),
                    limit
                ))
            })?,
        None => backend.generate(prompt, options).await,
    }
}
