
use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::RagError;
use crate::config::Config;
use crate::embeddings::{Embedding, EmbeddingBackend};
use crate::generation::{GenerationBackend, GenerationOptions};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking client for the Ollama HTTP API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    embedding_dimension: Option<usize>,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: SamplingOptions<'a>,
}

#[derive(Debug, Serialize)]
struct SamplingOptions<'a> {
    num_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    stop: &'a [String],
}

impl<'a> From<&'a GenerationOptions> for SamplingOptions<'a> {
    fn from(options: &'a GenerationOptions) -> Self {
        Self {
            num_predict: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            repeat_penalty: options.repeat_penalty,
            stop: &options.stop_sequences,
        }
    }
}

/// One non-streamed response, or one line of a streamed one
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    /// Client for the configured embedding model
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.model.clone(),
            batch_size: config.ollama.batch_size.max(1),
            embedding_dimension: Some(config.ollama.embedding_dimension as usize),
            agent: build_agent(Duration::from_secs(config.generation.timeout_seconds)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; later retries double it
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model(&self.model)
            .context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self.endpoint("/api/version")?;

        debug!("Pinging Ollama server at {}", url);
        self.get_with_retry(&url)
            .context("Failed to ping Ollama server")?;
        Ok(())
    }

    /// Check that a model is installed on the server
    #[inline]
    pub fn validate_model(&self, model: &str) -> Result<()> {
        let models = self.list_models().context("Failed to list models")?;

        if models.iter().any(|m| model_matches(&m.name, model)) {
            debug!("Model {} is available", model);
            Ok(())
        } else {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!("Model {} not found. Available models: {:?}", model, available);
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                model,
                available
            ))
        }
    }

    /// List all installed models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;

        let response_text = self
            .get_with_retry(&url)
            .context("Failed to fetch models")?;
        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed texts in batches of `batch_size`, preserving order
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let batch_embeddings = self
                .embed_single_batch(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            embeddings.extend(batch_embeddings);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let url = self.endpoint("/api/embed")?;
        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .post_with_retry(&url, &body)
            .context("Failed to generate embeddings")?;
        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            ));
        }

        Ok(response.embeddings)
    }

    /// Generate a complete answer with `model`
    #[inline]
    pub fn generate(&self, model: &str, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let url = self.endpoint("/api/generate")?;
        let body = serde_json::to_string(&GenerateRequest {
            model,
            prompt,
            stream: false,
            options: SamplingOptions::from(options),
        })
        .context("Failed to serialize generate request")?;

        debug!("Generating with {} ({} char prompt)", model, prompt.len());

        let response_text = self
            .post_with_retry(&url, &body)
            .context("Failed to generate answer")?;
        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generate response")?;

        if let Some(message) = response.error {
            return Err(anyhow::anyhow!("Ollama reported an error: {}", message));
        }

        Ok(response.response)
    }

    /// Generate with `model`, handing each streamed fragment to `on_fragment`.
    ///
    /// Streamed requests are not retried once the server has accepted them.
    #[inline]
    pub fn generate_streaming<F>(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
        mut on_fragment: F,
    ) -> Result<()>
    where
        F: FnMut(String) -> Result<()>,
    {
        let url = self.endpoint("/api/generate")?;
        let body = serde_json::to_string(&GenerateRequest {
            model,
            prompt,
            stream: true,
            options: SamplingOptions::from(options),
        })
        .context("Failed to serialize generate request")?;

        let mut response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .map_err(|e| anyhow::anyhow!("Streaming request failed: {}", e))?;

        let reader = BufReader::new(response.body_mut().as_reader());
        for line in reader.lines() {
            let line = line.context("Failed to read streamed response")?;
            if line.trim().is_empty() {
                continue;
            }

            let fragment: GenerateResponse =
                serde_json::from_str(&line).context("Failed to parse streamed fragment")?;
            if let Some(message) = fragment.error {
                return Err(anyhow::anyhow!("Ollama reported an error: {}", message));
            }
            if !fragment.response.is_empty() {
                on_fragment(fragment.response)?;
            }
            if fragment.done {
                return Ok(());
            }
        }

        Err(anyhow::anyhow!("Stream ended before generation finished"))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))
    }

    fn get_with_retry(&self, url: &Url) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn post_with_retry(&self, url: &Url, body: &str) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(ureq::Error::StatusCode(status)) if status < 500 => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                }
                Err(error) if is_retryable(&error) => {
                    warn!(
                        "Request failed: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn is_retryable(error: &ureq::Error) -> bool {
    matches!(
        error,
        ureq::Error::StatusCode(500..)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_)
    )
}

/// Ollama reports `name:latest` for models requested without a tag
fn model_matches(installed: &str, requested: &str) -> bool {
    installed == requested
        || (!requested.contains(':') && installed.strip_suffix(":latest") == Some(requested))
}

impl EmbeddingBackend for OllamaClient {
    #[inline]
    fn embed(&self, text: &str) -> crate::Result<Embedding> {
        self.generate_embeddings_batch(&[text.to_string()])
            .map_err(|e| RagError::EmbeddingBackend(format!("{:#}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingBackend("Ollama returned no embedding".to_string()))
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Embedding>> {
        self.generate_embeddings_batch(texts)
            .map_err(|e| RagError::EmbeddingBackend(format!("{:#}", e)))
    }

    #[inline]
    fn dimension(&self) -> Option<usize> {
        self.embedding_dimension
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Answer generation through Ollama's `/api/generate`
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::new(config)?,
            model: config.generation.model.clone(),
        })
    }

    #[inline]
    pub fn with_client(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> crate::Result<String> {
        let client = self.client.clone();
        let model = self.model.clone();
        let prompt = prompt.to_string();
        let options = options.clone();

        tokio::task::spawn_blocking(move || client.generate(&model, &prompt, &options))
            .await
            .map_err(|e| RagError::GenerationBackend(format!("Generation task aborted: {}", e)))?
            .map_err(|e| RagError::GenerationBackend(format!("{:#}", e)))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> crate::Result<BoxStream<'static, crate::Result<String>>> {
        let (sender, receiver) = mpsc::unbounded();
        let client = self.client.clone();
        let model = self.model.clone();
        let prompt = prompt.to_string();
        let options = options.clone();

        tokio::task::spawn_blocking(move || {
            let result = client.generate_streaming(&model, &prompt, &options, |fragment| {
                sender
                    .unbounded_send(Ok(fragment))
                    .map_err(|_| anyhow::anyhow!("Stream receiver dropped"))
            });

            if let Err(e) = result {
                if sender.is_closed() {
                    debug!("Stopped streaming after receiver dropped");
                } else {
                    let _ = sender
                        .unbounded_send(Err(RagError::GenerationBackend(format!("{:#}", e))));
                }
            }
        });

        Ok(receiver.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
