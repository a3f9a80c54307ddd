// Embeddings module
// Chunking of document text and the embedding backend seam


pub mod chunking;

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, ContentChunk, chunk_document, chunk_text, split_sentences};

/// A dense embedding vector
pub type Embedding = Vec<f32>;

/// Anything that can turn text into a fixed-dimension vector.
///
/// Implementations are read-only after construction and may be called from
/// several threads at once. Calls are blocking; [`Embedder`] moves them off the
/// async executor.
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts, preserving order
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Dimensionality of produced vectors, when known up front
    fn dimension(&self) -> Option<usize>;

    /// Identifier of the model behind this backend
    fn model_name(&self) -> &str;
}

/// Backend producing zero vectors, for running without a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullBackend {
    dimension: usize,
}

impl NullBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingBackend for NullBackend {
    #[inline]
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(vec![0.0; self.dimension])
    }

    #[inline]
    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    #[inline]
    fn model_name(&self) -> &str {
        "null"
    }
}

type BackendLoader = Arc<dyn Fn() -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync>;

/// Shared embedding front-end.
///
/// Holds one backend instance for the life of the process. A lazily
/// constructed embedder runs its loader exactly once, on first use; concurrent
/// callers wait for that load and then embed in parallel.
pub struct Embedder {
    model_name: String,
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
    loader: Option<BackendLoader>,
}

impl std::fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model_name", &self.model_name)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl Embedder {
    /// Wrap an already constructed backend
    #[inline]
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            model_name: backend.model_name().to_string(),
            backend: OnceCell::new_with(Some(backend)),
            loader: None,
        }
    }

    /// Defer backend construction until the first embedding request
    #[inline]
    pub fn lazy<F>(model_name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync + 'static,
    {
        Self {
            model_name: model_name.into(),
            backend: OnceCell::new(),
            loader: Some(Arc::new(loader)),
        }
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.backend.initialized()
    }

    /// Get the backend, loading it if this is the first call
    #[inline]
    pub async fn backend(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                let loader = self.loader.clone().ok_or_else(|| {
                    RagError::EmbeddingBackend("No embedding backend configured".to_string())
                })?;

                info!("Loading embedding backend {}", self.model_name);
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| {
                        RagError::EmbeddingBackend(format!("Embedding backend load aborted: {}", e))
                    })?
            })
            .await?;

        Ok(Arc::clone(backend))
    }

    /// Embed a batch of chunks, one vector per chunk in input order.
    ///
    /// Either every chunk gets a vector or the call fails.
    #[inline]
    pub async fn embed(&self, chunks: &[String]) -> Result<Vec<Embedding>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend().await?;
        let expected_dimension = backend.dimension();
        let texts = chunks.to_vec();

        debug!("Embedding {} chunks with {}", texts.len(), self.model_name);

        let embeddings = tokio::task::spawn_blocking(move || backend.embed_batch(&texts))
            .await
            .map_err(|e| RagError::EmbeddingBackend(format!("Embedding task aborted: {}", e)))??;

        check_batch_shape(chunks.len(), expected_dimension, &embeddings)?;

        Ok(embeddings)
    }

    /// Embed a single query string
    #[inline]
    pub async fn embed_query(&self, query: &str) -> Result<Embedding> {
        self.embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RagError::EmbeddingBackend("Backend returned no embedding for query".to_string())
            })
    }
}

fn check_batch_shape(
    expected_count: usize,
    expected_dimension: Option<usize>,
    embeddings: &[Embedding],
) -> Result<()> {
    if embeddings.len() != expected_count {
        return Err(RagError::EmbeddingBackend(format!(
            "Mismatch between request and response counts: {} vs {}",
            expected_count,
            embeddings.len()
        )));
    }

    let Some(first) = embeddings.first() else {
        return Ok(());
    };
    let dimension = expected_dimension.unwrap_or(first.len());

    if dimension == 0 {
        return Err(RagError::EmbeddingBackend(
            "Backend returned empty embeddings".to_string(),
        ));
    }

    if let Some((index, embedding)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.len() != dimension)
    {
        return Err(RagError::EmbeddingBackend(format!(
            "Embedding {} has {} dimensions, expected {}",
            index,
            embedding.len(),
            dimension
        )));
    }

    if let Some((index, _)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.iter().any(|v| !v.is_finite()))
    {
        return Err(RagError::EmbeddingBackend(format!(
            "Embedding {} contains a non-finite value",
            index
        )));
    }

    Ok(())
}
