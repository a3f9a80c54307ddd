// Pipeline module
// Ingestion (chunk, embed, store) and question answering (retrieve, prompt, generate)


use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embeddings::chunking::{ChunkingConfig, chunk_document};
use crate::embeddings::{Embedder, EmbeddingBackend};
use crate::extract::TextExtractor;
use crate::generation::{GenerationBackend, GenerationOptions, generate_with_timeout};
use crate::ollama::{OllamaClient, OllamaGenerator};
use crate::prompt::{
    AnswerLength, PromptRequest, PromptTemplate, build_summary_prompt, clean_summary,
    summary_stop_sequences,
};
use crate::retrieval::{LinearScanRetriever, Retriever, SimilarityResult};
use crate::store::{VectorStore, validate_tenant_id};
use crate::{RagError, Result};

/// Tenant used when none is given
pub const DEFAULT_TENANT: &str = "default_client";

const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Outcome of one ingestion batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub tenant_id: String,
    pub documents: usize,
    pub skipped_documents: usize,
    pub chunks: usize,
    pub dimension: usize,
    pub path: PathBuf,
}

/// Ranked context, the prompt built from it, and the generated answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub results: Vec<SimilarityResult>,
    #[serde(rename = "rag_prompt")]
    pub prompt: String,
    #[serde(rename = "llm_answer")]
    pub answer: String,
}

/// Like [`QueryResponse`], with the answer still being generated
pub struct QueryStream {
    pub results: Vec<SimilarityResult>,
    pub prompt: String,
    pub answer: BoxStream<'static, Result<String>>,
}

impl fmt::Debug for QueryStream {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("results", &self.results)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

pub struct RagPipeline {
    chunking: ChunkingConfig,
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn GenerationBackend>,
    template: PromptTemplate,
    generation_options: GenerationOptions,
    default_top_k: usize,
}

impl fmt::Debug for RagPipeline {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagPipeline")
            .field("chunking", &self.chunking)
            .field("embedder", &self.embedder)
            .field("store", &self.store.root())
            .field("generator", &self.generator.model_name())
            .field("default_top_k", &self.default_top_k)
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    /// Pipeline over an explicit embedder, store and generator, using
    /// exhaustive retrieval and the default prompt framing
    #[inline]
    pub fn new(
        chunking: ChunkingConfig,
        embedder: Arc<Embedder>,
        store: Arc<VectorStore>,
        generator: Arc<dyn GenerationBackend>,
    ) -> Self {
        let retriever = Arc::new(LinearScanRetriever::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
        ));

        Self {
            chunking,
            embedder,
            store,
            retriever,
            generator,
            template: PromptTemplate::default(),
            generation_options: GenerationOptions::default(),
            default_top_k: 5,
        }
    }

    /// Ollama-backed pipeline. The embedding model is checked on first use.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;

        let loader_config = config.clone();
        let embedder = Arc::new(Embedder::lazy(
            config.ollama.model.clone(),
            move || -> Result<Arc<dyn EmbeddingBackend>> {
                let client = OllamaClient::new(&loader_config)
                    .and_then(|client| {
                        client.validate_model(client.model())?;
                        Ok(client)
                    })
                    .map_err(|e| RagError::EmbeddingBackend(format!("{:#}", e)))?;
                let backend: Arc<dyn EmbeddingBackend> = Arc::new(client);
                Ok(backend)
            },
        ));

        let store = Arc::new(
            VectorStore::new(config.store_path())
                .with_write_mode(config.store.write_mode)
                .with_model_tag(config.ollama.model.clone()),
        );

        let generator = OllamaGenerator::new(config)
            .map_err(|e| RagError::Config(format!("{:#}", e)))?;

        let mut pipeline = Self::new(
            config.chunking.clone(),
            embedder,
            store,
            Arc::new(generator),
        )
        .with_generation_options(GenerationOptions::from(&config.generation));
        pipeline.default_top_k = config.retrieval.top_k;

        Ok(pipeline)
    }

    #[inline]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = retriever;
        self
    }

    #[inline]
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    #[inline]
    pub fn with_generation_options(mut self, options: GenerationOptions) -> Self {
        self.generation_options = options;
        self
    }

    #[inline]
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    #[inline]
    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    #[inline]
    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    #[inline]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Chunk every document, embed all chunks together and store them with
    /// a single save.
    ///
    /// Blank documents are skipped. If nothing is left to store the tenant's
    /// existing store is not touched.
    #[inline]
    pub async fn ingest(&self, tenant_id: &str, documents: &[String]) -> Result<IngestReport> {
        validate_tenant_id(tenant_id)?;

        let mut chunks = Vec::new();
        let mut skipped_documents = 0;

        for (index, document) in documents.iter().enumerate() {
            let document_chunks = chunk_document(document, &self.chunking);
            if document_chunks.is_empty() {
                warn!("Skipping document {} for tenant '{}': no text", index, tenant_id);
                skipped_documents += 1;
                continue;
            }
            debug!(
                "Document {} produced {} chunks",
                index,
                document_chunks.len()
            );
            chunks.extend(document_chunks.into_iter().map(|chunk| chunk.content));
        }

        if chunks.is_empty() {
            return Err(RagError::Validation(format!(
                "No text to ingest for tenant '{}'",
                tenant_id
            )));
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        let path = self.store.save(tenant_id, &chunks, &embeddings).await?;

        let report = IngestReport {
            tenant_id: tenant_id.to_string(),
            documents: documents.len() - skipped_documents,
            skipped_documents,
            chunks: chunks.len(),
            dimension: embeddings.first().map_or(0, Vec::len),
            path,
        };

        info!(
            "Ingested {} documents ({} chunks) for tenant '{}'",
            report.documents, report.chunks, tenant_id
        );

        Ok(report)
    }

    /// Extract each file and ingest the texts as one batch
    #[inline]
    pub async fn ingest_files(
        &self,
        tenant_id: &str,
        paths: &[PathBuf],
        extractor: &dyn TextExtractor,
    ) -> Result<IngestReport> {
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(extractor.extract_file(path).await?);
        }

        self.ingest(tenant_id, &documents).await
    }

    /// Ranked chunks for `query`, without generating an answer
    #[inline]
    pub async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarityResult>> {
        check_query(query, top_k)?;
        self.retriever.search(tenant_id, query, top_k).await
    }

    /// Retrieve the `top_k` most relevant chunks for `query` and answer from them
    #[inline]
    pub async fn query(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        length: Option<AnswerLength>,
    ) -> Result<QueryResponse> {
        let (results, prompt, options) = self.prepare(tenant_id, query, top_k, length).await?;

        let answer = generate_with_timeout(self.generator.as_ref(), &prompt, &options).await?;

        Ok(QueryResponse {
            results,
            prompt,
            answer,
        })
    }

    /// Same as [`query`](Self::query), streaming the answer as it is generated
    #[inline]
    pub async fn query_stream(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        length: Option<AnswerLength>,
    ) -> Result<QueryStream> {
        let (results, prompt, options) = self.prepare(tenant_id, query, top_k, length).await?;

        let answer = self.generator.generate_stream(&prompt, &options).await?;

        Ok(QueryStream {
            results,
            prompt,
            answer,
        })
    }

    async fn prepare(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
        length: Option<AnswerLength>,
    ) -> Result<(Vec<SimilarityResult>, String, GenerationOptions)> {
        let results = self.search(tenant_id, query, top_k).await?;
        let context: Vec<String> = results.iter().map(|r| r.chunk.clone()).collect();

        let prompt = self.template.render(&PromptRequest {
            context_chunks: &context,
            query,
            length,
        });

        let options = match length {
            Some(length) => self
                .generation_options
                .clone()
                .with_max_tokens(length.max_tokens()),
            None => self.generation_options.clone(),
        };

        debug!(
            "Built prompt from {} chunks for tenant '{}'",
            results.len(),
            tenant_id
        );

        Ok((results, prompt, options))
    }

    /// Summarize a document with the generation backend
    #[inline]
    pub async fn summarize(&self, text: &str, length: AnswerLength) -> Result<String> {
        if text.trim().is_empty() {
            return Err(RagError::Validation(
                "No text to summarize".to_string(),
            ));
        }

        let prompt = build_summary_prompt(text, length);
        let options = self
            .generation_options
            .clone()
            .with_max_tokens(length.max_tokens())
            .with_temperature(SUMMARY_TEMPERATURE)
            .with_stop_sequences(summary_stop_sequences());

        let raw = generate_with_timeout(self.generator.as_ref(), &prompt, &options).await?;
        Ok(clean_summary(&raw))
    }
}

fn check_query(query: &str, top_k: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::Validation("Query cannot be empty".to_string()));
    }
    if top_k == 0 {
        return Err(RagError::Validation("top_k must be at least 1".to_string()));
    }
    Ok(())
}
