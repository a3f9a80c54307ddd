// Retrieval module
// Scores a tenant's stored records against a query and returns the best matches


use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::embeddings::{Embedder, Embedding};
use crate::store::{Record, VectorStore};
use crate::{RagError, Result};

/// A stored record annotated with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub chunk: String,
    pub embedding: Embedding,
    pub similarity: f32,
}

/// Cosine of the angle between two vectors.
///
/// Accumulates in `f64`. Zero when either vector has zero norm or the score
/// is not finite. Vectors of different length are compared over their common
/// prefix; callers check dimensions first.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, na + x * x, nb + y * y)
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32;
    if similarity.is_finite() { similarity } else { 0.0 }
}

/// Score every record and keep the `top_k` best, most similar first.
///
/// Equal scores keep store order.
#[inline]
pub fn rank(records: Vec<Record>, query_embedding: &[f32], top_k: usize) -> Vec<SimilarityResult> {
    let mut scored: Vec<SimilarityResult> = records
        .into_iter()
        .map(|record| {
            let similarity = cosine_similarity(&record.embedding, query_embedding);
            SimilarityResult {
                chunk: record.chunk,
                embedding: record.embedding,
                similarity,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    scored.truncate(top_k);
    scored
}

/// Finds the stored chunks most relevant to a query
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarityResult>>;
}

/// Exhaustive scan over every record of the tenant's store
#[derive(Debug, Clone)]
pub struct LinearScanRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<Embedder>,
}

impl LinearScanRetriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>, embedder: Arc<Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Retriever for LinearScanRetriever {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarityResult>> {
        let records = self.store.load(tenant_id).await?;
        if records.is_empty() {
            return Err(RagError::NotFound(format!(
                "No documents stored for tenant '{}'",
                tenant_id
            )));
        }

        if let Some(manifest) = self.store.manifest(tenant_id).await? {
            if manifest.embedding_model != self.embedder.model_name() {
                warn!(
                    "Tenant '{}' was embedded with '{}' but queries use '{}'",
                    tenant_id,
                    manifest.embedding_model,
                    self.embedder.model_name()
                );
            }
        }

        let query_embedding = self.embedder.embed_query(query).await?;

        if let Some(record) = records
            .iter()
            .find(|r| r.embedding.len() != query_embedding.len())
        {
            return Err(RagError::Validation(format!(
                "Query embedding has {} dimensions but tenant '{}' stores {}-dimensional embeddings",
                query_embedding.len(),
                tenant_id,
                record.embedding.len()
            )));
        }

        let record_count = records.len();
        let results = rank(records, &query_embedding, top_k);

        debug!(
            "Scored {} records for tenant '{}', returning {}",
            record_count,
            tenant_id,
            results.len()
        );

        Ok(results)
    }
}
