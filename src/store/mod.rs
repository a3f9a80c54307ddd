// Vector store module
// One JSONL file of (chunk, embedding) records per tenant, plus a small manifest

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::embeddings::Embedding;
use crate::{RagError, Result};

pub const SCHEMA_VERSION: u32 = 1;

const RECORDS_SUFFIX: &str = "_embeddings.jsonl";
const MANIFEST_SUFFIX: &str = "_manifest.json";

/// One persisted line of a tenant's store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub chunk: String,
    pub embedding: Embedding,
}

/// Metadata kept next to a tenant's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub schema_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub record_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// What `save` does with records already stored for the tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace everything previously stored
    #[default]
    Overwrite,
    /// Keep existing records and add the new ones after them
    Append,
}

impl fmt::Display for WriteMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => f.write_str("overwrite"),
            Self::Append => f.write_str("append"),
        }
    }
}

/// File-backed store partitioned by tenant id.
///
/// Writes go to a temporary file in the store directory that is then renamed
/// over the tenant's file, so readers see either the old or the new contents.
/// Writers for one tenant are serialized by a per-tenant lock. Locks live
/// until the tenant is deleted.
#[derive(Debug)]
pub struct VectorStore {
    root: PathBuf,
    write_mode: WriteMode,
    model_tag: String,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VectorStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_mode: WriteMode::default(),
            model_tag: "unknown".to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Name of the embedding model recorded in manifests
    #[inline]
    pub fn with_model_tag(mut self, model_tag: impl Into<String>) -> Self {
        self.model_tag = model_tag.into();
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Path of the records file for a tenant
    #[inline]
    pub fn records_path(&self, tenant_id: &str) -> Result<PathBuf> {
        validate_tenant_id(tenant_id)?;
        Ok(self.root.join(format!("{}{}", tenant_id, RECORDS_SUFFIX)))
    }

    fn manifest_path(&self, tenant_id: &str) -> Result<PathBuf> {
        validate_tenant_id(tenant_id)?;
        Ok(self.root.join(format!("{}{}", tenant_id, MANIFEST_SUFFIX)))
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(tenant_id.to_string()).or_default())
    }

    /// Persist chunks and their embeddings for a tenant.
    ///
    /// In overwrite mode the tenant's previous records are discarded; in
    /// append mode they are kept and the new records follow them.
    #[inline]
    pub async fn save(
        &self,
        tenant_id: &str,
        chunks: &[String],
        embeddings: &[Embedding],
    ) -> Result<PathBuf> {
        let path = self.records_path(tenant_id)?;

        if chunks.len() != embeddings.len() {
            return Err(RagError::Validation(format!(
                "Got {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        let dimension = uniform_dimension(embeddings)?;

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut records = match self.write_mode {
            WriteMode::Overwrite => Vec::with_capacity(chunks.len()),
            WriteMode::Append => {
                self.check_append_model(tenant_id).await?;
                self.load(tenant_id).await?
            }
        };

        if let (Some(existing), Some(new)) = (records.first(), dimension) {
            if existing.embedding.len() != new {
                return Err(RagError::Validation(format!(
                    "Tenant '{}' stores {}-dimensional embeddings, cannot append {}-dimensional ones",
                    tenant_id,
                    existing.embedding.len(),
                    new
                )));
            }
        }

        records.extend(
            chunks
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| Record {
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                }),
        );

        let manifest = StoreManifest {
            schema_version: SCHEMA_VERSION,
            embedding_model: self.model_tag.clone(),
            dimension: records.first().map_or(0, |r| r.embedding.len()),
            record_count: records.len(),
            updated_at: Utc::now(),
        };

        let root = self.root.clone();
        let records_path = path.clone();
        let manifest_path = self.manifest_path(tenant_id)?;
        let record_count = records.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&root)?;
            write_records_atomically(&root, &records_path, &records)?;
            let manifest_json = serde_json::to_vec_pretty(&manifest)
                .map_err(|e| anyhow::anyhow!("Failed to serialize store manifest: {}", e))?;
            write_atomically(&root, &manifest_path, &manifest_json)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Store write task aborted: {}", e))??;

        info!(
            "Saved {} records for tenant '{}' to {} ({} mode)",
            record_count,
            tenant_id,
            path.display(),
            self.write_mode
        );

        Ok(path)
    }

    /// Records in one file must come from one embedding model
    async fn check_append_model(&self, tenant_id: &str) -> Result<()> {
        let Some(manifest) = self.manifest(tenant_id).await? else {
            return Ok(());
        };

        if manifest.embedding_model == self.model_tag {
            Ok(())
        } else {
            Err(RagError::Validation(format!(
                "Tenant '{}' holds embeddings from '{}', cannot append embeddings from '{}'; re-ingest in overwrite mode",
                tenant_id, manifest.embedding_model, self.model_tag
            )))
        }
    }

    /// Load every record stored for a tenant, in stored order.
    ///
    /// A tenant without a store has no records; this is not an error.
    #[inline]
    pub async fn load(&self, tenant_id: &str) -> Result<Vec<Record>> {
        let path = self.records_path(tenant_id)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No store for tenant '{}'", tenant_id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let records = parse_records(&content)?;
        debug!(
            "Loaded {} records for tenant '{}'",
            records.len(),
            tenant_id
        );
        Ok(records)
    }

    /// Whether a store file exists for the tenant
    #[inline]
    pub async fn exists(&self, tenant_id: &str) -> Result<bool> {
        let path = self.records_path(tenant_id)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Manifest written by the last `save`, if any
    #[inline]
    pub async fn manifest(&self, tenant_id: &str) -> Result<Option<StoreManifest>> {
        let path = self.manifest_path(tenant_id)?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Tenants with a store, sorted by id
    #[inline]
    pub async fn list_tenants(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names
            .iter()
            .filter_map(|name| name.strip_suffix(RECORDS_SUFFIX))
            .filter(|tenant| validate_tenant_id(tenant).is_ok())
            .map(str::to_string)
            .sorted()
            .collect())
    }

    /// Remove a tenant's records and manifest. Returns whether anything existed.
    #[inline]
    pub async fn delete(&self, tenant_id: &str) -> Result<bool> {
        let records_path = self.records_path(tenant_id)?;
        let manifest_path = self.manifest_path(tenant_id)?;

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut removed = false;
        for path in [records_path, manifest_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed {
            info!("Deleted store for tenant '{}'", tenant_id);
        }

        // Drop the entry unless another task holds or waits on the lock
        {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if Arc::strong_count(&lock) == 2 {
                locks.remove(tenant_id);
            }
        }

        Ok(removed)
    }
}

/// Tenant ids become file names, so only a conservative character set is allowed
#[inline]
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 128
        && !tenant_id.starts_with('.')
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RagError::Validation(format!(
            "Invalid tenant id '{}': use 1-128 ASCII letters, digits, '-', '_' or '.', not starting with '.'",
            tenant_id
        )))
    }
}

fn uniform_dimension(embeddings: &[Embedding]) -> Result<Option<usize>> {
    let Some(first) = embeddings.first() else {
        return Ok(None);
    };

    if let Some((index, embedding)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.len() != first.len())
    {
        return Err(RagError::Validation(format!(
            "Embedding {} has {} dimensions, expected {}",
            index,
            embedding.len(),
            first.len()
        )));
    }

    if let Some((index, _)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| e.iter().any(|v| !v.is_finite()))
    {
        return Err(RagError::Validation(format!(
            "Embedding {} contains a non-finite value",
            index
        )));
    }

    Ok(Some(first.len()))
}

fn parse_records(content: &str) -> Result<Vec<Record>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Record>(line).map_err(|e| {
                RagError::Validation(format!("Malformed record on line {}: {}", index + 1, e))
            })
        })
        .collect()
}

fn write_records_atomically(dir: &Path, path: &Path, records: &[Record]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        for record in records {
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| anyhow::anyhow!("Failed to serialize record: {}", e))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| RagError::Io(e.error))?;
    Ok(())
}

fn write_atomically(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| RagError::Io(e.error))?;
    Ok(())
}
