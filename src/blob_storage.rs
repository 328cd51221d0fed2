//! Blob storage for the CSV artifacts passed between pipeline steps.
//!
//! Artifacts are addressed by container + blob name. Azure Blob Storage is the
//! production backend; the local filesystem and an in-memory store serve
//! development and tests.

use bytes::Bytes;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, RetryConfig};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{PipelineError, ResultExt};

/// Where the artifact container lives, parsed from `BLOB_STORE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLocation {
    /// `az://<container>`; the account and credentials come from the
    /// standard `AZURE_STORAGE_*` environment variables.
    Azure { container: String },
    /// `file:///<dir>/<container>`
    Local { root: String, container: String },
    /// `memory://<container>`
    Memory { container: String },
}

impl BlobLocation {
    pub fn parse(url: &str) -> Result<Self, PipelineError> {
        let url = url.trim();
        let invalid = || {
            PipelineError::ConfigError(format!(
                "unsupported blob store URL '{}' (expected az://, file:// or memory://)",
                url
            ))
        };

        if let Some(rest) = url
            .strip_prefix("az://")
            .or_else(|| url.strip_prefix("azure://"))
        {
            let container = rest.trim_end_matches('/');
            if container.is_empty() || container.contains('/') {
                return Err(invalid());
            }
            return Ok(BlobLocation::Azure {
                container: container.to_string(),
            });
        }

        if let Some(rest) = url.strip_prefix("file://") {
            let root = rest.trim_end_matches('/');
            let container = root.rsplit('/').next().unwrap_or_default();
            if !root.starts_with('/') || container.is_empty() {
                return Err(invalid());
            }
            return Ok(BlobLocation::Local {
                root: root.to_string(),
                container: container.to_string(),
            });
        }

        if let Some(rest) = url.strip_prefix("memory://") {
            let container = rest.trim_end_matches('/');
            if container.is_empty() {
                return Err(invalid());
            }
            return Ok(BlobLocation::Memory {
                container: container.to_string(),
            });
        }

        Err(invalid())
    }

    pub fn container(&self) -> &str {
        match self {
            BlobLocation::Azure { container }
            | BlobLocation::Local { container, .. }
            | BlobLocation::Memory { container } => container,
        }
    }
}

/// A single container of named text blobs.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobStore<{}>", self.container)
    }
}

impl BlobStore {
    /// Wraps an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    /// Opens the backend described by a `BLOB_STORE_URL`.
    pub fn open(url: &str) -> Result<Self, PipelineError> {
        let location = BlobLocation::parse(url)?;
        let container = location.container().to_string();

        let store: Arc<dyn ObjectStore> = match &location {
            BlobLocation::Azure { container } => Arc::new(
                MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .with_retry(RetryConfig::default())
                    .build()
                    .context("Failed to configure Azure Blob Storage")?,
            ),
            BlobLocation::Local { root, .. } => {
                std::fs::create_dir_all(root).map_err(|e| {
                    PipelineError::ConfigError(format!("cannot create {}: {}", root, e))
                })?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(root)
                        .with_context(|| format!("Failed to open local blob root {}", root))?,
                )
            }
            BlobLocation::Memory { .. } => Arc::new(InMemory::new()),
        };

        tracing::info!("Blob store ready: {:?} container '{}'", location, container);
        Ok(Self::new(store, container))
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// `container/blob`, as shown in step messages.
    pub fn display_path(&self, blob_name: &str) -> String {
        format!("{}/{}", self.container, blob_name)
    }

    /// Writes `data` to `blob_name`.
    ///
    /// With `overwrite == false` the write fails if the blob already exists.
    pub async fn load_string(
        &self,
        data: &str,
        blob_name: &str,
        overwrite: bool,
    ) -> Result<(), PipelineError> {
        let path = Path::from(blob_name);
        let payload = PutPayload::from(Bytes::from(data.as_bytes().to_vec()));
        let opts = PutOptions {
            mode: if overwrite {
                PutMode::Overwrite
            } else {
                PutMode::Create
            },
            ..Default::default()
        };

        let start = Instant::now();
        self.store
            .put_opts(&path, payload, opts)
            .await
            .with_context(|| format!("Failed to write {}", self.display_path(blob_name)))?;

        tracing::debug!(
            "Wrote {} bytes to {} in {:?}",
            data.len(),
            self.display_path(blob_name),
            start.elapsed()
        );
        Ok(())
    }

    /// Reads `blob_name` as UTF-8 text.
    pub async fn read_file(&self, blob_name: &str) -> Result<String, PipelineError> {
        let path = Path::from(blob_name);
        let start = Instant::now();

        let bytes = self
            .store
            .get(&path)
            .await
            .with_context(|| format!("Failed to read {}", self.display_path(blob_name)))?
            .bytes()
            .await
            .with_context(|| format!("Failed to download {}", self.display_path(blob_name)))?;

        tracing::debug!(
            "Read {} bytes from {} in {:?}",
            bytes.len(),
            self.display_path(blob_name),
            start.elapsed()
        );

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            PipelineError::DataError(format!(
                "{} is not valid UTF-8: {}",
                self.display_path(blob_name),
                e
            ))
        })
    }
}

/// Hex-encoded SHA-256 of an artifact's contents.
pub fn checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}
