//! Local directory storage backend.
//!
//! Serves `file:///abs/path` destinations, e.g. a directory that is synced or
//! served as a chart repository by other means. Objects live at
//! `{base_dir}/{key}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SettingsError;
use crate::domain::PackageFile;

use super::traits::{BackendConfig, BackendFactory, StorageBackend, StoreError, StoredObject};
use super::{public_url, sha256_hex};

/// Directory-backed object store
pub struct LocalStore {
    base_dir: PathBuf,
    public_url_prefix: Option<String>,
}

impl LocalStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub fn new(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            public_url_prefix: None,
        })
    }

    pub fn with_public_url(mut self, prefix: Option<String>) -> Self {
        self.public_url_prefix = prefix;
        self
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl StorageBackend for LocalStore {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn store(&self, file: &PackageFile) -> Result<StoredObject, StoreError> {
        let key = file.key.clone();
        let data = file.payload.read().await.map_err(|source| StoreError::Read {
            key: key.clone(),
            source,
        })?;
        let write_err = |source| StoreError::Write {
            key: key.clone(),
            source,
        };

        let path = self.object_path(&key);
        let parent = path.parent().unwrap_or(&self.base_dir);
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;

        // Uniquely named sibling temp file, renamed into place; removed on drop if unpersisted
        let tmp_path = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(write_err)?
            .into_temp_path();
        tokio::fs::write(&tmp_path, &data).await.map_err(write_err)?;
        tmp_path.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(path = %path.display(), sha256 = %sha256_hex(&data), "wrote package");
        info!("Stored {} ({} bytes)", path.display(), data.len());

        Ok(StoredObject {
            public_url: public_url(self.public_url_prefix.as_deref(), &key),
            size: data.len() as u64,
            key,
        })
    }
}

/// Factory for `file://` destinations
pub struct LocalBackendFactory;

impl LocalBackendFactory {
    fn base_dir(config: &BackendConfig) -> Result<PathBuf, SettingsError> {
        config
            .url
            .to_file_path()
            .map_err(|_| SettingsError::InvalidUrl {
                url: config.url.to_string(),
                reason: "file storage-url must be an absolute local path".to_string(),
            })
    }
}

#[async_trait]
impl BackendFactory for LocalBackendFactory {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn validate(&self, config: &BackendConfig) -> Result<(), SettingsError> {
        Self::base_dir(config).map(|_| ())
    }

    async fn create(
        &self,
        config: &BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, SettingsError> {
        let base_dir = Self::base_dir(config)?;
        let store = LocalStore::new(&base_dir)
            .map_err(|e| SettingsError::Backend {
                scheme: "file".to_string(),
                message: format!("{}: {}", base_dir.display(), e),
            })?
            .with_public_url(config.public_url_prefix.clone());
        let store: Arc<dyn StorageBackend> = Arc::new(store);
        Ok(store)
    }
}
