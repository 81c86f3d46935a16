//! Storage backend contract
//!
//! Any store that can durably persist a named byte payload implements
//! [`StorageBackend`]; construction goes through a [`BackendFactory`] keyed by
//! URL scheme.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::config::SettingsError;
use crate::domain::PackageFile;

// ============================================================================
// Error Types
// ============================================================================

/// Failure to persist one package. Fatal to the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read package {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{key} rejected by backend: {message}")]
    Rejected { key: String, message: String },

    #[error("storage worker {worker} aborted: {message}")]
    WorkerAborted { worker: usize, message: String },
}

/// Receipt for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Full object key inside the store
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Public URL if a repository URL is configured
    pub public_url: Option<String>,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Durable write capability for one remote object store
///
/// One handle is shared by every storage worker, so implementations must be
/// safe to call concurrently. Implementations do not retry.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// URL scheme this backend serves (e.g. "s3")
    fn scheme(&self) -> &'static str;

    /// Create or overwrite the object for `file`
    async fn store(&self, file: &PackageFile) -> Result<StoredObject, StoreError>;
}

// ============================================================================
// Backend Factory
// ============================================================================

/// Backend-agnostic destination settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Destination, e.g. `s3://bucket/prefix`
    pub url: Url,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Base URL the stored objects are served from
    pub public_url_prefix: Option<String>,
}

impl BackendConfig {
    /// Config with only a destination URL set
    pub fn for_url(url: Url) -> Self {
        Self {
            url,
            access_key: None,
            secret_key: None,
            region: None,
            endpoint: None,
            public_url_prefix: None,
        }
    }
}

/// Builds a [`StorageBackend`] for one URL scheme
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Scheme handled by this factory
    fn scheme(&self) -> &'static str;

    /// Pre-flight checks, run before any packaging starts
    fn validate(&self, config: &BackendConfig) -> Result<(), SettingsError>;

    /// Construct the shared backend handle
    async fn create(
        &self,
        config: &BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, SettingsError>;
}
