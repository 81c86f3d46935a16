//! In-memory storage backend.
//!
//! Keeps every object in a map. Used by tests and dry runs; supports
//! injecting failures for chosen keys.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::SettingsError;
use crate::domain::{object_key, PackageFile};

use super::traits::{BackendConfig, BackendFactory, StorageBackend, StoreError, StoredObject};

/// In-memory object store
#[derive(Default)]
pub struct MemoryStore {
    prefix: String,
    objects: RwLock<HashMap<String, Bytes>>,
    failing_keys: RwLock<HashSet<String>>,
    /// Every key passed to `store`, in call order
    calls: RwLock<Vec<String>>,
    writes: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store objects under `prefix`
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Sleep this long inside every `store` call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `store` fail for the given package key
    pub fn fail_on(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Sorted object keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Package keys in the order `store` was called, failures included
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().clone()
    }

    /// Number of successful writes, overwrites included
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    async fn store(&self, file: &PackageFile) -> Result<StoredObject, StoreError> {
        self.calls.write().push(file.key.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = object_key(&self.prefix, &file.key);
        if self.failing_keys.read().contains(&file.key) {
            return Err(StoreError::Rejected {
                key,
                message: "injected failure".to_string(),
            });
        }

        let data = file.payload.read().await.map_err(|source| StoreError::Read {
            key: key.clone(),
            source,
        })?;
        let size = data.len() as u64;

        debug!(%key, size, "stored object in memory");
        self.objects.write().insert(key.clone(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(StoredObject {
            key,
            size,
            public_url: None,
        })
    }
}

/// Factory serving `mem://` URLs from a shared [`MemoryStore`]
pub struct MemoryBackendFactory {
    store: Arc<MemoryStore>,
}

impl MemoryBackendFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendFactory for MemoryBackendFactory {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    fn validate(&self, _config: &BackendConfig) -> Result<(), SettingsError> {
        Ok(())
    }

    async fn create(
        &self,
        _config: &BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, SettingsError> {
        let backend: Arc<dyn StorageBackend> = self.store.clone();
        Ok(backend)
    }
}
