//! Scheme-keyed registry of storage backend factories

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::config::SettingsError;

use super::local::LocalBackendFactory;
use super::s3::S3BackendFactory;
use super::traits::{BackendConfig, BackendFactory, StorageBackend};

/// Maps URL schemes to backend factories
///
/// New backends are added with [`BackendRegistry::register`]; selection never
/// changes.
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in backend (`s3`, `file`)
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(S3BackendFactory);
        registry.register(LocalBackendFactory);
        registry
    }

    /// Add a factory, replacing any previous one for the same scheme
    pub fn register(&mut self, factory: impl BackendFactory + 'static) -> &mut Self {
        debug!("Registering storage backend for scheme {}", factory.scheme());
        self.factories.insert(factory.scheme(), Box::new(factory));
        self
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Look up the factory for a destination URL
    pub fn resolve(&self, url: &Url) -> Result<&dyn BackendFactory, SettingsError> {
        self.factories
            .get(url.scheme())
            .map(|f| f.as_ref())
            .ok_or_else(|| SettingsError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                supported: self.schemes().into_iter().map(String::from).collect(),
            })
    }

    /// Pre-flight validation of the destination
    pub fn validate(&self, config: &BackendConfig) -> Result<(), SettingsError> {
        self.resolve(&config.url)?.validate(config)
    }

    /// Validate the destination and build its backend
    pub async fn create(
        &self,
        config: &BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, SettingsError> {
        let factory = self.resolve(&config.url)?;
        factory.validate(config)?;
        let backend = factory.create(config).await?;
        info!("Using {} storage backend for {}", factory.scheme(), config.url);
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PackageFile;
    use crate::storage::memory::{MemoryBackendFactory, MemoryStore};

    fn config(url: &str) -> BackendConfig {
        BackendConfig::for_url(Url::parse(url).unwrap())
    }

    #[test]
    fn test_default_schemes() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.schemes(), vec!["file", "s3"]);
    }

    #[test]
    fn test_unsupported_scheme() {
        let registry = BackendRegistry::with_defaults();
        let err = registry.validate(&config("gs://charts")).unwrap_err();
        match err {
            SettingsError::UnsupportedScheme { scheme, supported } => {
                assert_eq!(scheme, "gs");
                assert_eq!(supported, vec!["file", "s3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_s3_requires_region() {
        let registry = BackendRegistry::with_defaults();
        let mut cfg = config("s3://charts/stable");
        assert!(matches!(
            registry.validate(&cfg),
            Err(SettingsError::Missing("aws_region", "s3"))
        ));

        cfg.region = Some("eu-central-1".to_string());
        assert!(registry.validate(&cfg).is_ok());
    }

    #[tokio::test]
    async fn test_registered_backend_is_selected() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = BackendRegistry::empty();
        registry.register(MemoryBackendFactory::new(store.clone()));

        let backend = registry.create(&config("mem://bucket")).await.unwrap();
        assert_eq!(backend.scheme(), "mem");

        backend
            .store(&PackageFile::from_bytes("app-0.1.0.tgz", &b"tgz"[..]))
            .await
            .unwrap();
        assert!(store.contains("app-0.1.0.tgz"));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_scheme() {
        let registry = BackendRegistry::empty();
        let result = registry.create(&config("s3://charts")).await;
        assert!(matches!(result, Err(SettingsError::UnsupportedScheme { .. })));
    }
}
