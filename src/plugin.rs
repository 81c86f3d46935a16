//! Plugin driver
//!
//! Validates settings, selects the storage backend, then wires discovery,
//! packaging and the store pipeline together.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Settings, SettingsError};
use crate::discovery::{self, DiscoveryError};
use crate::packaging::{self, ChartPackager, HelmPackager};
use crate::pipeline::{StorePipeline, StoreResult};
use crate::storage::{BackendRegistry, StoreError};

/// Errors that end a plugin run with a non-zero exit status
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("failed to create temporary output directory in {path}: {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stored} packages stored before failure: {source}")]
    Store {
        stored: usize,
        #[source]
        source: StoreError,
    },
}

/// Summary of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSummary {
    pub charts_found: usize,
    pub stored: usize,
    pub skipped: usize,
}

/// Drone plugin: package every chart under `source_dir` and publish it
pub struct Plugin {
    settings: Settings,
    registry: BackendRegistry,
    packager: Arc<dyn ChartPackager>,
}

impl Plugin {
    /// Plugin using `helm` and the built-in backends
    pub fn new(settings: Settings) -> Self {
        let packager = HelmPackager::new(settings.helm_binary.clone())
            .with_dependency_update(settings.dependency_update);
        Self {
            settings,
            registry: BackendRegistry::with_defaults(),
            packager: Arc::new(packager),
        }
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_packager(mut self, packager: Arc<dyn ChartPackager>) -> Self {
        self.packager = packager;
        self
    }

    /// Run the plugin
    pub async fn exec(&self) -> Result<PublishSummary, PluginError> {
        if self.settings.debug {
            self.debug();
        }

        // Everything that can be checked up front fails here, before packaging
        self.settings.validate()?;
        let backend_config = self.settings.backend_config()?;
        let backend = self.registry.create(&backend_config).await?;

        let source_dir = self.settings.source_dir.clone();
        let exclude = self.settings.exclude.clone();
        let charts =
            tokio::task::spawn_blocking(move || discovery::find_charts(&source_dir, &exclude))
                .await
                .map_err(|e| DiscoveryError::Aborted(format!("Task join error: {}", e)))??;
        let charts_found = charts.len();
        if charts.is_empty() {
            warn!("No charts found in {}", self.settings.source_dir.display());
        }

        // Removed on drop, after the pipeline is done with the archives
        let temp_dir = tempfile::Builder::new()
            .prefix("tempOutput")
            .tempdir_in(&self.settings.work_dir)
            .map_err(|source| PluginError::TempDir {
                path: self.settings.work_dir.clone(),
                source,
            })?;
        debug!("Packaging into {}", temp_dir.path().display());

        let pipeline = StorePipeline::new(self.settings.concurrency);
        let stream = packaging::package_charts(
            Arc::clone(&self.packager),
            charts,
            temp_dir.path().to_path_buf(),
            pipeline.concurrency(),
        );
        let result = pipeline.store_all(backend, stream).await;

        Self::summarize(charts_found, result)
    }

    fn summarize(charts_found: usize, result: StoreResult) -> Result<PublishSummary, PluginError> {
        if let Some(source) = result.error {
            return Err(PluginError::Store {
                stored: result.stored_count,
                source,
            });
        }

        info!(
            "Published {} of {} charts ({} failed to package)",
            result.stored_count, charts_found, result.skipped_count
        );

        Ok(PublishSummary {
            charts_found,
            stored: result.stored_count,
            skipped: result.skipped_count,
        })
    }

    fn debug(&self) {
        debug!(settings = %self.settings.redacted(), "Plugin settings");
        for (key, value) in std::env::vars() {
            if key.starts_with("PLUGIN_") || key.starts_with("DRONE_") {
                let secret = ["KEY", "SECRET", "TOKEN"].iter().any(|s| key.contains(s));
                let value = if secret { "****".to_string() } else { value };
                debug!("-Var:-- {}={}", key, value);
            }
        }
        debug!("Source Dir: {}", self.settings.source_dir.display());
        debug!("Excluded Directories: {:?}", self.settings.exclude);
        debug!("Storage URL: {}", self.settings.storage_url);
        debug!("Repo URL: {}", self.settings.repo_url.as_deref().unwrap_or(""));
    }
}
