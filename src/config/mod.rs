//! Configuration module for the chart publisher

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

use crate::storage::BackendConfig;

/// Default number of concurrent storage workers
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Configuration errors, raised before any packaging or storing starts
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ConfigError),

    #[error("could not parse storage-url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("storage-url does not have valid protocol {scheme:?}, should be in {supported:?}")]
    UnsupportedScheme {
        scheme: String,
        supported: Vec<String>,
    },

    #[error("{0} required for {1} storage")]
    Missing(&'static str, &'static str),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("failed to create {scheme} backend: {message}")]
    Backend { scheme: String, message: String },
}

/// Plugin settings
///
/// Field names match the Drone plugin parameters, so `settings.source_dir`
/// arrives as `PLUGIN_SOURCE_DIR`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Settings {
    pub source_dir: PathBuf,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub storage_url: String,
    /// Public base URL of the chart repository
    #[serde(default)]
    pub repo_url: Option<String>,
    pub debug: bool,
    #[serde(default)]
    pub aws_access_key: String,
    #[serde(default)]
    pub aws_secret_key: String,
    #[serde(default)]
    pub aws_region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...)
    #[serde(default)]
    pub aws_endpoint: Option<String>,
    pub concurrency: usize,
    pub helm_binary: PathBuf,
    pub dependency_update: bool,
    /// Parent directory of the temporary package output directory
    pub work_dir: PathBuf,
    pub log_json: bool,
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with PLUGIN_)
    /// 2. config/local.toml
    /// 3. config/default.toml
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, SettingsError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Self::defaults()?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(Self::environment());

        Self::build(builder)
    }

    /// Builder pre-populated with the built-in defaults
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, SettingsError> {
        Ok(Config::builder()
            .set_default("source_dir", ".")?
            .set_default("debug", false)?
            .set_default("concurrency", DEFAULT_CONCURRENCY as u64)?
            .set_default("helm_binary", "helm")?
            .set_default("dependency_update", false)?
            .set_default("work_dir", ".")?
            .set_default("log_json", false)?)
    }

    /// `PLUGIN_*` environment source; `PLUGIN_EXCLUDE` is comma separated
    pub fn environment() -> Environment {
        Environment::with_prefix("PLUGIN")
            .prefix_separator("_")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("exclude")
    }

    pub fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.exclude = settings
            .exclude
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        Ok(settings)
    }

    /// Parsed destination URL
    pub fn storage_url(&self) -> Result<Url, SettingsError> {
        Url::parse(&self.storage_url).map_err(|e| SettingsError::InvalidUrl {
            url: self.storage_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Backend-independent checks; scheme-specific checks live in the backend factories
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.storage_url()?;

        if self.concurrency == 0 {
            return Err(SettingsError::Invalid(
                "concurrency must be greater than zero".to_string(),
            ));
        }

        if self.aws_access_key.is_empty() != self.aws_secret_key.is_empty() {
            return Err(SettingsError::Invalid(
                "aws_access_key and aws_secret_key must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings handed to the storage backend factory
    pub fn backend_config(&self) -> Result<BackendConfig, SettingsError> {
        Ok(BackendConfig {
            url: self.storage_url()?,
            access_key: non_empty(&self.aws_access_key),
            secret_key: non_empty(&self.aws_secret_key),
            region: non_empty(&self.aws_region),
            endpoint: self.aws_endpoint.as_deref().and_then(non_empty),
            public_url_prefix: self.repo_url.as_deref().and_then(non_empty),
        })
    }

    /// Settings as JSON with secrets masked, for debug output
    pub fn redacted(&self) -> serde_json::Value {
        let mut copy = self.clone();
        copy.aws_access_key = mask(&copy.aws_access_key);
        copy.aws_secret_key = mask(&copy.aws_secret_key);
        serde_json::to_value(&copy).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "****".to_string()
    }
}
