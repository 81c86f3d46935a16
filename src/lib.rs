//! Chart Publisher
//!
//! Packages Helm charts found in a source tree and publishes the archives to
//! an object store, as one step of a CI pipeline.
//!
//! Data flows strictly downstream:
//! discovery -> packaging -> store pipeline -> storage backend.

pub mod config;
pub mod discovery;
pub mod domain;
pub mod packaging;
pub mod pipeline;
pub mod plugin;
pub mod storage;

pub use config::{Settings, SettingsError};
pub use pipeline::{store_all, StorePipeline, StoreResult};
pub use plugin::{Plugin, PluginError, PublishSummary};
pub use storage::{BackendRegistry, StorageBackend, StoreError};
