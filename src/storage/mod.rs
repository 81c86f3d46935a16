//! Storage module for published chart packages
//!
//! Every destination store implements [`StorageBackend`]. Backends are picked
//! at startup from the storage URL scheme through a [`BackendRegistry`], so the
//! pipeline only ever sees `Arc<dyn StorageBackend>`.

mod traits;
mod registry;
pub mod s3;
pub mod local;
pub mod memory;

pub use traits::{BackendConfig, BackendFactory, StorageBackend, StoreError, StoredObject};
pub use registry::BackendRegistry;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a payload
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Public location of an object under a repository base URL
pub(crate) fn public_url(prefix: Option<&str>, key: &str) -> Option<String> {
    prefix.map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), key))
}
