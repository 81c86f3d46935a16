//! S3-compatible storage backend for chart packages
//!
//! Destination URLs look like `s3://{bucket}/{optional/prefix}`. Any
//! S3-compatible store (MinIO, Cloudflare R2, ...) works through a custom
//! endpoint, which switches the client to path-style addressing.
//!
//! ## Object Layout
//! ```text
//! {bucket}/
//! └── {prefix}/
//!     ├── {chart}-{version}.tgz
//!     └── ...
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client as S3Client,
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::SettingsError;
use crate::domain::{object_key, PackageFile};

use super::traits::{BackendConfig, BackendFactory, StorageBackend, StoreError, StoredObject};
use super::{public_url, sha256_hex};

/// Bucket and key prefix parsed from an `s3://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    /// Parse `s3://bucket/prefix`
    pub fn from_url(url: &Url) -> Result<Self, SettingsError> {
        let bucket = url
            .host_str()
            .filter(|b| !b.is_empty())
            .ok_or(SettingsError::Missing("bucket name", "s3"))?;

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: url.path().trim_matches('/').to_string(),
        })
    }

    /// Full object key for a package key
    pub fn key_for(&self, package_key: &str) -> String {
        object_key(&self.prefix, package_key)
    }
}

/// S3 client for chart package storage
#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
    location: S3Location,
    public_url_prefix: Option<String>,
}

impl S3Store {
    /// Create a new S3 store from backend settings
    ///
    /// Static credentials are used when both keys are given; otherwise the
    /// default AWS credential chain (environment, profile, IMDS) applies.
    pub async fn new(config: &BackendConfig) -> Result<Self, SettingsError> {
        let location = S3Location::from_url(&config.url)?;
        let region = config
            .region
            .clone()
            .ok_or(SettingsError::Missing("aws_region", "s3"))?;

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                debug!("Using static S3 credentials");
                let credentials = Credentials::new(
                    access_key,
                    secret_key,
                    None, // session token
                    None, // expiry
                    "chart-publisher-static-credentials",
                );
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(region))
                    .credentials_provider(credentials)
            }
            _ => {
                debug!("Using default AWS credential chain");
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region))
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint {
            debug!("Using custom S3 endpoint: {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            location,
            public_url_prefix: config.public_url_prefix.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.location.bucket
    }

    /// Get the key prefix inside the bucket
    pub fn prefix(&self) -> &str {
        &self.location.prefix
    }
}

#[async_trait]
impl StorageBackend for S3Store {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, file), fields(bucket = %self.location.bucket, key = %file.key))]
    async fn store(&self, file: &PackageFile) -> Result<StoredObject, StoreError> {
        let key = self.location.key_for(&file.key);
        let data = file.payload.read().await.map_err(|source| StoreError::Read {
            key: key.clone(),
            source,
        })?;
        let size = data.len() as u64;
        let digest = sha256_hex(&data);

        debug!("Uploading {} bytes to s3://{}/{}", size, self.location.bucket, key);

        let result = self
            .client
            .put_object()
            .bucket(&self.location.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .content_type(file.content_type())
            .metadata("sha256", digest)
            .send()
            .await
            .map_err(|e| StoreError::Upload {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        info!(
            etag = result.e_tag().unwrap_or_default(),
            "Uploaded to S3: {} ({} bytes)", key, size
        );

        Ok(StoredObject {
            public_url: public_url(self.public_url_prefix.as_deref(), &file.key),
            key,
            size,
        })
    }
}

/// Factory for `s3://` destinations
pub struct S3BackendFactory;

#[async_trait]
impl BackendFactory for S3BackendFactory {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    fn validate(&self, config: &BackendConfig) -> Result<(), SettingsError> {
        S3Location::from_url(&config.url)?;
        if config.region.as_deref().map_or(true, str::is_empty) {
            return Err(SettingsError::Missing("aws_region", "s3"));
        }
        if let Some(endpoint) = &config.endpoint {
            Url::parse(endpoint).map_err(|e| SettingsError::InvalidUrl {
                url: endpoint.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn create(
        &self,
        config: &BackendConfig,
    ) -> Result<Arc<dyn StorageBackend>, SettingsError> {
        let store: Arc<dyn StorageBackend> = Arc::new(S3Store::new(config).await?);
        Ok(store)
    }
}
