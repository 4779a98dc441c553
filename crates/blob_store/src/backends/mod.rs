//! Blob store backend implementations.

use std::sync::Arc;

use tracing::Span;

use crate::{BlobResult, BlobStore, config::{BlobStoreConfig, ProviderConfig}};

pub mod azure;
pub mod cloud;
pub mod gcs;
pub mod local;
pub mod oss;
pub mod s3;
pub mod swift;

/// Builds the adapter for the configured provider.
pub fn build(config: &BlobStoreConfig, span: Span) -> BlobResult<Arc<dyn BlobStore>> {
    let retry = &config.retry;
    let store: Arc<dyn BlobStore> = match &config.provider {
        ProviderConfig::S3(c) => Arc::new(s3::build(c, retry, span)?),
        ProviderConfig::Gcs(c) => Arc::new(gcs::build(c, retry, span)?),
        ProviderConfig::Azure(c) => Arc::new(azure::build(c, retry, span)?),
        ProviderConfig::Swift(c) => Arc::new(swift::SwiftBlobStore::new(c, retry, span)?),
        ProviderConfig::Oss(c) => Arc::new(oss::build(c, retry, span)?),
        ProviderConfig::Local(c) => Arc::new(local::build(&c.root, retry.policy(), span)?),
    };
    Ok(store)
}
