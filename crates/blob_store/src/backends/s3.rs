//! S3 blob store backend using object_store for data I/O and SigV4 presigning.

use std::sync::Arc;

use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use tracing::Span;

use super::cloud::{ObjectStoreBackend, ObjectStoreSigner};
use crate::{
    BlobError,
    BlobResult,
    config::{RetrySettings, S3Config},
};

/// Builds the S3 blob store.
pub fn build(
    config: &S3Config,
    retry: &RetrySettings,
    span: Span,
) -> BlobResult<ObjectStoreBackend> {
    let builder = builder(config, retry)?;
    let s3 = Arc::new(
        builder
            .build()
            .map_err(|e| BlobError::invalid_config(format!("failed to create S3 client: {e}")))?,
    );

    Ok(ObjectStoreBackend::new(
        "s3",
        &config.bucket,
        s3.clone(),
        Arc::new(ObjectStoreSigner::new(&config.bucket, s3)),
        retry.policy(),
        span,
    ))
}

/// Configured builder. Static keys win over the ambient credential chain.
fn builder(config: &S3Config, retry: &RetrySettings) -> BlobResult<AmazonS3Builder> {
    let mut builder = match (&config.access_key_id, &config.secret_access_key) {
        (Some(key), Some(secret)) => AmazonS3Builder::new()
            .with_access_key_id(key)
            .with_secret_access_key(secret),
        _ => AmazonS3Builder::from_env(),
    };

    builder = builder
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_retry(retry.transport_retry())
        .with_client_options(retry.client_options());

    if let Some(host) = &config.host {
        builder = builder
            .with_endpoint(host)
            .with_allow_http(host.starts_with("http://"));
    }

    // Applied to uploads and copy destinations alike.
    if let Some(mode) = &config.server_side_encryption {
        builder = with_config(builder, "aws_server_side_encryption", mode)?;
    }
    if let Some(key_id) = &config.sse_kms_key_id {
        builder = with_config(builder, "aws_sse_kms_key_id", key_id)?;
    }

    Ok(builder)
}

fn with_config(builder: AmazonS3Builder, key: &str, value: &str) -> BlobResult<AmazonS3Builder> {
    let key: AmazonS3ConfigKey = key
        .parse()
        .map_err(|e| BlobError::invalid_config(format!("unsupported S3 setting {key}: {e}")))?;
    Ok(builder.with_config(key, value))
}
