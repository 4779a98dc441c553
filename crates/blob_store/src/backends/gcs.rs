//! Google Cloud Storage blob store backend using object_store for data I/O
//! and V4 presigning.

use std::sync::Arc;

use object_store::gcp::GoogleCloudStorageBuilder;
use serde_json::json;
use tracing::Span;

use super::cloud::{ObjectStoreBackend, ObjectStoreSigner};
use crate::{
    BlobError,
    BlobResult,
    config::{GcsConfig, RetrySettings},
};

/// Builds the GCS blob store from service account credentials.
pub fn build(
    config: &GcsConfig,
    retry: &RetrySettings,
    span: Span,
) -> BlobResult<ObjectStoreBackend> {
    let gcs = GoogleCloudStorageBuilder::new()
        .with_bucket_name(&config.bucket)
        .with_service_account_key(service_account_key(config))
        .with_retry(retry.transport_retry())
        .with_client_options(retry.client_options())
        .build()
        .map_err(|e| BlobError::invalid_config(format!("failed to create GCS client: {e}")))?;
    let gcs = Arc::new(gcs);

    Ok(ObjectStoreBackend::new(
        "gcs",
        &config.bucket,
        gcs.clone(),
        Arc::new(ObjectStoreSigner::new(&config.bucket, gcs)),
        retry.policy(),
        span,
    ))
}

/// Service account key document in the format the GCP console exports.
fn service_account_key(config: &GcsConfig) -> String {
    json!({
        "type": "service_account",
        "client_email": config.email,
        "private_key": config.private_key,
        "private_key_id": config.private_key_id,
        "token_uri": config.token_url,
    })
    .to_string()
}
