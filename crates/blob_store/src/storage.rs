//! Blob store facade bound to one configured provider.

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use opentelemetry::metrics::Meter;
use tracing::{Span, debug, info_span, warn};

use crate::{
    BlobMetrics,
    BlobOrRedirect,
    BlobResult,
    BlobStore,
    BlobStoreConfig,
    BlobStream,
    ByteSource,
    HttpMethod,
    Operation,
    PutResult,
    SignedUrl,
    backends,
    prefix::{self, delete_prefix},
    presign,
    stream::source_from_bytes,
};

/// High-level blob storage.
///
/// Wraps the adapter of the configured provider with logging, optional
/// metrics and the configured redirect expiry and delete concurrency. The
/// provider is fixed at construction.
#[derive(Clone)]
pub struct BlobStorage {
    store: Arc<dyn BlobStore>,
    redirect_expiry: Duration,
    delete_concurrency: usize,
    metrics: Option<BlobMetrics>,
    span: Span,
}

impl BlobStorage {
    /// Validate the configuration and build the provider adapter.
    pub fn new(config: BlobStoreConfig) -> BlobResult<Self> {
        config.validate()?;
        let span = info_span!(
            "blob_store",
            provider = config.provider.name(),
            bucket = %config.provider.bucket()
        );
        let store = backends::build(&config, span.clone())?;

        Ok(Self {
            store,
            redirect_expiry: config.redirect_expiry(),
            delete_concurrency: config.delete_concurrency,
            metrics: None,
            span,
        })
    }

    /// Wrap an already built adapter with default settings.
    pub fn from_store(store: Arc<dyn BlobStore>) -> Self {
        let span = info_span!("blob_store", provider = store.provider(), bucket = %store.bucket());
        Self {
            store,
            redirect_expiry: presign::DEFAULT_REDIRECT_EXPIRY,
            delete_concurrency: prefix::DEFAULT_DELETE_CONCURRENCY,
            metrics: None,
            span,
        }
    }

    /// Record operation latencies and failures.
    pub fn with_metrics(mut self, meter: &Meter) -> Self {
        self.metrics = Some(BlobMetrics::new(meter));
        self
    }

    pub fn store(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    pub fn provider(&self) -> &'static str {
        self.store.provider()
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    pub fn redirect_expiry(&self) -> Duration {
        self.redirect_expiry
    }

    async fn observe<T>(
        &self,
        op: Operation,
        path: &str,
        operation: impl Future<Output = BlobResult<T>>,
    ) -> BlobResult<T> {
        let timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.start(op, self.store.provider()));
        let result = operation.await;
        if let Some(timer) = timer {
            timer.finish(&result);
        }

        match &result {
            Ok(_) => debug!(parent: &self.span, %op, path, "blob store operation succeeded"),
            Err(err) if err.is_not_found() => {
                debug!(parent: &self.span, %op, path, "blob not found")
            }
            Err(err) => {
                warn!(parent: &self.span, %op, path, error = %err, "blob store operation failed")
            }
        }
        result
    }

    pub async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.observe(Operation::Exists, path, self.store.exists(path))
            .await
    }

    pub async fn get(&self, path: &str) -> BlobResult<BlobStream> {
        self.observe(Operation::Get, path, self.store.get(path)).await
    }

    /// Signed GET URL valid for the configured redirect expiry, or the body
    /// on backends that cannot redirect.
    pub async fn get_or_redirect(&self, path: &str) -> BlobResult<BlobOrRedirect> {
        self.observe(
            Operation::GetOrRedirect,
            path,
            self.store.get_or_redirect(path, self.redirect_expiry),
        )
        .await
    }

    pub async fn put(&self, path: &str, source: ByteSource) -> BlobResult<PutResult> {
        self.observe(Operation::Put, path, self.store.put(path, source))
            .await
    }

    pub async fn put_bytes(&self, path: &str, data: impl Into<Bytes>) -> BlobResult<PutResult> {
        self.put(path, source_from_bytes(data)).await
    }

    /// Read a whole blob into memory.
    pub async fn read_bytes(&self, path: &str) -> BlobResult<Bytes> {
        self.observe(Operation::Get, path, async {
            self.store.get(path).await?.read_to_bytes().await
        })
        .await
    }

    pub async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        self.observe(Operation::Copy, src, self.store.copy(src, dest))
            .await
    }

    pub async fn delete(&self, path: &str) -> BlobResult<()> {
        self.observe(Operation::Delete, path, self.store.delete(path))
            .await
    }

    pub async fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        self.observe(Operation::List, prefix, self.store.list(prefix))
            .await
    }

    /// Delete every blob under `prefix` with the configured concurrency.
    pub async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        self.observe(
            Operation::DeleteDir,
            prefix,
            delete_prefix(self.store.as_ref(), prefix, self.delete_concurrency),
        )
        .await
    }

    pub async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        self.observe(Operation::Sign, path, self.store.sign(path, method, expires_at))
            .await
    }

    /// Sign with a method given as text, `get` or `put` in any case.
    pub async fn sign_str(
        &self,
        path: &str,
        method: &str,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        let method: HttpMethod = method.parse()?;
        self.sign(path, method, expires_at).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::BlobError;

    fn local_storage(temp_dir: &TempDir) -> BlobStorage {
        BlobStorage::new(BlobStoreConfig::local(temp_dir.path().to_str().unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_storage_put_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = local_storage(&temp_dir);
        assert_eq!(storage.provider(), "local");

        let result = storage.put_bytes("test.txt", "hello world").await.unwrap();
        assert_eq!(result.size_bytes, 11);
        assert!(!result.sha256_hash.is_empty());

        assert_eq!(
            storage.read_bytes("test.txt").await.unwrap(),
            Bytes::from("hello world")
        );
    }

    #[tokio::test]
    async fn test_storage_delete_dir_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let storage = local_storage(&temp_dir);
        for key in ["cache/a", "cache/b", "keep"] {
            storage.put_bytes(key, "x").await.unwrap();
        }
        storage.delete_dir("cache/").await.unwrap();
        assert!(storage.list("cache/").await.unwrap().is_empty());
        assert!(storage.exists("keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_sign_str_rejects_unknown_method() {
        let temp_dir = TempDir::new().unwrap();
        let storage = local_storage(&temp_dir);
        let expires_at = presign::expires_at(Duration::from_secs(60));

        let err = storage.sign_str("k", "delete", expires_at).await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidMethod { .. }));

        let url = storage.sign_str("k", "Get", expires_at).await.unwrap();
        assert_eq!(url.method, HttpMethod::Get);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_building() {
        let Err(err) = BlobStorage::new(BlobStoreConfig::local("")) else {
            panic!("empty root must be rejected");
        };
        assert!(matches!(err, BlobError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_metrics_do_not_change_results() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            local_storage(&temp_dir).with_metrics(&opentelemetry::global::meter("blob_store_test"));
        assert!(storage.get("missing").await.unwrap_err().is_not_found());
    }
}
