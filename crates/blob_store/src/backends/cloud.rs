//! Blob store adapter shared by every `object_store` backed provider.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::{ObjectStore, PutPayload, WriteMultipart, path::Path, signer::Signer};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use tracing::{Span, debug};

use crate::{
    BlobError,
    BlobOrRedirect,
    BlobResult,
    BlobStore,
    BlobStream,
    ByteSource,
    HttpMethod,
    Operation,
    PutResult,
    SignedUrl,
    UrlSigner,
    classify::{Failure, resolve_not_found},
    presign,
    retry::{RetryPolicy, execute_with_retry},
};

/// Payloads up to this size are written with a single PUT.
pub const MULTIPART_THRESHOLD: usize = 5 * 1024 * 1024;

/// Parts uploaded concurrently by a multipart writer.
const MULTIPART_CONCURRENCY: usize = 8;

/// Blob store over any [`ObjectStore`].
///
/// Provider modules build the transport and the signer; this type owns the
/// contract: retries, NotFound disambiguation, upload strategy and logging.
pub struct ObjectStoreBackend {
    provider: &'static str,
    bucket: String,
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn UrlSigner>,
    /// Directory standing in for the bucket of a filesystem store.
    root_dir: Option<PathBuf>,
    retry: RetryPolicy,
    span: Span,
}

impl ObjectStoreBackend {
    pub fn new(
        provider: &'static str,
        bucket: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn UrlSigner>,
        retry: RetryPolicy,
        span: Span,
    ) -> Self {
        let bucket = bucket.into();
        debug!(parent: &span, provider, bucket = %bucket, "created blob store");
        Self {
            provider,
            bucket,
            store,
            signer,
            root_dir: None,
            retry,
            span,
        }
    }

    /// Treats a missing `root` as a missing bucket. A filesystem listing of
    /// a removed directory is empty rather than an error.
    pub fn with_root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    /// The underlying transport.
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Cheap existence check of the bucket: the first entry of an unfiltered
    /// listing.
    async fn check_bucket(&self) -> anyhow::Result<()> {
        if let Some(root) = &self.root_dir {
            if !tokio::fs::try_exists(root).await? {
                anyhow::bail!("root directory {} does not exist", root.display());
            }
        }
        let mut listing = self.store.list(None);
        match listing.next().await {
            Some(Err(err)) => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn not_found(&self, op: Operation, path: &str) -> BlobError {
        resolve_not_found(op, &self.bucket, path, self.check_bucket()).await
    }

    async fn failed(&self, failure: Failure, op: Operation, path: &str) -> BlobError {
        if failure.is_not_found() {
            self.not_found(op, path).await
        } else {
            failure.into_blob_error(op, &self.bucket, path)
        }
    }

    fn put_failed(&self, path: &str, source: impl Into<anyhow::Error>) -> BlobError {
        BlobError::permanent(Operation::Put, &self.bucket, path, source)
    }

    async fn put_multipart(
        &self,
        location: &Path,
        path: &str,
        buffered: Vec<Bytes>,
        mut source: ByteSource,
        mut hasher: Sha256,
        mut size_bytes: u64,
    ) -> BlobResult<PutResult> {
        let upload = self
            .store
            .put_multipart(location)
            .await
            .map_err(|e| self.put_failed(path, e))?;
        let mut writer = WriteMultipart::new(upload);
        for chunk in buffered {
            writer.write(&chunk);
        }

        while let Some(chunk) = source.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = writer.abort().await;
                    return Err(self.put_failed(
                        path,
                        anyhow::Error::new(err).context("failed to read upload source"),
                    ));
                }
            };
            if let Err(err) = writer.wait_for_capacity(MULTIPART_CONCURRENCY).await {
                let _ = writer.abort().await;
                return Err(self.put_failed(path, err));
            }
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }

        writer
            .finish()
            .await
            .map_err(|e| self.put_failed(path, e))?;

        Ok(PutResult {
            size_bytes,
            sha256_hash: format!("{:x}", hasher.finalize()),
        })
    }
}

/// Key prefix listings can be scoped to. `object_store` lists whole path
/// segments, so `two/fo` is listed under `two` and filtered afterwards.
fn listing_root(prefix: &str) -> Option<Path> {
    prefix
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .filter(|dir| !dir.is_empty())
        .map(Path::from)
}

/// Key as it was written. `object_store` percent-encodes reserved characters
/// in each segment of a listed location.
fn key_of(location: &Path) -> String {
    location
        .parts()
        .map(|part| percent_decode_str(part.as_ref()).decode_utf8_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl BlobStore for ObjectStoreBackend {
    fn provider(&self) -> &'static str {
        self.provider
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        let location = Path::from(path);
        let store = &self.store;
        let location = &location;
        let result = execute_with_retry(
            &self.retry,
            &self.span,
            Operation::Exists,
            move || async move { store.head(location).await.map_err(Failure::from) },
        )
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(failure) => {
                let err = self.failed(failure, Operation::Exists, path).await;
                if err.is_not_found() { Ok(false) } else { Err(err) }
            }
        }
    }

    async fn get(&self, path: &str) -> BlobResult<BlobStream> {
        let location = Path::from(path);
        let store = &self.store;
        let location = &location;
        let result = execute_with_retry(
            &self.retry,
            &self.span,
            Operation::Get,
            move || async move { store.get(location).await.map_err(Failure::from) },
        )
        .await;

        match result {
            Ok(get) => {
                debug!(parent: &self.span, path, size = get.meta.size, "opened blob");
                Ok(BlobStream::from_transport(get.into_stream(), &self.bucket, path))
            }
            Err(failure) => Err(self.failed(failure, Operation::Get, path).await),
        }
    }

    async fn get_or_redirect(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> BlobResult<BlobOrRedirect> {
        if !self.signer.supports_redirect() {
            return self.get(path).await.map(BlobOrRedirect::Body);
        }
        let url = self
            .signer
            .sign(path, HttpMethod::Get, presign::expires_at(expires_in))
            .await?;
        Ok(BlobOrRedirect::Redirect(url))
    }

    async fn put(&self, path: &str, mut source: ByteSource) -> BlobResult<PutResult> {
        let location = Path::from(path);
        let mut hasher = Sha256::new();
        let mut size_bytes = 0u64;
        let mut buffered = Vec::new();

        while size_bytes < MULTIPART_THRESHOLD as u64 {
            match source.next().await {
                Some(Ok(chunk)) => {
                    hasher.update(&chunk);
                    size_bytes += chunk.len() as u64;
                    buffered.push(chunk);
                }
                Some(Err(err)) => {
                    return Err(self.put_failed(
                        path,
                        anyhow::Error::new(err).context("failed to read upload source"),
                    ));
                }
                None => {
                    self.store
                        .put(&location, PutPayload::from_iter(buffered))
                        .await
                        .map_err(|e| self.put_failed(path, e))?;
                    debug!(parent: &self.span, path, size_bytes, "stored blob");
                    return Ok(PutResult {
                        size_bytes,
                        sha256_hash: format!("{:x}", hasher.finalize()),
                    });
                }
            }
        }

        let result = self
            .put_multipart(&location, path, buffered, source, hasher, size_bytes)
            .await?;
        debug!(
            parent: &self.span,
            path,
            size_bytes = result.size_bytes,
            "stored blob with multipart upload"
        );
        Ok(result)
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()> {
        let from = Path::from(src);
        let to = Path::from(dest);
        let store = &self.store;
        let (from, to) = (&from, &to);
        let result = execute_with_retry(
            &self.retry,
            &self.span,
            Operation::Copy,
            move || async move { store.copy(from, to).await.map_err(Failure::from) },
        )
        .await;

        match result {
            Ok(()) => {
                debug!(parent: &self.span, src, dest, "copied blob");
                Ok(())
            }
            Err(failure) => Err(self.failed(failure, Operation::Copy, src).await),
        }
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        if !self.exists(path).await? {
            return Err(BlobError::not_found(&self.bucket, path));
        }
        self.delete_listed(path).await?;
        debug!(parent: &self.span, path, "deleted blob");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BlobResult<Vec<String>> {
        let root = listing_root(prefix);
        let store = &self.store;
        let root = root.as_ref();
        let result = execute_with_retry(
            &self.retry,
            &self.span,
            Operation::List,
            move || async move {
                store
                    .list(root)
                    .map_ok(|meta| key_of(&meta.location))
                    .try_collect::<Vec<_>>()
                    .await
                    .map_err(Failure::from)
            },
        )
        .await;

        match result {
            Ok(keys) => Ok(keys
                .into_iter()
                .filter(|key| key.starts_with(prefix))
                .collect()),
            Err(failure) => {
                let err = self.failed(failure, Operation::List, prefix).await;
                if err.is_not_found() {
                    Ok(Vec::new())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete_listed(&self, key: &str) -> BlobResult<()> {
        let location = Path::from(key);
        let store = &self.store;
        let location = &location;
        execute_with_retry(&self.retry, &self.span, Operation::Delete, move || async move {
            store.delete(location).await.map_err(Failure::from)
        })
        .await
        .map_err(|failure| failure.into_blob_error(Operation::Delete, &self.bucket, key))
    }

    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        self.signer.sign(path, method, expires_at).await
    }
}

/// Query-string signer backed by `object_store`'s native [`Signer`]
/// (SigV4 for S3 and OSS, V4 signing for GCS).
pub struct ObjectStoreSigner {
    bucket: String,
    signer: Arc<dyn Signer>,
}

impl ObjectStoreSigner {
    pub fn new(bucket: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Self {
            bucket: bucket.into(),
            signer,
        }
    }
}

#[async_trait]
impl UrlSigner for ObjectStoreSigner {
    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        let url = self
            .signer
            .signed_url(method.as_http(), &Path::from(path), presign::remaining(expires_at))
            .await
            .map_err(|e| BlobError::permanent(Operation::Sign, &self.bucket, path, e))?;
        Ok(SignedUrl::new(url.to_string(), method, expires_at))
    }
}
