//! Core blob store trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlobResult, BlobStream, ByteSource, HttpMethod, SignedUrl, prefix};

/// Result of a PUT operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    /// Size in bytes.
    pub size_bytes: u64,

    /// SHA256 hash of the data.
    pub sha256_hash: String,
}

/// Either the blob body or a signed URL the caller should redirect to.
#[derive(Debug)]
pub enum BlobOrRedirect {
    Body(BlobStream),
    Redirect(SignedUrl),
}

/// Core blob store operations.
///
/// Every provider adapter implements this trait. Implementations are
/// `Send + Sync` and shared across tasks behind an `Arc`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Provider name, used in logs and metrics labels.
    fn provider(&self) -> &'static str;

    /// Bucket (or container) this adapter is bound to.
    fn bucket(&self) -> &str;

    /// Whether a blob exists.
    ///
    /// Returns `false` only when the key is absent. A missing bucket is a
    /// `BlobError::Permanent`.
    async fn exists(&self, path: &str) -> BlobResult<bool>;

    /// Open a blob for reading.
    ///
    /// Returns `BlobError::NotFound` if the blob doesn't exist.
    async fn get(&self, path: &str) -> BlobResult<BlobStream>;

    /// Signed GET URL on redirect-capable backends, the body otherwise.
    ///
    /// The redirect branch does not check existence; a missing object
    /// surfaces as 404 when the URL is dereferenced.
    async fn get_or_redirect(&self, path: &str, expires_in: Duration)
    -> BlobResult<BlobOrRedirect>;

    /// Store a blob, replacing any existing one.
    ///
    /// The source is consumed exactly once, so uploads are not retried.
    async fn put(&self, path: &str, source: ByteSource) -> BlobResult<PutResult>;

    /// Server-side copy. Returns `BlobError::NotFound` if `src` is absent.
    async fn copy(&self, src: &str, dest: &str) -> BlobResult<()>;

    /// Delete a blob.
    ///
    /// Returns `BlobError::NotFound` if the blob doesn't exist.
    async fn delete(&self, path: &str) -> BlobResult<()>;

    /// All keys starting with `prefix`, across every page of the listing.
    async fn list(&self, prefix: &str) -> BlobResult<Vec<String>>;

    /// Delete a key returned by [`BlobStore::list`], without checking
    /// existence first.
    async fn delete_listed(&self, key: &str) -> BlobResult<()>;

    /// Delete every blob under `prefix`.
    ///
    /// All deletions are attempted; the error lists every key that failed
    /// for a reason other than NotFound.
    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        prefix::delete_prefix(self, prefix, prefix::DEFAULT_DELETE_CONCURRENCY).await
    }

    /// Generate a signed URL. Never touches the object.
    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl>;
}
