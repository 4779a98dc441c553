//! Legacy dual-mode facades.
//!
//! Older clients distinguish a pure-redirect store, where `get`, `head`, `put`
//! and `copy` only hand out signed URLs, from a no-redirect store that moves
//! the bytes itself. Both are thin views over one shared adapter; `exists`,
//! `delete` and `delete_dir` behave identically in every mode.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    BlobResult,
    BlobStore,
    BlobStream,
    ByteSource,
    HttpMethod,
    PutResult,
    SignedUrl,
    prefix::{self, delete_prefix},
    presign,
};

/// Result of a legacy operation: either performed, or delegated to the
/// client through a signed URL.
#[derive(Debug)]
pub enum Redirected<T> {
    Done(T),
    Redirect(SignedUrl),
}

impl<T> Redirected<T> {
    pub fn redirect_url(&self) -> Option<&SignedUrl> {
        match self {
            Redirected::Redirect(url) => Some(url),
            Redirected::Done(_) => None,
        }
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Redirected::Done(value) => Some(value),
            Redirected::Redirect(_) => None,
        }
    }
}

/// Operation set shared by the legacy facades.
#[async_trait]
pub trait RedirectingBlobStore: Send + Sync {
    async fn get(&self, path: &str) -> BlobResult<Redirected<BlobStream>>;

    async fn head(&self, path: &str) -> BlobResult<Redirected<()>>;

    async fn put(&self, path: &str, source: ByteSource) -> BlobResult<Redirected<PutResult>>;

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<Redirected<()>>;

    async fn exists(&self, path: &str) -> BlobResult<bool>;

    async fn delete(&self, path: &str) -> BlobResult<()>;

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()>;
}

/// Hands out signed URLs and never moves blob bytes.
#[derive(Clone)]
pub struct PureRedirectBlobStore {
    store: Arc<dyn BlobStore>,
    expiry: Duration,
    delete_concurrency: usize,
}

impl PureRedirectBlobStore {
    pub fn new(store: Arc<dyn BlobStore>, expiry: Duration) -> Self {
        Self {
            store,
            expiry,
            delete_concurrency: prefix::DEFAULT_DELETE_CONCURRENCY,
        }
    }

    async fn sign(&self, path: &str, method: HttpMethod) -> BlobResult<SignedUrl> {
        self.store
            .sign(path, method, presign::expires_at(self.expiry))
            .await
    }
}

#[async_trait]
impl RedirectingBlobStore for PureRedirectBlobStore {
    async fn get(&self, path: &str) -> BlobResult<Redirected<BlobStream>> {
        Ok(Redirected::Redirect(self.sign(path, HttpMethod::Get).await?))
    }

    /// Returns a signed GET URL rather than probing the blob. Clients of the
    /// redirect API depend on this; new callers should use
    /// [`NoRedirectBlobStore::head`] or `exists`.
    async fn head(&self, path: &str) -> BlobResult<Redirected<()>> {
        Ok(Redirected::Redirect(self.sign(path, HttpMethod::Get).await?))
    }

    /// The source is dropped unread; the client uploads to the returned URL.
    async fn put(&self, path: &str, _source: ByteSource) -> BlobResult<Redirected<PutResult>> {
        Ok(Redirected::Redirect(self.sign(path, HttpMethod::Put).await?))
    }

    /// Signed PUT on `dest`. On S3-compatible providers the copy source is
    /// returned as a header the client has to attach.
    async fn copy(&self, src: &str, dest: &str) -> BlobResult<Redirected<()>> {
        let mut url = self.sign(dest, HttpMethod::Put).await?;
        if matches!(self.store.provider(), "s3" | "oss") {
            url = url.with_header(
                "x-amz-copy-source",
                format!("/{}/{}", self.store.bucket(), src.trim_start_matches('/')),
            );
        }
        Ok(Redirected::Redirect(url))
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.store.exists(path).await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.store.delete(path).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        delete_prefix(self.store.as_ref(), prefix, self.delete_concurrency).await
    }
}

/// Moves blob bytes through this process.
#[derive(Clone)]
pub struct NoRedirectBlobStore {
    store: Arc<dyn BlobStore>,
    delete_concurrency: usize,
}

impl NoRedirectBlobStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            delete_concurrency: prefix::DEFAULT_DELETE_CONCURRENCY,
        }
    }
}

#[async_trait]
impl RedirectingBlobStore for NoRedirectBlobStore {
    async fn get(&self, path: &str) -> BlobResult<Redirected<BlobStream>> {
        Ok(Redirected::Done(self.store.get(path).await?))
    }

    /// Real existence check: `BlobError::NotFound` when absent.
    async fn head(&self, path: &str) -> BlobResult<Redirected<()>> {
        if self.store.exists(path).await? {
            Ok(Redirected::Done(()))
        } else {
            Err(crate::BlobError::not_found(self.store.bucket(), path))
        }
    }

    async fn put(&self, path: &str, source: ByteSource) -> BlobResult<Redirected<PutResult>> {
        Ok(Redirected::Done(self.store.put(path, source).await?))
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<Redirected<()>> {
        self.store.copy(src, dest).await?;
        Ok(Redirected::Done(()))
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.store.exists(path).await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.store.delete(path).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        delete_prefix(self.store.as_ref(), prefix, self.delete_concurrency).await
    }
}

/// Reads through redirects, writes through this process.
#[derive(Clone)]
pub struct LegacyBlobStore {
    pure_redirect: PureRedirectBlobStore,
    no_redirect: NoRedirectBlobStore,
}

impl LegacyBlobStore {
    pub fn new(store: Arc<dyn BlobStore>, expiry: Duration) -> Self {
        Self {
            pure_redirect: PureRedirectBlobStore::new(store.clone(), expiry),
            no_redirect: NoRedirectBlobStore::new(store),
        }
    }
}

#[async_trait]
impl RedirectingBlobStore for LegacyBlobStore {
    async fn get(&self, path: &str) -> BlobResult<Redirected<BlobStream>> {
        self.pure_redirect.get(path).await
    }

    async fn head(&self, path: &str) -> BlobResult<Redirected<()>> {
        self.pure_redirect.head(path).await
    }

    async fn put(&self, path: &str, source: ByteSource) -> BlobResult<Redirected<PutResult>> {
        self.no_redirect.put(path, source).await
    }

    async fn copy(&self, src: &str, dest: &str) -> BlobResult<Redirected<()>> {
        self.no_redirect.copy(src, dest).await
    }

    async fn exists(&self, path: &str) -> BlobResult<bool> {
        self.no_redirect.exists(path).await
    }

    async fn delete(&self, path: &str) -> BlobResult<()> {
        self.no_redirect.delete(path).await
    }

    async fn delete_dir(&self, prefix: &str) -> BlobResult<()> {
        self.no_redirect.delete_dir(prefix).await
    }
}
