//! Local filesystem blob store backend.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::local::LocalFileSystem;
use tracing::Span;

use super::cloud::ObjectStoreBackend;
use crate::{BlobError, BlobResult, HttpMethod, SignedUrl, UrlSigner, retry::RetryPolicy};

/// Builds a blob store rooted at a local directory, creating it if needed.
pub fn build(root: &str, retry: RetryPolicy, span: Span) -> BlobResult<ObjectStoreBackend> {
    if root.is_empty() {
        return Err(BlobError::invalid_config("local root path must not be empty"));
    }
    std::fs::create_dir_all(root).map_err(|e| {
        BlobError::invalid_config(format!("cannot create local blob root {root}: {e}"))
    })?;
    let store = LocalFileSystem::new_with_prefix(root)
        .map_err(|e| BlobError::invalid_config(format!("invalid local blob root {root}: {e}")))?
        .with_automatic_cleanup(true);

    Ok(ObjectStoreBackend::new(
        "local",
        root,
        Arc::new(store),
        Arc::new(FileUrlSigner::new(root)),
        retry,
        span,
    )
    .with_root_dir(root))
}

/// Produces `file://` URLs. They are only meaningful on a shared filesystem,
/// so the backend serves bodies instead of redirects.
pub struct FileUrlSigner {
    root: PathBuf,
}

impl FileUrlSigner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl UrlSigner for FileUrlSigner {
    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl> {
        let full = self.root.join(path.trim_start_matches('/'));
        Ok(SignedUrl::new(
            format!("file://{}", full.display()),
            method,
            expires_at,
        ))
    }

    fn supports_redirect(&self) -> bool {
        false
    }
}
