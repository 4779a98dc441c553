//! Signers for client-facing resource URLs.

use std::{sync::Arc, time::Duration};

use crate::{BlobResult, BlobStore, HttpMethod, SignedUrl, presign};

/// Spreads resources over two directory levels taken from the first four
/// characters: `myresource` is stored as `my/re/myresource`.
pub fn partitioned_key(resource: &str) -> String {
    let mut boundaries = resource
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(resource.len()));
    let (Some(second), Some(third)) = (boundaries.nth(2), boundaries.nth(1)) else {
        return resource.to_string();
    };
    format!(
        "{}/{}/{}",
        &resource[..second],
        &resource[second..third],
        resource
    )
}

/// Signs partitioned resource keys such as droplets and packages.
#[derive(Clone)]
pub struct ResourceSigner {
    store: Arc<dyn BlobStore>,
    expiry: Duration,
}

impl ResourceSigner {
    pub fn new(store: Arc<dyn BlobStore>, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    pub async fn sign(&self, resource: &str, method: &str) -> BlobResult<SignedUrl> {
        let method: HttpMethod = method.parse()?;
        self.store
            .sign(
                &partitioned_key(resource),
                method,
                presign::expires_at(self.expiry),
            )
            .await
    }
}

/// Signs request paths verbatim, used for the buildpack cache.
#[derive(Clone)]
pub struct PathSigner {
    store: Arc<dyn BlobStore>,
    expiry: Duration,
}

impl PathSigner {
    pub fn new(store: Arc<dyn BlobStore>, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    pub async fn sign(&self, path: &str, method: &str) -> BlobResult<SignedUrl> {
        let method: HttpMethod = method.parse()?;
        self.store
            .sign(
                path.trim_start_matches('/'),
                method,
                presign::expires_at(self.expiry),
            )
            .await
    }
}
