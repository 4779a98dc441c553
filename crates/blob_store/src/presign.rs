//! Presigned URL structures for direct client access.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult};

/// HTTP method a signed URL is scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
}

impl HttpMethod {
    /// Upper-case form used inside signatures.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }

    pub fn as_http(&self) -> http::Method {
        match self {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Put => http::Method::PUT,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = BlobError;

    /// Accepts `get` and `put` in any letter case.
    fn from_str(method: &str) -> Result<Self, Self::Err> {
        if method.eq_ignore_ascii_case("get") {
            Ok(HttpMethod::Get)
        } else if method.eq_ignore_ascii_case("put") {
            Ok(HttpMethod::Put)
        } else {
            Err(BlobError::InvalidMethod {
                method: method.to_string(),
            })
        }
    }
}

/// A presigned URL for GET or PUT operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedUrl {
    /// The presigned URL.
    pub url: String,

    /// HTTP method the URL authorizes.
    pub method: HttpMethod,

    /// Instant after which the provider rejects the URL.
    pub expires_at: DateTime<Utc>,

    /// Headers the provider expects on the request that are not covered by
    /// the signature (e.g. `x-ms-blob-type` for Azure uploads). Attaching
    /// them is the caller's job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_headers: Vec<(String, String)>,
}

impl SignedUrl {
    pub fn new(url: impl Into<String>, method: HttpMethod, expires_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            method,
            expires_at,
            required_headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Display for SignedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Produces time-bounded, method-scoped URLs for one bucket.
///
/// Signing is a pure function of the bucket identity, the credential, the
/// path, the method and the expiration. It never reads or writes the object.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign(
        &self,
        path: &str,
        method: HttpMethod,
        expires_at: DateTime<Utc>,
    ) -> BlobResult<SignedUrl>;

    /// Whether dereferencing a signed URL reaches the object without going
    /// through this process. Backends without native redirect serve
    /// `get_or_redirect` with a body stream instead.
    fn supports_redirect(&self) -> bool {
        true
    }
}

/// Maximum presigned URL expiry (7 days for S3).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default lifetime of redirect URLs handed out by `get_or_redirect`.
pub const DEFAULT_REDIRECT_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Validate presigned URL expiry duration.
pub fn validate_expiry(expires_in: Duration) -> Result<(), String> {
    if expires_in > MAX_PRESIGN_EXPIRY {
        Err(format!(
            "Expiry duration {:?} exceeds maximum allowed {:?}",
            expires_in, MAX_PRESIGN_EXPIRY
        ))
    } else if expires_in.is_zero() {
        Err("Expiry duration must be greater than zero".to_string())
    } else {
        Ok(())
    }
}

/// Absolute expiration `expires_in` from now.
pub fn expires_at(expires_in: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Remaining lifetime of an expiration instant. Instants in the past yield
/// zero, which providers reject on dereference.
pub fn remaining(expires_at: DateTime<Utc>) -> Duration {
    (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
