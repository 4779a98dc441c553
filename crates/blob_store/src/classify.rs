//! Classification of transport failures into NotFound, Timeout and Permanent.

use std::{error::Error as StdError, fmt, future::Future, io};

use reqwest::StatusCode;

use crate::{BlobError, Operation};

/// Classification of errors for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The requested key (or bucket) does not exist. Not retried.
    NotFound,
    /// A network-level timeout. Retried.
    Timeout,
    /// Anything else. Not retried.
    Permanent,
}

/// A classified transport failure, carried through the retry executor.
#[derive(Debug)]
pub struct Failure {
    pub class: ErrorClass,
    pub source: anyhow::Error,
}

impl Failure {
    pub fn new(class: ErrorClass, source: impl Into<anyhow::Error>) -> Self {
        Self {
            class,
            source: source.into(),
        }
    }

    pub fn not_found(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorClass::NotFound, source)
    }

    pub fn timeout(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorClass::Timeout, source)
    }

    pub fn permanent(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorClass::Permanent, source)
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Timeout
    }

    pub fn is_not_found(&self) -> bool {
        self.class == ErrorClass::NotFound
    }

    /// Converts into the public error. NotFound maps to `BlobError::NotFound`
    /// without probing the bucket; use [`resolve_not_found`] where a missing
    /// bucket has to be told apart from a missing key.
    pub fn into_blob_error(self, op: Operation, bucket: &str, path: &str) -> BlobError {
        match self.class {
            ErrorClass::NotFound => BlobError::not_found(bucket, path),
            ErrorClass::Timeout | ErrorClass::Permanent => {
                BlobError::permanent(op, bucket, path, self.source)
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {:#}", self.class, self.source)
    }
}

impl From<object_store::Error> for Failure {
    fn from(err: object_store::Error) -> Self {
        let class = classify_object_store_error(&err);
        Failure::new(class, err)
    }
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        let class = classify_reqwest_error(&err);
        Failure::new(class, err)
    }
}

/// Classifies an `object_store` error.
pub fn classify_object_store_error(err: &object_store::Error) -> ErrorClass {
    match err {
        object_store::Error::NotFound { .. } => ErrorClass::NotFound,
        other if is_timeout(other) => ErrorClass::Timeout,
        _ => ErrorClass::Permanent,
    }
}

/// Classifies a `reqwest` error, using the response status when present.
pub fn classify_reqwest_error(err: &reqwest::Error) -> ErrorClass {
    if is_timeout(err) {
        return ErrorClass::Timeout;
    }
    match err.status() {
        Some(status) => classify_status(status),
        None => ErrorClass::Permanent,
    }
}

/// Classifies a non-success HTTP status.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    match status {
        StatusCode::NOT_FOUND => ErrorClass::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorClass::Timeout,
        _ => ErrorClass::Permanent,
    }
}

/// Walks the source chain looking for a network-level timeout.
pub fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return true;
            }
        }
        if err.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        current = err.source();
    }
    false
}

/// Turns a NotFound into either `BlobError::NotFound` or, when the bucket
/// itself is missing or inaccessible, `BlobError::Permanent`.
///
/// `bucket_check` is a cheap existence check of the bucket (list with a page size of
/// one, or a container HEAD).
pub async fn resolve_not_found<Fut>(
    op: Operation,
    bucket: &str,
    path: &str,
    bucket_check: Fut,
) -> BlobError
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    match bucket_check.await {
        Ok(()) => BlobError::not_found(bucket, path),
        Err(err) => BlobError::permanent(
            op,
            bucket,
            path,
            err.context("bucket does not exist or is not accessible"),
        ),
    }
}
