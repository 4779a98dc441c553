//! Error types for blob store operations.

use std::fmt;

use strum::Display;

use crate::prefix::DeletionReport;

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Blob store operations, used as error and metrics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Exists,
    Get,
    GetOrRedirect,
    Put,
    Copy,
    Delete,
    DeleteDir,
    List,
    Sign,
    Connect,
}

/// Terminal outcome of a public blob store operation.
///
/// `TransientFailure` is never returned to callers: transient failures are
/// retried and, once retries or the deadline run out, surface as
/// `PermanentFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    NotFound,
    TransientFailure,
    PermanentFailure,
}

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobError {
    /// Blob not found at the specified location. The bucket itself exists.
    #[error("blob not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    /// Configuration, authentication or exhausted-retry failure.
    #[error("{op} failed for {bucket}/{path}: {source:#}")]
    Permanent {
        op: Operation,
        bucket: String,
        path: String,
        source: anyhow::Error,
    },

    /// One or more keys under a prefix could not be deleted.
    #[error("deleting prefix '{prefix}' in {bucket} failed: {report}")]
    DeleteDir {
        bucket: String,
        prefix: String,
        report: DeletionReport,
    },

    /// Signing was requested for a method other than GET or PUT.
    #[error("unsupported signing method '{method}', only 'get' and 'put' are supported")]
    InvalidMethod { method: String },

    /// The backend configuration is incomplete or inconsistent.
    #[error("invalid blob store configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl BlobError {
    pub fn not_found(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        BlobError::NotFound {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    pub fn permanent(
        op: Operation,
        bucket: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        BlobError::Permanent {
            op,
            bucket: bucket.into(),
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn invalid_config(reason: impl fmt::Display) -> Self {
        BlobError::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// True when the blob is absent. HTTP layers map this to 404 and every
    /// other error to 5xx.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    pub fn outcome(&self) -> OperationOutcome {
        match self {
            BlobError::NotFound { .. } => OperationOutcome::NotFound,
            _ => OperationOutcome::PermanentFailure,
        }
    }
}
