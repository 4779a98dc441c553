//! Prefix deletion with partial-failure aggregation.

use std::fmt;

use futures::{StreamExt, stream};

use crate::{BlobError, BlobResult, BlobStore};

/// Parallel deletes issued by `delete_dir` unless configured otherwise.
pub const DEFAULT_DELETE_CONCURRENCY: usize = 8;

/// A key that could not be deleted.
#[derive(Debug)]
pub struct KeyFailure {
    pub key: String,
    pub error: BlobError,
}

/// Failures collected while deleting a prefix, in listing order.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub failures: Vec<KeyFailure>,
}

impl DeletionReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|failure| failure.key.as_str())
    }
}

impl fmt::Display for DeletionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key(s) could not be deleted", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.key, failure.error)?;
        }
        Ok(())
    }
}

/// Deletes every key under `prefix`.
///
/// All keys are listed up front, then every delete is attempted. Keys that
/// vanished in between are ignored. A listing failure aborts before any
/// delete is issued.
pub async fn delete_prefix<S>(store: &S, prefix: &str, concurrency: usize) -> BlobResult<()>
where
    S: BlobStore + ?Sized,
{
    let keys = store.list(prefix).await?;
    let concurrency = concurrency.max(1);

    let results: Vec<(String, BlobResult<()>)> = stream::iter(keys)
        .map(|key| async move {
            let result = store.delete_listed(&key).await;
            (key, result)
        })
        .buffered(concurrency)
        .collect()
        .await;

    let report = DeletionReport {
        failures: results
            .into_iter()
            .filter_map(|(key, result)| match result {
                Ok(()) => None,
                Err(err) if err.is_not_found() => None,
                Err(error) => Some(KeyFailure { key, error }),
            })
            .collect(),
    };

    if report.is_empty() {
        Ok(())
    } else {
        Err(BlobError::DeleteDir {
            bucket: store.bucket().to_string(),
            prefix: prefix.to_string(),
            report,
        })
    }
}
