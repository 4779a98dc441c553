//! Resilient blob store contract for the bits service.
//!
//! This crate stores droplets, packages, buildpacks and caches behind one
//! contract that behaves the same on every provider:
//!
//! - Providers: S3, Google Cloud Storage, Azure Blob Storage, OpenStack
//!   Swift, Alibaba OSS and the local filesystem
//! - Uniform errors: a missing blob is always [`BlobError::NotFound`], a
//!   missing or inaccessible bucket is always a permanent error
//! - Retries of transient timeouts within an overall deadline
//! - Signed URLs so clients can read and write blobs directly
//! - Prefix deletion with per-key failure aggregation
//!
//! # Architecture
//!
//! Every provider implements the low-level [`BlobStore`] trait. Adapters built
//! on `object_store` share [`backends::cloud::ObjectStoreBackend`]; Swift has
//! its own HTTP adapter. [`BlobStorage`] binds one configured adapter and adds
//! logging, metrics and the configured redirect expiry. The [`legacy`] module
//! offers the pure-redirect and no-redirect facades older clients expect.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bits_blobstore::{BlobOrRedirect, BlobStorage, BlobStoreConfig};
//!
//! # async fn example() -> Result<(), bits_blobstore::BlobError> {
//! let config = BlobStoreConfig::from_path("blobstore.yaml")?;
//! let storage = BlobStorage::new(config)?;
//!
//! storage.put_bytes("ab/cd/abcdef", "droplet bytes").await?;
//! match storage.get_or_redirect("ab/cd/abcdef").await? {
//!     BlobOrRedirect::Redirect(url) => println!("redirect to {url}"),
//!     BlobOrRedirect::Body(body) => {
//!         let bytes = body.read_to_bytes().await?;
//!         println!("{} bytes", bytes.len());
//!     }
//! }
//! storage.delete_dir("ab/").await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
mod classify;
pub mod config;
mod error;
pub mod legacy;
mod metrics;
mod prefix;
mod presign;
mod retry;
pub mod signer;
mod storage;
mod stream;
mod traits;

pub use classify::{ErrorClass, Failure};
pub use config::BlobStoreConfig;
pub use error::{BlobError, BlobResult, Operation, OperationOutcome};
pub use legacy::{
    LegacyBlobStore,
    NoRedirectBlobStore,
    PureRedirectBlobStore,
    RedirectingBlobStore,
    Redirected,
};
pub use metrics::{BlobMetrics, Timer};
pub use prefix::{DEFAULT_DELETE_CONCURRENCY, DeletionReport, KeyFailure, delete_prefix};
pub use presign::{
    DEFAULT_REDIRECT_EXPIRY,
    HttpMethod,
    MAX_PRESIGN_EXPIRY,
    SignedUrl,
    UrlSigner,
    validate_expiry,
};
pub use retry::{RetryPolicy, execute_with_retry};
pub use storage::BlobStorage;
pub use stream::{BlobStream, ByteSource, source_from_bytes, source_from_reader};
pub use traits::{BlobOrRedirect, BlobStore, PutResult};
