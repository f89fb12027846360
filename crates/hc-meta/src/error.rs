//! Error types for metadata chains.
//!
//! Messages name the OID and nothing else: whether an object was never
//! created or was deleted, and what its refcount is, stays internal.

use hc_store::StoreError;
use hc_types::ObjectId;

/// Errors that can occur during metadata chain operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The OID does not name a live object.
    #[error("no such object: {0}")]
    NoSuchObject(ObjectId),

    /// The object exists but its data cannot be reconstructed.
    #[error("data unavailable: {0}")]
    DataUnavailable(ObjectId),

    /// Data-object storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl MetaError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Convenience alias for metadata chain results.
pub type MetaResult<T> = Result<T, MetaError>;
