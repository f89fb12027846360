//! The client-facing error taxonomy.
//!
//! Every lower-level error is folded into one of these variants. Messages
//! carry OIDs and operator-facing detail only; refcounts and tombstone
//! state never appear.

use hc_meta::MetaError;
use hc_query::QueryError;
use hc_store::StoreError;
use hc_types::AttrType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("storage full")]
    StorageFull,

    /// Transient; the caller may retry.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: AttrType,
        found: AttrType,
    },

    #[error("not indexed in time: {0}")]
    IndexTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Only I/O failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(oid) | StoreError::RefCountUnderflow(oid) => {
                Self::NoSuchObject(oid.to_hex())
            }
            StoreError::Unavailable { oid, .. } | StoreError::HashMismatch(oid) => {
                Self::DataUnavailable(oid.to_hex())
            }
            StoreError::StorageFull { .. } => Self::StorageFull,
            StoreError::Io(msg) => Self::Io(msg),
            e @ (StoreError::FragmentOutOfRange { .. } | StoreError::InvalidLayout(_)) => {
                Self::Config(e.to_string())
            }
        }
    }
}

impl From<MetaError> for ClientError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::NoSuchObject(oid) => Self::NoSuchObject(oid.to_hex()),
            MetaError::DataUnavailable(oid) => Self::DataUnavailable(oid.to_hex()),
            MetaError::Store(e) => e.into(),
        }
    }
}

impl From<QueryError> for ClientError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::TypeMismatch {
                field,
                expected,
                found,
            } => Self::TypeMismatch {
                field,
                expected,
                found,
            },
            e @ (QueryError::Parse { .. }
            | QueryError::UnknownField(_)
            | QueryError::InvalidPageSize(_)) => Self::QueryParse(e.to_string()),
        }
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
