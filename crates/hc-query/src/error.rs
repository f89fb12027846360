//! Error types for the query crate.

use hc_types::AttrType;

/// Errors that can occur while parsing, checking or running a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The predicate text is malformed.
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// A field is not part of the configured schema.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A value does not fit the field's schema type.
    #[error("type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: AttrType,
        found: AttrType,
    },

    /// A cursor was requested with an unusable page size.
    #[error("invalid page size: {0}")]
    InvalidPageSize(usize),
}

impl QueryError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

/// Convenience alias for query results.
pub type QueryResult<T> = Result<T, QueryError>;
