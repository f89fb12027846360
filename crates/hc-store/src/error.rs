use hc_types::DataOid;

/// Errors from data-object storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested data object does not exist or is not reachable.
    #[error("object not found: {0}")]
    NotFound(DataOid),

    /// Too many fragments are missing to reconstruct the payload.
    #[error("data unavailable for {oid}: {missing} fragments missing, {tolerated} tolerated")]
    Unavailable {
        oid: DataOid,
        missing: usize,
        tolerated: usize,
    },

    /// The payload read back does not hash to its OID.
    #[error("hash mismatch for {0}")]
    HashMismatch(DataOid),

    /// Writing would exceed the configured capacity.
    #[error("storage full: need {requested} bytes, {available} available")]
    StorageFull { requested: u64, available: u64 },

    /// Transient I/O failure from the backend. Safe to retry.
    #[error("I/O error: {0}")]
    Io(String),

    /// A fragment index outside the layout.
    #[error("fragment {index} out of range for layout of {total}")]
    FragmentOutOfRange { index: usize, total: usize },

    /// A refcount was decremented below zero.
    #[error("refcount underflow on {0}")]
    RefCountUnderflow(DataOid),

    /// The fragment layout is unusable.
    #[error("invalid fragment layout: {0}")]
    InvalidLayout(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
