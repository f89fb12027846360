use hc_types::DataOid;

use crate::error::StoreResult;

/// Content-addressed blob storage.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written; the same bytes always map to the
///   same [`DataOid`].
/// - Writes are idempotent. Rewriting an existing blob leaves its contents
///   unchanged and refreshes its fragments.
/// - The store never interprets blob contents and keeps no refcounts; that
///   is the job of [`DataObjectTable`](crate::DataObjectTable).
/// - I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Read a blob by OID.
    ///
    /// Returns `Ok(None)` if the blob does not exist and
    /// [`StoreError::Unavailable`](crate::StoreError::Unavailable) if too
    /// many of its fragments are damaged.
    fn read(&self, oid: &DataOid) -> StoreResult<Option<Vec<u8>>>;

    /// Write a blob and return its content-addressed OID.
    fn write(&self, data: &[u8]) -> StoreResult<DataOid>;

    fn exists(&self, oid: &DataOid) -> StoreResult<bool>;

    /// Physically remove a blob. Returns `true` if it existed.
    ///
    /// Only reclamation calls this; removing a referenced blob loses data.
    fn delete(&self, oid: &DataOid) -> StoreResult<bool>;

    /// Bytes currently occupied, fragment overhead included.
    fn used_bytes(&self) -> u64;

    /// Read several blobs. Backends may override to batch I/O.
    fn read_batch(&self, oids: &[DataOid]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        oids.iter().map(|oid| self.read(oid)).collect()
    }
}
