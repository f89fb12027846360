use std::collections::HashMap;
use std::sync::RwLock;

use hc_crypto::ContentHasher;
use hc_types::DataOid;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::fault::FaultInjector;
use crate::layout::{FragmentHealth, FragmentLayout, FragmentState};
use crate::traits::BlobStore;

struct BlobEntry {
    data: Vec<u8>,
    fragments: Vec<FragmentState>,
}

#[derive(Default)]
struct Inner {
    blobs: HashMap<DataOid, BlobEntry>,
    used: u64,
    capacity: Option<u64>,
}

/// In-memory, `HashMap`-based blob store.
///
/// Intended for tests and the simulator. Every blob carries a fragment
/// health vector sized by its [`FragmentLayout`]; fragments can be lost,
/// corrupted and repaired to model node and disk faults.
pub struct InMemoryBlobStore {
    inner: RwLock<Inner>,
    layout: FragmentLayout,
    faults: FaultInjector,
}

impl InMemoryBlobStore {
    /// Create an unbounded store with the given layout.
    pub fn new(layout: FragmentLayout) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            layout,
            faults: FaultInjector::new(),
        }
    }

    /// Create a store that refuses writes beyond `capacity` bytes
    /// (fragment overhead included).
    pub fn with_capacity(layout: FragmentLayout, capacity: u64) -> Self {
        let store = Self::new(layout);
        store.set_capacity(Some(capacity));
        store
    }

    pub fn layout(&self) -> FragmentLayout {
        self.layout
    }

    pub fn set_capacity(&self, capacity: Option<u64>) {
        self.inner.write().expect("lock poisoned").capacity = capacity;
    }

    pub fn capacity(&self) -> Option<u64> {
        self.inner.read().expect("lock poisoned").capacity
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragment_health(&self, oid: &DataOid) -> Option<FragmentHealth> {
        let inner = self.inner.read().expect("lock poisoned");
        inner.blobs.get(oid).map(|entry| self.health_of(entry))
    }

    /// Mark one fragment of a blob as lost.
    pub fn lose_fragment(&self, oid: &DataOid, index: usize) -> StoreResult<()> {
        self.damage(oid, index, FragmentState::Lost)
    }

    /// Mark one fragment of a blob as corrupt.
    pub fn corrupt_fragment(&self, oid: &DataOid, index: usize) -> StoreResult<()> {
        self.damage(oid, index, FragmentState::Corrupt)
    }

    /// Restore every fragment of a blob. Returns how many were repaired.
    ///
    /// Repair needs a reconstructable blob; past the parity budget the data
    /// is gone and this fails with `Unavailable`.
    pub fn repair(&self, oid: &DataOid) -> StoreResult<usize> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let entry = inner
            .blobs
            .get_mut(oid)
            .ok_or(StoreError::NotFound(*oid))?;
        let health = self.health_of(entry);
        if !health.is_recoverable() {
            return Err(StoreError::Unavailable {
                oid: *oid,
                missing: health.unhealthy(),
                tolerated: health.tolerated,
            });
        }
        let repaired = health.unhealthy();
        entry.fragments.fill(FragmentState::Healthy);
        debug!(%oid, repaired, "fragments repaired");
        Ok(repaired)
    }

    fn damage(&self, oid: &DataOid, index: usize, state: FragmentState) -> StoreResult<()> {
        let total = self.layout.total();
        if index >= total {
            return Err(StoreError::FragmentOutOfRange { index, total });
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        let entry = inner
            .blobs
            .get_mut(oid)
            .ok_or(StoreError::NotFound(*oid))?;
        entry.fragments[index] = state;
        warn!(%oid, index, ?state, "fragment damaged");
        Ok(())
    }

    fn health_of(&self, entry: &BlobEntry) -> FragmentHealth {
        FragmentHealth {
            fragments: entry.fragments.clone(),
            tolerated: self.layout.parity_fragments,
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new(FragmentLayout::default())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, oid: &DataOid) -> StoreResult<Option<Vec<u8>>> {
        if self.faults.take_read_fault() {
            return Err(StoreError::Io(format!("injected read failure for {oid}")));
        }
        let inner = self.inner.read().expect("lock poisoned");
        let Some(entry) = inner.blobs.get(oid) else {
            return Ok(None);
        };
        let health = self.health_of(entry);
        if !health.is_recoverable() {
            return Err(StoreError::Unavailable {
                oid: *oid,
                missing: health.unhealthy(),
                tolerated: health.tolerated,
            });
        }
        Ok(Some(entry.data.clone()))
    }

    fn write(&self, data: &[u8]) -> StoreResult<DataOid> {
        let oid = ContentHasher::data_oid(data);
        if self.faults.take_write_fault() {
            return Err(StoreError::Io(format!("injected write failure for {oid}")));
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        if let Some(entry) = inner.blobs.get_mut(&oid) {
            entry.fragments.fill(FragmentState::Healthy);
            return Ok(oid);
        }

        let footprint = self.layout.footprint(data.len() as u64);
        if let Some(capacity) = inner.capacity {
            let available = capacity.saturating_sub(inner.used);
            if footprint > available {
                return Err(StoreError::StorageFull {
                    requested: footprint,
                    available,
                });
            }
        }

        inner.blobs.insert(
            oid,
            BlobEntry {
                data: data.to_vec(),
                fragments: vec![FragmentState::Healthy; self.layout.total()],
            },
        );
        inner.used += footprint;
        debug!(%oid, size = data.len(), footprint, "blob written");
        Ok(oid)
    }

    fn exists(&self, oid: &DataOid) -> StoreResult<bool> {
        Ok(self.inner.read().expect("lock poisoned").blobs.contains_key(oid))
    }

    fn delete(&self, oid: &DataOid) -> StoreResult<bool> {
        let mut inner = self.inner.write().expect("lock poisoned");
        match inner.blobs.remove(oid) {
            Some(entry) => {
                let footprint = self.layout.footprint(entry.data.len() as u64);
                inner.used = inner.used.saturating_sub(footprint);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn used_bytes(&self) -> u64 {
        self.inner.read().expect("lock poisoned").used
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryBlobStore {
        InMemoryBlobStore::new(FragmentLayout::new(5, 2))
    }

    // -----------------------------------------------------------------------
    // Core read/write
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read() {
        let store = store();
        let oid = store.write(b"hello world").unwrap();
        assert_eq!(store.read(&oid).unwrap().unwrap(), b"hello world");
        assert!(store.exists(&oid).unwrap());
    }

    #[test]
    fn identical_content_is_deduplicated() {
        let store = store();
        let a = store.write(b"same").unwrap();
        let b = store.write(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.used_bytes(), FragmentLayout::new(5, 2).footprint(4));
    }

    #[test]
    fn read_missing_is_none() {
        let store = store();
        let oid = ContentHasher::data_oid(b"never written");
        assert!(store.read(&oid).unwrap().is_none());
    }

    #[test]
    fn delete_releases_space() {
        let store = store();
        let oid = store.write(b"0123456789").unwrap();
        assert!(store.used_bytes() > 0);
        assert!(store.delete(&oid).unwrap());
        assert!(!store.delete(&oid).unwrap());
        assert_eq!(store.used_bytes(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn read_batch_mixes_hits_and_misses() {
        let store = store();
        let hit = store.write(b"present").unwrap();
        let miss = ContentHasher::data_oid(b"absent");
        let results = store.read_batch(&[hit, miss]).unwrap();
        assert!(results[0].is_some());
        assert!(results[1].is_none());
    }

    // -----------------------------------------------------------------------
    // Capacity
    // -----------------------------------------------------------------------

    #[test]
    fn capacity_is_enforced() {
        // 10 bytes at 5+2 -> 2 bytes/fragment * 7 = 14 bytes.
        let store = InMemoryBlobStore::with_capacity(FragmentLayout::new(5, 2), 20);
        store.write(b"0123456789").unwrap();
        let err = store.write(b"abcdefghij").unwrap_err();
        assert!(matches!(
            err,
            StoreError::StorageFull {
                requested: 14,
                available: 6
            }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rewriting_existing_blob_needs_no_space() {
        let store = InMemoryBlobStore::with_capacity(FragmentLayout::new(5, 2), 14);
        store.write(b"0123456789").unwrap();
        assert!(store.write(b"0123456789").is_ok());
    }

    // -----------------------------------------------------------------------
    // Fragments
    // -----------------------------------------------------------------------

    #[test]
    fn tolerates_parity_worth_of_damage() {
        let store = store();
        let oid = store.write(b"fragile").unwrap();
        store.lose_fragment(&oid, 0).unwrap();
        store.corrupt_fragment(&oid, 6).unwrap();
        assert!(store.read(&oid).unwrap().is_some());

        store.lose_fragment(&oid, 3).unwrap();
        let err = store.read(&oid).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Unavailable {
                missing: 3,
                tolerated: 2,
                ..
            }
        ));
    }

    #[test]
    fn repair_restores_fragments() {
        let store = store();
        let oid = store.write(b"repairable").unwrap();
        store.lose_fragment(&oid, 1).unwrap();
        store.lose_fragment(&oid, 2).unwrap();
        assert_eq!(store.repair(&oid).unwrap(), 2);
        assert_eq!(store.fragment_health(&oid).unwrap().unhealthy(), 0);
    }

    #[test]
    fn repair_fails_past_parity() {
        let store = store();
        let oid = store.write(b"lost cause").unwrap();
        for i in 0..3 {
            store.lose_fragment(&oid, i).unwrap();
        }
        assert!(matches!(store.repair(&oid), Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn rewrite_heals_fragments() {
        let store = store();
        let oid = store.write(b"heal me").unwrap();
        for i in 0..3 {
            store.lose_fragment(&oid, i).unwrap();
        }
        store.write(b"heal me").unwrap();
        assert!(store.read(&oid).unwrap().is_some());
    }

    #[test]
    fn fragment_index_out_of_range() {
        let store = store();
        let oid = store.write(b"x").unwrap();
        assert!(matches!(
            store.lose_fragment(&oid, 7),
            Err(StoreError::FragmentOutOfRange { index: 7, total: 7 })
        ));
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    #[test]
    fn injected_write_fault_is_transient() {
        let store = store();
        store.faults().fail_next_writes(1);
        let err = store.write(b"retry me").unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_empty());
        assert!(store.write(b"retry me").is_ok());
    }

    #[test]
    fn injected_read_fault() {
        let store = store();
        let oid = store.write(b"data").unwrap();
        store.faults().fail_next_reads(1);
        assert!(matches!(store.read(&oid), Err(StoreError::Io(_))));
        assert!(store.read(&oid).unwrap().is_some());
    }

    #[test]
    fn debug_format() {
        let store = store();
        store.write(b"x").unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryBlobStore"));
        assert!(debug.contains("blob_count"));
    }
}
