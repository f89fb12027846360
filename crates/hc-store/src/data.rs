use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use hc_crypto::{ContentHasher, Digest};
use hc_types::DataOid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// When the bytes of an unreferenced data object are physically removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclamationPolicy {
    /// Bytes are removed by the same release that drops the refcount to 0.
    Immediate,
    /// The object is tombstoned; bytes stay until
    /// [`DataObjectTable::collect_garbage`] runs.
    #[default]
    Deferred,
}

/// A refcounted data object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub oid: DataOid,
    pub size: u64,
    pub digest: Digest,
    /// Number of live metadata objects referencing this object.
    pub ref_count: u32,
    /// Tombstone: set when `ref_count` reaches zero.
    pub deleted: bool,
    /// Set once bytes are gone and the record left the table. A holder of a
    /// stale handle that observes this must look the OID up again.
    #[serde(skip)]
    reclaimed: bool,
}

impl DataObject {
    fn placeholder(oid: DataOid, data: &[u8]) -> Self {
        Self {
            oid,
            size: data.len() as u64,
            digest: Digest::of(data),
            ref_count: 0,
            deleted: true,
            reclaimed: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Outcome of releasing one reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Release {
    pub remaining: u32,
    /// The object was tombstoned by this release.
    pub tombstoned: bool,
    /// The bytes were removed by this release.
    pub reclaimed: bool,
}

/// Result of a garbage collection pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub reclaimed: usize,
    pub reclaimed_bytes: u64,
    pub live: usize,
}

type Handle = Arc<Mutex<DataObject>>;

/// Refcounted data-object records over a [`BlobStore`].
///
/// Each record sits behind its own mutex, so refcount updates on one object
/// serialize without blocking other objects. The table map lock is never
/// held while waiting on a record mutex.
pub struct DataObjectTable {
    blobs: Arc<dyn BlobStore>,
    objects: RwLock<HashMap<DataOid, Handle>>,
    policy: ReclamationPolicy,
}

impl DataObjectTable {
    pub fn new(blobs: Arc<dyn BlobStore>, policy: ReclamationPolicy) -> Self {
        Self {
            blobs,
            objects: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ReclamationPolicy {
        self.policy
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Write `data` and take one reference on its data object.
    ///
    /// Creates the object on first sight, adds a reference when it is live,
    /// and revives it when it is tombstoned but not yet reclaimed. Nothing
    /// changes if the blob write fails.
    pub fn acquire(&self, data: &[u8]) -> StoreResult<DataObject> {
        let oid = ContentHasher::data_oid(data);
        loop {
            let (handle, created) = self.handle_or_insert(oid, data);
            let mut object = handle.lock().expect("lock poisoned");
            if object.reclaimed {
                continue;
            }

            if let Err(e) = self.blobs.write(data) {
                if created && object.ref_count == 0 {
                    object.reclaimed = true;
                    self.objects.write().expect("lock poisoned").remove(&oid);
                }
                return Err(e);
            }

            if object.deleted {
                object.deleted = false;
                object.ref_count = 1;
                debug!(%oid, revived = !created, "data object live");
            } else {
                object.ref_count += 1;
                debug!(%oid, refs = object.ref_count, "data object shared");
            }
            return Ok(object.clone());
        }
    }

    /// Add one reference to a live data object.
    pub fn add_ref(&self, oid: &DataOid) -> StoreResult<u32> {
        let handle = self.handle(oid).ok_or(StoreError::NotFound(*oid))?;
        let mut object = handle.lock().expect("lock poisoned");
        if object.deleted || object.reclaimed {
            return Err(StoreError::NotFound(*oid));
        }
        object.ref_count += 1;
        Ok(object.ref_count)
    }

    /// Drop one reference. At zero the object is tombstoned and, under
    /// [`ReclamationPolicy::Immediate`], its bytes are removed.
    pub fn release(&self, oid: &DataOid) -> StoreResult<Release> {
        let handle = self.handle(oid).ok_or(StoreError::NotFound(*oid))?;
        let mut object = handle.lock().expect("lock poisoned");
        if object.deleted || object.reclaimed || object.ref_count == 0 {
            return Err(StoreError::RefCountUnderflow(*oid));
        }
        object.ref_count -= 1;
        let mut release = Release {
            remaining: object.ref_count,
            tombstoned: false,
            reclaimed: false,
        };
        if object.ref_count == 0 {
            object.deleted = true;
            release.tombstoned = true;
            if self.policy == ReclamationPolicy::Immediate {
                match self.reclaim(&mut object) {
                    Ok(()) => release.reclaimed = true,
                    Err(e) => warn!(%oid, error = %e, "reclaim failed, left for gc"),
                }
            }
            debug!(%oid, reclaimed = release.reclaimed, "data object tombstoned");
        }
        Ok(release)
    }

    /// Read the bytes of a live data object.
    pub fn read(&self, oid: &DataOid) -> StoreResult<Vec<u8>> {
        let live = self
            .get(oid)
            .map(|object| object.is_live())
            .unwrap_or(false);
        if !live {
            return Err(StoreError::NotFound(*oid));
        }
        let data = self.blobs.read(oid)?.ok_or(StoreError::NotFound(*oid))?;
        if !ContentHasher::verify_data(&data, oid) {
            return Err(StoreError::HashMismatch(*oid));
        }
        Ok(data)
    }

    /// Snapshot of one record, tombstoned or not.
    pub fn get(&self, oid: &DataOid) -> Option<DataObject> {
        let handle = self.handle(oid)?;
        let object = handle.lock().expect("lock poisoned");
        Some(object.clone())
    }

    pub fn ref_count(&self, oid: &DataOid) -> Option<u32> {
        self.get(oid).map(|object| object.ref_count)
    }

    /// Snapshot of every record, sorted by OID.
    pub fn all(&self) -> Vec<DataObject> {
        let handles: Vec<Handle> = self
            .objects
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut objects: Vec<DataObject> = handles
            .iter()
            .map(|h| h.lock().expect("lock poisoned").clone())
            .filter(|o| !o.reclaimed)
            .collect();
        objects.sort_by_key(|o| o.oid);
        objects
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physically remove every tombstoned object.
    pub fn collect_garbage(&self) -> StoreResult<GcReport> {
        let handles: Vec<Handle> = self
            .objects
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut report = GcReport::default();
        for handle in handles {
            let mut object = handle.lock().expect("lock poisoned");
            if object.reclaimed {
                continue;
            }
            if object.deleted {
                self.reclaim(&mut object)?;
                report.reclaimed += 1;
                report.reclaimed_bytes += object.size;
            } else {
                report.live += 1;
            }
        }
        info!(
            reclaimed = report.reclaimed,
            bytes = report.reclaimed_bytes,
            live = report.live,
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Remove bytes and record. Caller holds the record's mutex.
    fn reclaim(&self, object: &mut DataObject) -> StoreResult<()> {
        self.blobs.delete(&object.oid)?;
        object.reclaimed = true;
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(&object.oid);
        Ok(())
    }

    fn handle(&self, oid: &DataOid) -> Option<Handle> {
        self.objects.read().expect("lock poisoned").get(oid).cloned()
    }

    fn handle_or_insert(&self, oid: DataOid, data: &[u8]) -> (Handle, bool) {
        if let Some(handle) = self.handle(&oid) {
            return (handle, false);
        }
        let mut objects = self.objects.write().expect("lock poisoned");
        if let Some(handle) = objects.get(&oid) {
            return (Arc::clone(handle), false);
        }
        let handle = Arc::new(Mutex::new(DataObject::placeholder(oid, data)));
        objects.insert(oid, Arc::clone(&handle));
        (handle, true)
    }
}

impl std::fmt::Debug for DataObjectTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataObjectTable")
            .field("object_count", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}
