//! The metadata chain: refcounted handles over shared data objects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use hc_crypto::ContentHasher;
use hc_store::{DataObject, DataObjectTable, StoreError};
use hc_types::{Attributes, Clock, DataOid, MetadataOid, ObjectId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{RefCountAudit, RefCountMismatch};
use crate::error::{MetaError, MetaResult};
use crate::event::{ChangeEvent, ChangeKind, ChangeListener};
use crate::object::{MetadataObject, Stored};

type Record = Arc<Mutex<MetadataObject>>;

/// Commit timestamps handed out by the chain.
#[derive(Debug, Default)]
struct CommitClock {
    last: u64,
    fenced: u64,
}

impl CommitClock {
    /// Next commit time: never earlier than the previous commit and always
    /// after the fence.
    fn next(&mut self, now: u64) -> u64 {
        self.last = now.max(self.last).max(self.fenced + 1);
        self.last
    }
}

/// Metadata objects and the refcounts they hold on data objects.
///
/// Lock order is metadata record, then data object. A newly created record
/// is locked before it becomes visible, so nothing can delete it until its
/// creation has been published. The record map lock is only ever held for
/// lookups and inserts, never while waiting on a record.
///
/// Commits are stamped and published under one commit lock, taken after
/// the record lock. Listeners therefore see events in timestamp order, and
/// once [`MetadataChain::fence`] returns `t` every commit stamped at or
/// before `t` has already been published.
pub struct MetadataChain {
    data: Arc<DataObjectTable>,
    records: RwLock<HashMap<MetadataOid, Record>>,
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
    commits: Mutex<CommitClock>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetadataChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataChain")
            .field("records", &self.len())
            .field("data", &self.data)
            .finish()
    }
}

impl MetadataChain {
    pub fn new(data: Arc<DataObjectTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            data,
            records: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            commits: Mutex::new(CommitClock::default()),
            clock,
        }
    }

    pub fn data(&self) -> &Arc<DataObjectTable> {
        &self.data
    }

    /// Register a listener for committed changes.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners
            .write()
            .expect("lock poisoned")
            .push(listener);
    }

    /// Close every commit time up to `now`. Commits that have not been
    /// stamped yet get a later time, so an index may treat everything at or
    /// before the returned time as published.
    pub fn fence(&self, now: u64) -> u64 {
        let mut commits = self.commits.lock().expect("lock poisoned");
        commits.fenced = commits.fenced.max(now);
        commits.fenced
    }

    // ---------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------

    /// Store a payload with its first metadata object.
    ///
    /// Either both the data reference and the metadata object exist
    /// afterwards, or neither does.
    pub fn store(&self, data: &[u8], attributes: Attributes) -> MetaResult<Stored> {
        let object = self.data.acquire(data)?;
        let md = MetadataObject {
            oid: Self::next_oid(&object.oid),
            data_oid: object.oid,
            attributes,
            deleted: false,
            created_at_ms: 0,
        };
        let stored = Stored {
            md_oid: md.oid,
            data_oid: object.oid,
            digest: object.digest,
            size: object.size,
        };
        self.insert_and_publish(md);
        debug!(md = %stored.md_oid, data = %stored.data_oid, size = stored.size, "stored");
        Ok(stored)
    }

    /// Create a new metadata object referencing the same data object as
    /// `oid`. The new object carries exactly `attributes`.
    pub fn add_metadata(
        &self,
        oid: &MetadataOid,
        attributes: Attributes,
    ) -> MetaResult<MetadataOid> {
        let record = self.record(oid)?;
        let source = record.lock().expect("lock poisoned");
        if source.deleted {
            return Err(MetaError::NoSuchObject(oid.object_id()));
        }

        let refs = self.data.add_ref(&source.data_oid)?;
        let md = MetadataObject {
            oid: Self::next_oid(&source.data_oid),
            data_oid: source.data_oid,
            attributes,
            deleted: false,
            created_at_ms: 0,
        };
        let new_oid = md.oid;
        self.insert_and_publish(md);
        debug!(source = %oid, md = %new_oid, refs, "metadata added");
        Ok(new_oid)
    }

    /// Delete one metadata object and release its data reference.
    pub fn delete(&self, oid: &MetadataOid) -> MetaResult<()> {
        let record = self.record(oid)?;
        let mut object = record.lock().expect("lock poisoned");
        if object.deleted {
            return Err(MetaError::NoSuchObject(oid.object_id()));
        }

        let release = self.data.release(&object.data_oid)?;
        object.deleted = true;
        self.commit(ChangeKind::Remove, &mut object);
        debug!(
            md = %oid,
            data = %object.data_oid,
            remaining = release.remaining,
            tombstoned = release.tombstoned,
            "deleted"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Payload bytes behind a live metadata object.
    pub fn retrieve(&self, oid: &MetadataOid) -> MetaResult<Vec<u8>> {
        let object = self.retrieve_metadata(oid)?;
        self.data
            .read(&object.data_oid)
            .map_err(|e| Self::read_error(e, oid.object_id()))
    }

    /// Payload bytes of a data object, bypassing metadata.
    pub fn retrieve_data(&self, oid: &DataOid) -> MetaResult<Vec<u8>> {
        self.data
            .read(oid)
            .map_err(|e| Self::read_error(e, oid.object_id()))
    }

    /// The metadata object itself, if live.
    pub fn retrieve_metadata(&self, oid: &MetadataOid) -> MetaResult<MetadataObject> {
        let record = self.record(oid)?;
        let object = record.lock().expect("lock poisoned").clone();
        if object.deleted {
            return Err(MetaError::NoSuchObject(oid.object_id()));
        }
        Ok(object)
    }

    /// Whether this chain has ever issued `oid` (live or deleted).
    pub fn contains(&self, oid: &MetadataOid) -> bool {
        self.records.read().expect("lock poisoned").contains_key(oid)
    }

    pub fn ref_count(&self, oid: &DataOid) -> Option<u32> {
        self.data.ref_count(oid)
    }

    pub fn data_object(&self, oid: &DataOid) -> Option<DataObject> {
        self.data.get(oid)
    }

    /// Live metadata objects referencing `oid`, sorted.
    pub fn references(&self, oid: &DataOid) -> Vec<MetadataOid> {
        self.snapshot()
            .into_iter()
            .filter(|md| md.is_live() && md.data_oid == *oid)
            .map(|md| md.oid)
            .collect()
    }

    /// Other live metadata objects sharing `oid`'s data object.
    pub fn siblings(&self, oid: &MetadataOid) -> MetaResult<Vec<MetadataOid>> {
        let object = self.retrieve_metadata(oid)?;
        Ok(self
            .references(&object.data_oid)
            .into_iter()
            .filter(|md| md != oid)
            .collect())
    }

    /// Every live metadata object, sorted by OID.
    pub fn live_objects(&self) -> Vec<MetadataObject> {
        self.snapshot()
            .into_iter()
            .filter(MetadataObject::is_live)
            .collect()
    }

    /// Total metadata records issued, deleted ones included.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare every stored refcount with the live metadata that backs it.
    pub fn audit(&self) -> RefCountAudit {
        let mut live: HashMap<DataOid, u32> = HashMap::new();
        for md in self.snapshot().into_iter().filter(MetadataObject::is_live) {
            *live.entry(md.data_oid).or_default() += 1;
        }

        let objects = self.data.all();
        let mut audit = RefCountAudit {
            checked: objects.len(),
            mismatches: Vec::new(),
        };
        for object in &objects {
            let stored = if object.deleted { 0 } else { object.ref_count };
            let live_references = live.remove(&object.oid).unwrap_or(0);
            if stored != live_references {
                audit.mismatches.push(RefCountMismatch {
                    data_oid: object.oid,
                    stored,
                    live_references,
                });
            }
        }
        // Live metadata pointing at a data object the table no longer has.
        for (data_oid, live_references) in live {
            audit.mismatches.push(RefCountMismatch {
                data_oid,
                stored: 0,
                live_references,
            });
        }
        audit.mismatches.sort_by_key(|m| m.data_oid);

        if !audit.is_clean() {
            warn!(mismatches = audit.mismatches.len(), "refcount audit failed");
        }
        audit
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn next_oid(data_oid: &DataOid) -> MetadataOid {
        ContentHasher::metadata_oid(Uuid::now_v7().as_bytes(), data_oid)
    }

    fn record(&self, oid: &MetadataOid) -> MetaResult<Record> {
        self.records
            .read()
            .expect("lock poisoned")
            .get(oid)
            .cloned()
            .ok_or(MetaError::NoSuchObject(oid.object_id()))
    }

    fn snapshot(&self) -> Vec<MetadataObject> {
        let records: Vec<Record> = self
            .records
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        let mut objects: Vec<MetadataObject> = records
            .iter()
            .map(|r| r.lock().expect("lock poisoned").clone())
            .collect();
        objects.sort_by_key(|md| md.oid);
        objects
    }

    fn insert_and_publish(&self, md: MetadataObject) {
        let oid = md.oid;
        let record = Arc::new(Mutex::new(md));
        let mut object = record.lock().expect("lock poisoned");
        self.records
            .write()
            .expect("lock poisoned")
            .insert(oid, Arc::clone(&record));
        self.commit(ChangeKind::Upsert, &mut object);
    }

    /// Stamp and publish one change. The caller holds the record lock.
    fn commit(&self, kind: ChangeKind, object: &mut MetadataObject) {
        let mut commits = self.commits.lock().expect("lock poisoned");
        let committed_at_ms = commits.next(self.clock.now_ms());
        if kind == ChangeKind::Upsert {
            object.created_at_ms = committed_at_ms;
        }
        self.publish(kind, object, committed_at_ms);
    }

    fn publish(&self, kind: ChangeKind, object: &MetadataObject, committed_at_ms: u64) {
        let listeners: Vec<Arc<dyn ChangeListener>> =
            self.listeners.read().expect("lock poisoned").clone();
        if listeners.is_empty() {
            return;
        }
        let event = ChangeEvent {
            kind,
            object: object.clone(),
            committed_at_ms,
        };
        for listener in &listeners {
            listener.on_change(&event);
        }
    }

    fn read_error(e: StoreError, oid: ObjectId) -> MetaError {
        match e {
            StoreError::NotFound(_) => MetaError::NoSuchObject(oid),
            StoreError::Unavailable { .. } | StoreError::HashMismatch(_) => {
                MetaError::DataUnavailable(oid)
            }
            other => MetaError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hc_store::{FragmentLayout, InMemoryBlobStore, ReclamationPolicy};
    use hc_types::{AttrValue, ManualClock};
    use proptest::prelude::*;

    fn chain_with(policy: ReclamationPolicy) -> (Arc<InMemoryBlobStore>, MetadataChain) {
        let blobs = Arc::new(InMemoryBlobStore::new(FragmentLayout::default()));
        let data = Arc::new(DataObjectTable::new(blobs.clone(), policy));
        let chain = MetadataChain::new(data, Arc::new(ManualClock::new(1_000)));
        (blobs, chain)
    }

    fn chain() -> MetadataChain {
        chain_with(ReclamationPolicy::Deferred).1
    }

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn assert_no_such_object<T: std::fmt::Debug>(result: MetaResult<T>) {
        assert!(
            matches!(result, Err(MetaError::NoSuchObject(_))),
            "expected NoSuchObject, got {result:?}"
        );
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ChangeEvent>>,
    }

    impl ChangeListener for Recorder {
        fn on_change(&self, event: &ChangeEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Store / retrieve
    // -----------------------------------------------------------------------

    #[test]
    fn store_then_retrieve_matches_digest() {
        let chain = chain();
        let stored = chain.store(b"round trip", Attributes::new()).unwrap();
        let bytes = chain.retrieve(&stored.md_oid).unwrap();
        assert!(stored.digest.matches(&bytes));
        assert_eq!(stored.size, 10);
        assert_eq!(chain.ref_count(&stored.data_oid), Some(1));
    }

    #[test]
    fn store_keeps_attributes() {
        let chain = chain();
        let stored = chain
            .store(b"x", attrs(&[("owner", "qa".into()), ("rank", 3i64.into())]))
            .unwrap();
        let md = chain.retrieve_metadata(&stored.md_oid).unwrap();
        assert_eq!(md.attributes.get("owner"), Some(&AttrValue::from("qa")));
        assert_eq!(md.data_oid, stored.data_oid);
        assert_eq!(md.created_at_ms, 1_000);
    }

    #[test]
    fn storing_identical_bytes_shares_data_object() {
        let chain = chain();
        let a = chain.store(b"twin", Attributes::new()).unwrap();
        let b = chain.store(b"twin", Attributes::new()).unwrap();
        assert_ne!(a.md_oid, b.md_oid);
        assert_eq!(a.data_oid, b.data_oid);
        assert_eq!(chain.ref_count(&a.data_oid), Some(2));
        chain.delete(&a.md_oid).unwrap();
        assert_eq!(chain.retrieve(&b.md_oid).unwrap(), b"twin");
    }

    #[test]
    fn failed_store_creates_nothing() {
        let blobs = Arc::new(InMemoryBlobStore::with_capacity(FragmentLayout::default(), 0));
        let data = Arc::new(DataObjectTable::new(blobs, ReclamationPolicy::Deferred));
        let chain = MetadataChain::new(data, Arc::new(ManualClock::default()));
        let err = chain.store(b"no room", Attributes::new()).unwrap_err();
        assert!(matches!(err, MetaError::Store(StoreError::StorageFull { .. })));
        assert!(chain.is_empty());
        assert!(chain.audit().is_clean());
    }

    #[test]
    fn retrieve_unknown_oid() {
        let chain = chain();
        let oid = MetadataOid::new(ObjectId::from_bytes(b"never issued"));
        assert_no_such_object(chain.retrieve(&oid));
    }

    // -----------------------------------------------------------------------
    // addMetadata
    // -----------------------------------------------------------------------

    #[test]
    fn add_metadata_increments_refcount_once() {
        let chain = chain();
        let m1 = chain.store(b"data", Attributes::new()).unwrap();
        let m2 = chain
            .add_metadata(&m1.md_oid, attrs(&[("tag", "second".into())]))
            .unwrap();
        assert_eq!(chain.ref_count(&m1.data_oid), Some(2));

        let md2 = chain.retrieve_metadata(&m2).unwrap();
        assert_eq!(md2.data_oid, m1.data_oid);
        assert_eq!(md2.attributes.len(), 1);
        assert_eq!(chain.references(&m1.data_oid).len(), 2);
        assert_eq!(chain.siblings(&m1.md_oid).unwrap(), vec![m2]);
        assert_eq!(chain.siblings(&m2).unwrap(), vec![m1.md_oid]);
    }

    #[test]
    fn add_metadata_does_not_inherit_attributes() {
        let chain = chain();
        let m1 = chain
            .store(b"data", attrs(&[("first", 1i64.into())]))
            .unwrap();
        let m2 = chain.add_metadata(&m1.md_oid, Attributes::new()).unwrap();
        assert!(chain.retrieve_metadata(&m2).unwrap().attributes.is_empty());
    }

    #[test]
    fn add_metadata_on_deleted_object_fails() {
        let chain = chain();
        let m1 = chain.store(b"data", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        assert_no_such_object(chain.add_metadata(&m1.md_oid, Attributes::new()));
        assert!(chain.audit().is_clean());
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    #[test]
    fn double_delete_fails() {
        let chain = chain();
        let m1 = chain.store(b"once", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        assert_no_such_object(chain.delete(&m1.md_oid));
    }

    #[test]
    fn delete_error_does_not_reveal_deleted_status() {
        let chain = chain();
        let m1 = chain.store(b"secret", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();

        let deleted = chain.delete(&m1.md_oid).unwrap_err().to_string();
        let unknown_oid = MetadataOid::new(ObjectId::from_bytes(b"unknown"));
        let unknown = chain.delete(&unknown_oid).unwrap_err().to_string();

        for message in [&deleted, &unknown] {
            let lower = message.to_lowercase();
            assert!(!lower.contains("deleted"), "{message}");
            assert!(!lower.contains("ref"), "{message}");
            assert!(lower.starts_with("no such object"), "{message}");
        }
        assert_eq!(
            deleted.replace(&m1.md_oid.to_hex(), "<oid>"),
            unknown.replace(&unknown_oid.to_hex(), "<oid>")
        );
    }

    #[test]
    fn delete_then_retrieve_fails() {
        let chain = chain();
        let m1 = chain.store(b"short lived", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        assert_no_such_object(chain.retrieve(&m1.md_oid));
        assert_no_such_object(chain.retrieve_metadata(&m1.md_oid));
        assert_no_such_object(chain.retrieve_data(&m1.data_oid));
        assert!(chain.contains(&m1.md_oid));
    }

    #[test]
    fn three_way_chain_deletion() {
        // store m1; m2, m3 from m1; delete m1, m2; m3 survives; delete m3.
        let chain = chain();
        let m1 = chain.store(b"shared data", Attributes::new()).unwrap();
        let d = m1.data_oid;
        let m2 = chain.add_metadata(&m1.md_oid, Attributes::new()).unwrap();
        let m3 = chain.add_metadata(&m1.md_oid, Attributes::new()).unwrap();
        assert_eq!(chain.ref_count(&d), Some(3));

        chain.delete(&m1.md_oid).unwrap();
        chain.delete(&m2).unwrap();
        assert_eq!(chain.retrieve(&m3).unwrap(), b"shared data");
        assert_eq!(chain.ref_count(&d), Some(1));

        chain.delete(&m3).unwrap();
        assert_no_such_object(chain.retrieve(&m3));
        assert_no_such_object(chain.retrieve_data(&d));
        assert!(chain.audit().is_clean());
    }

    #[test]
    fn long_chain_of_ten() {
        let chain = chain();
        let m1 = chain.store(b"long chain", Attributes::new()).unwrap();
        let d = m1.data_oid;
        let mut mds = vec![m1.md_oid];
        // Each link is added from the previous one, and the previous one is
        // deleted as soon as its successor exists.
        for _ in 1..10 {
            let prev = *mds.last().unwrap();
            let next = chain.add_metadata(&prev, Attributes::new()).unwrap();
            chain.delete(&prev).unwrap();
            assert_no_such_object(chain.retrieve(&prev));
            assert_eq!(chain.ref_count(&d), Some(1));
            mds.push(next);
        }
        let m10 = mds[9];
        for md in &mds[..9] {
            assert_no_such_object(chain.retrieve(md));
        }
        assert_eq!(chain.retrieve(&m10).unwrap(), b"long chain");

        chain.delete(&m10).unwrap();
        assert_no_such_object(chain.retrieve_data(&d));
        assert!(chain.audit().is_clean());
    }

    #[test]
    fn immediate_reclamation_removes_bytes() {
        let (blobs, chain) = chain_with(ReclamationPolicy::Immediate);
        let m1 = chain.store(b"transient", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        assert!(blobs.is_empty());
        assert!(chain.data_object(&m1.data_oid).is_none());
    }

    #[test]
    fn deferred_reclamation_waits_for_gc() {
        let (blobs, chain) = chain_with(ReclamationPolicy::Deferred);
        let m1 = chain.store(b"lingering", Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        assert_eq!(blobs.len(), 1);
        assert_no_such_object(chain.retrieve_data(&m1.data_oid));
        assert!(chain.data_object(&m1.data_oid).unwrap().deleted);

        chain.data().collect_garbage().unwrap();
        assert!(blobs.is_empty());
    }

    // -----------------------------------------------------------------------
    // Data availability
    // -----------------------------------------------------------------------

    #[test]
    fn lost_fragments_report_data_unavailable() {
        let (blobs, chain) = chain_with(ReclamationPolicy::Deferred);
        let m1 = chain.store(b"fragile", Attributes::new()).unwrap();
        for i in 0..3 {
            blobs.lose_fragment(&m1.data_oid, i).unwrap();
        }
        assert!(matches!(
            chain.retrieve(&m1.md_oid),
            Err(MetaError::DataUnavailable(_))
        ));
        // Metadata is still there; only the payload is gone.
        assert!(chain.retrieve_metadata(&m1.md_oid).is_ok());
    }

    #[test]
    fn transient_read_failure_is_retryable() {
        let (blobs, chain) = chain_with(ReclamationPolicy::Deferred);
        let m1 = chain.store(b"flaky", Attributes::new()).unwrap();
        blobs.faults().fail_next_reads(1);
        let err = chain.retrieve(&m1.md_oid).unwrap_err();
        assert!(err.is_transient());
        assert!(chain.retrieve(&m1.md_oid).is_ok());
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    #[test]
    fn listeners_see_commits_in_order() {
        let chain = chain();
        let recorder = Arc::new(Recorder::default());
        chain.subscribe(recorder.clone());

        let m1 = chain.store(b"observed", Attributes::new()).unwrap();
        let m2 = chain.add_metadata(&m1.md_oid, Attributes::new()).unwrap();
        chain.delete(&m1.md_oid).unwrap();
        let _ = chain.delete(&m1.md_oid);

        let events = recorder.events.lock().unwrap();
        let seen: Vec<(ChangeKind, MetadataOid)> =
            events.iter().map(|e| (e.kind, e.object.oid)).collect();
        assert_eq!(
            seen,
            vec![
                (ChangeKind::Upsert, m1.md_oid),
                (ChangeKind::Upsert, m2),
                (ChangeKind::Remove, m1.md_oid),
            ]
        );
        assert!(events[2].object.deleted);
    }

    #[test]
    fn commits_after_fence_are_stamped_later() {
        let blobs = Arc::new(InMemoryBlobStore::new(FragmentLayout::default()));
        let data = Arc::new(DataObjectTable::new(blobs, ReclamationPolicy::Deferred));
        let clock = Arc::new(ManualClock::new(500));
        let chain = MetadataChain::new(data, clock.clone());
        let recorder = Arc::new(Recorder::default());
        chain.subscribe(recorder.clone());

        let before = chain.store(b"before", Attributes::new()).unwrap();
        assert_eq!(chain.fence(500), 500);
        let after = chain.store(b"after", Attributes::new()).unwrap();
        chain.delete(&before.md_oid).unwrap();

        assert_eq!(chain.retrieve_metadata(&after.md_oid).unwrap().created_at_ms, 501);
        let stamps: Vec<u64> = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.committed_at_ms)
            .collect();
        assert_eq!(stamps, vec![500, 501, 501]);

        // A fence never moves backwards.
        assert_eq!(chain.fence(10), 500);
        clock.advance(100);
        let later = chain.store(b"later", Attributes::new()).unwrap();
        assert_eq!(chain.retrieve_metadata(&later.md_oid).unwrap().created_at_ms, 600);
    }

    #[test]
    fn concurrent_commits_publish_in_timestamp_order() {
        use std::thread;

        let chain = Arc::new(chain());
        let recorder = Arc::new(Recorder::default());
        chain.subscribe(recorder.clone());

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || {
                    for i in 0..50u8 {
                        chain.store(&[t, i], Attributes::new()).unwrap();
                        if i % 10 == 0 {
                            chain.fence(1_000 + u64::from(i));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 200);
        assert!(events
            .windows(2)
            .all(|w| w[0].committed_at_ms <= w[1].committed_at_ms));
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_add_metadata_loses_no_increments() {
        use std::thread;

        let chain = Arc::new(chain());
        let m1 = chain.store(b"hot object", Attributes::new()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let chain = Arc::clone(&chain);
                let src = m1.md_oid;
                thread::spawn(move || {
                    for _ in 0..50 {
                        chain.add_metadata(&src, Attributes::new()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }

        assert_eq!(chain.ref_count(&m1.data_oid), Some(401));
        assert!(chain.audit().is_clean());
    }

    #[test]
    fn delete_races_add_metadata_consistently() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..50 {
            let chain = Arc::new(chain());
            let m1 = chain.store(b"contested", Attributes::new()).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let adder = {
                let chain = Arc::clone(&chain);
                let barrier = Arc::clone(&barrier);
                let oid = m1.md_oid;
                thread::spawn(move || {
                    barrier.wait();
                    chain.add_metadata(&oid, Attributes::new())
                })
            };
            let deleter = {
                let chain = Arc::clone(&chain);
                let barrier = Arc::clone(&barrier);
                let oid = m1.md_oid;
                thread::spawn(move || {
                    barrier.wait();
                    chain.delete(&oid)
                })
            };

            let added = adder.join().unwrap();
            deleter.join().unwrap().expect("delete always wins or goes second");

            match added {
                Ok(m2) => {
                    assert_eq!(chain.retrieve(&m2).unwrap(), b"contested");
                    assert_eq!(chain.ref_count(&m1.data_oid), Some(1));
                }
                Err(MetaError::NoSuchObject(_)) => {
                    assert_no_such_object(chain.retrieve_data(&m1.data_oid));
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
            assert!(chain.audit().is_clean());
        }
    }

    #[test]
    fn concurrent_deletes_of_one_object_have_one_winner() {
        use std::thread;

        let chain = Arc::new(chain());
        let m1 = chain.store(b"target", Attributes::new()).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let chain = Arc::clone(&chain);
                let oid = m1.md_oid;
                thread::spawn(move || chain.delete(&oid).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(chain.audit().is_clean());
    }

    // -----------------------------------------------------------------------
    // Refcount invariant over arbitrary histories
    // -----------------------------------------------------------------------

    #[derive(Clone, Debug)]
    enum Op {
        Store(u8),
        Add(usize),
        Delete(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Store),
            any::<usize>().prop_map(Op::Add),
            any::<usize>().prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn refcount_matches_live_references(ops in prop::collection::vec(op(), 1..64)) {
            let chain = chain();
            let mut issued: Vec<MetadataOid> = Vec::new();
            for op in ops {
                match op {
                    Op::Store(p) => {
                        issued.push(chain.store(&[p; 8], Attributes::new()).unwrap().md_oid);
                    }
                    Op::Add(i) if !issued.is_empty() => {
                        let src = issued[i % issued.len()];
                        if let Ok(md) = chain.add_metadata(&src, Attributes::new()) {
                            issued.push(md);
                        }
                    }
                    Op::Delete(i) if !issued.is_empty() => {
                        let _ = chain.delete(&issued[i % issued.len()]);
                    }
                    _ => {}
                }
            }

            let audit = chain.audit();
            prop_assert!(audit.is_clean(), "{:?}", audit);
            for md in chain.live_objects() {
                prop_assert!(chain.retrieve(&md.oid).is_ok());
                let refs = chain.references(&md.data_oid).len() as u32;
                prop_assert_eq!(chain.ref_count(&md.data_oid), Some(refs));
            }
        }
    }
}
