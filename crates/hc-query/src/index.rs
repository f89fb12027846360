//! Sharded, eventually consistent index over live metadata objects.
//!
//! Changes published by a [`MetadataChain`] are queued per shard and only
//! become visible when [`QueryIndex::run_cycle`] applies them. Each shard
//! keeps a query integrity time (QIT): every live object committed at or
//! before it is visible to queries.
//!
//! ```text
//! Unestablished(0) --repopulate--> Advancing <--set_static--> Static
//!        ^                              |                        |
//!        +---------- wipe / reboot -----+------------------------+
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hc_meta::{ChangeEvent, ChangeKind, ChangeListener, MetadataChain, MetadataObject};
use hc_types::{Attributes, DataOid, MetadataOid, QueryIntegrityTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cursor::{QueryCursor, QueryRow};
use crate::error::QueryResult;
use crate::predicate::Predicate;
use crate::schema::Schema;

/// Default number of shards per index.
pub const DEFAULT_SHARDS: usize = 4;

/// Where the index takes its full snapshot from during repopulation.
pub trait MetadataSource: Send + Sync {
    fn live_objects(&self) -> Vec<MetadataObject>;

    /// Latest time at or before which every commit has been published.
    /// Sources that publish synchronously can return `now` unchanged.
    fn fence(&self, now: u64) -> u64 {
        now
    }
}

impl MetadataSource for MetadataChain {
    fn live_objects(&self) -> Vec<MetadataObject> {
        MetadataChain::live_objects(self)
    }

    fn fence(&self, now: u64) -> u64 {
        MetadataChain::fence(self, now)
    }
}

/// Watermark state of a shard (or, aggregated, of the whole index).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkState {
    /// QIT is 0. Events still apply but the watermark does not move.
    Unestablished,
    /// QIT follows the indexing cycles.
    Advancing,
    /// QIT is pinned; events still apply.
    Static,
}

/// Point-in-time view of one shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStatus {
    pub shard: usize,
    pub state: WatermarkState,
    pub watermark: QueryIntegrityTime,
    pub rows: usize,
    pub pending: usize,
}

/// Outcome of one indexing cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Events applied across all shards.
    pub applied: usize,
    /// Events still queued.
    pub pending: usize,
    /// Minimum watermark across shards after the cycle.
    pub watermark: QueryIntegrityTime,
}

#[derive(Clone, Debug)]
struct Row {
    data_oid: DataOid,
    attributes: Attributes,
    committed_at_ms: u64,
}

impl Row {
    fn new(object: &MetadataObject, committed_at_ms: u64) -> Self {
        Self {
            data_oid: object.data_oid,
            attributes: object.attributes.clone(),
            committed_at_ms,
        }
    }
}

#[derive(Debug)]
struct Shard {
    rows: BTreeMap<MetadataOid, Row>,
    pending: VecDeque<ChangeEvent>,
    watermark: QueryIntegrityTime,
    state: WatermarkState,
    /// Set while a repopulation snapshot is taken; cycles leave the queue
    /// untouched so no event is lost behind the snapshot.
    holding: bool,
}

impl Shard {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            pending: VecDeque::new(),
            watermark: QueryIntegrityTime::zero(),
            state: WatermarkState::Unestablished,
            holding: false,
        }
    }

    fn apply(&mut self, event: &ChangeEvent) {
        let oid = event.object.oid;
        match event.kind {
            ChangeKind::Upsert if event.object.is_live() => {
                self.rows
                    .insert(oid, Row::new(&event.object, event.committed_at_ms));
            }
            ChangeKind::Upsert | ChangeKind::Remove => {
                self.rows.remove(&oid);
            }
        }
    }

    /// Apply every queued event committed at or before `now`, in FIFO
    /// order. Later events stay queued even when they arrived first.
    fn drain_until(&mut self, now: u64) -> usize {
        let mut applied = 0;
        let mut kept = VecDeque::new();
        while let Some(event) = self.pending.pop_front() {
            if event.committed_at_ms <= now {
                self.apply(&event);
                applied += 1;
            } else {
                kept.push_back(event);
            }
        }
        self.pending = kept;
        applied
    }

    /// Raise the watermark as far as the queue allows. Never lowers it.
    fn establish(&mut self, now: u64) {
        let oldest = self.pending.iter().map(|e| e.committed_at_ms).min();
        let candidate = match oldest {
            None => now,
            Some(oldest) => oldest.saturating_sub(1).min(now),
        };
        if candidate > self.watermark.as_millis() {
            self.watermark = QueryIntegrityTime::new(candidate);
        }
    }

    fn pending_removal(&self, oid: &MetadataOid) -> bool {
        self.pending
            .iter()
            .any(|e| e.kind == ChangeKind::Remove && e.object.oid == *oid)
    }
}

/// The query index of one cell.
pub struct QueryIndex {
    shards: Vec<Mutex<Shard>>,
    schema: Schema,
    pinned: AtomicBool,
    rebuild: Mutex<()>,
}

impl std::fmt::Debug for QueryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryIndex")
            .field("shards", &self.shards.len())
            .field("rows", &self.len())
            .field("watermark", &self.watermark())
            .finish()
    }
}

impl Default for QueryIndex {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl QueryIndex {
    pub fn new(shard_count: usize) -> Self {
        Self::with_schema(shard_count, Schema::default())
    }

    /// An index whose queries are checked against `schema`.
    /// A shard count of 0 is treated as 1.
    pub fn with_schema(shard_count: usize, schema: Schema) -> Self {
        Self {
            shards: (0..shard_count.max(1))
                .map(|_| Mutex::new(Shard::new()))
                .collect(),
            schema,
            pinned: AtomicBool::new(false),
            rebuild: Mutex::new(()),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Shard owning `oid`: its first byte modulo the shard count.
    pub fn shard_of(&self, oid: &MetadataOid) -> usize {
        oid.object_id().leading_byte() as usize % self.shards.len()
    }

    fn lock(&self, shard: usize) -> MutexGuard<'_, Shard> {
        self.shards[shard].lock().expect("lock poisoned")
    }

    // ---------------------------------------------------------------
    // Change intake and cycles
    // ---------------------------------------------------------------

    /// Queue a committed change for the next cycle.
    pub fn enqueue(&self, event: ChangeEvent) {
        let shard = self.shard_of(&event.object.oid);
        self.lock(shard).pending.push_back(event);
    }

    /// Apply every queued event committed at or before `now` and advance
    /// the watermark of each `Advancing` shard.
    ///
    /// `now` must not be ahead of what the chain has published; pass it
    /// through [`MetadataChain::fence`] (or use [`QueryIndex::tick`]) when
    /// writers run concurrently.
    pub fn run_cycle(&self, now: u64) -> CycleReport {
        let mut report = CycleReport::default();
        let mut watermark: Option<QueryIntegrityTime> = None;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("lock poisoned");
            if !shard.holding {
                report.applied += shard.drain_until(now);
                if shard.state == WatermarkState::Advancing {
                    shard.establish(now);
                }
            }
            report.pending += shard.pending.len();
            watermark = Some(watermark.map_or(shard.watermark, |w| w.min(shard.watermark)));
        }
        report.watermark = watermark.unwrap_or_default();
        if report.applied > 0 {
            debug!(
                applied = report.applied,
                pending = report.pending,
                watermark = %report.watermark,
                "index cycle"
            );
        }
        report
    }

    /// One indexer step against `source`: repopulate while the watermark is
    /// unestablished, otherwise run a cycle at the fenced time.
    pub fn tick(&self, source: &dyn MetadataSource, now: u64) -> CycleReport {
        if self.state() == WatermarkState::Unestablished {
            self.repopulate(source, now)
        } else {
            self.run_cycle(source.fence(now))
        }
    }

    /// Pin (`true`) or release (`false`) every established watermark.
    pub fn set_static(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::SeqCst);
        for shard in &self.shards {
            let mut shard = shard.lock().expect("lock poisoned");
            shard.state = match (shard.state, pinned) {
                (WatermarkState::Advancing, true) => WatermarkState::Static,
                (WatermarkState::Static, false) => WatermarkState::Advancing,
                (state, _) => state,
            };
        }
        info!(pinned, "index watermark mode changed");
    }

    pub fn is_static(&self) -> bool {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Drop every row and queued event. QIT returns to 0.
    pub fn wipe(&self) {
        let _rebuild = self.rebuild.lock().expect("lock poisoned");
        for shard in &self.shards {
            let mut shard = shard.lock().expect("lock poisoned");
            shard.rows.clear();
            shard.pending.clear();
            shard.watermark = QueryIntegrityTime::zero();
            shard.state = WatermarkState::Unestablished;
        }
        info!(shards = self.shards.len(), "index wiped");
    }

    /// Forget the watermark but keep rows, as after a cluster restart.
    pub fn reboot(&self) {
        let _rebuild = self.rebuild.lock().expect("lock poisoned");
        for shard in &self.shards {
            let mut shard = shard.lock().expect("lock poisoned");
            shard.watermark = QueryIntegrityTime::zero();
            shard.state = WatermarkState::Unestablished;
        }
        info!(shards = self.shards.len(), "index rebooted");
    }

    /// Rebuild every shard from a full snapshot of `source`, then run one
    /// cycle at `now` (fenced by the source). Every shard leaves
    /// `Unestablished`.
    pub fn repopulate(&self, source: &dyn MetadataSource, now: u64) -> CycleReport {
        let _rebuild = self.rebuild.lock().expect("lock poisoned");
        for shard in &self.shards {
            shard.lock().expect("lock poisoned").holding = true;
        }
        let now = source.fence(now);

        // Taken without any shard lock: the chain publishes into the index
        // while holding its own record locks.
        let snapshot = source.live_objects();
        let mut rows: Vec<BTreeMap<MetadataOid, Row>> = vec![BTreeMap::new(); self.shards.len()];
        for object in &snapshot {
            rows[self.shard_of(&object.oid)].insert(object.oid, Row::new(object, object.created_at_ms));
        }

        let state = if self.is_static() {
            WatermarkState::Static
        } else {
            WatermarkState::Advancing
        };
        let mut report = CycleReport::default();
        let mut watermark: Option<QueryIntegrityTime> = None;
        for (shard, shard_rows) in self.shards.iter().zip(rows) {
            let mut shard = shard.lock().expect("lock poisoned");
            shard.rows = shard_rows;
            shard.holding = false;
            report.applied += shard.drain_until(now);
            shard.establish(now);
            shard.state = state;
            report.pending += shard.pending.len();
            watermark = Some(watermark.map_or(shard.watermark, |w| w.min(shard.watermark)));
        }
        report.watermark = watermark.unwrap_or_default();

        info!(
            rows = snapshot.len(),
            applied = report.applied,
            watermark = %report.watermark,
            "index repopulated"
        );
        report
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    /// Minimum watermark across shards.
    pub fn watermark(&self) -> QueryIntegrityTime {
        self.shards
            .iter()
            .map(|s| s.lock().expect("lock poisoned").watermark)
            .min()
            .unwrap_or_default()
    }

    pub fn state(&self) -> WatermarkState {
        let states: Vec<WatermarkState> = self
            .shards
            .iter()
            .map(|s| s.lock().expect("lock poisoned").state)
            .collect();
        if states.contains(&WatermarkState::Unestablished) {
            WatermarkState::Unestablished
        } else if states.contains(&WatermarkState::Advancing) {
            WatermarkState::Advancing
        } else {
            WatermarkState::Static
        }
    }

    pub fn status(&self) -> Vec<ShardStatus> {
        self.shards
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let shard = s.lock().expect("lock poisoned");
                ShardStatus {
                    shard: i,
                    state: shard.state,
                    watermark: shard.watermark,
                    rows: shard.rows.len(),
                    pending: shard.pending.len(),
                }
            })
            .collect()
    }

    /// The owning shard's QIT if `oid` is indexed and covered by it, else 0.
    pub fn check_indexed(&self, oid: &MetadataOid) -> QueryIntegrityTime {
        let shard = self.lock(self.shard_of(oid));
        match shard.rows.get(oid) {
            Some(row)
                if shard.watermark.covers(row.committed_at_ms)
                    && !shard.pending_removal(oid) =>
            {
                shard.watermark
            }
            _ => QueryIntegrityTime::zero(),
        }
    }

    /// Rows currently visible.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("lock poisoned").rows.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events queued but not yet applied.
    pub fn pending(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("lock poisoned").pending.len())
            .sum()
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Parse, check and open a cursor over `predicate`.
    pub fn query(self: &Arc<Self>, predicate: &str, page_size: usize) -> QueryResult<QueryCursor> {
        self.query_predicate(Predicate::parse(predicate)?, page_size)
    }

    pub fn query_predicate(
        self: &Arc<Self>,
        predicate: Predicate,
        page_size: usize,
    ) -> QueryResult<QueryCursor> {
        self.schema.check_predicate(&predicate)?;
        QueryCursor::new(Arc::clone(self), predicate, page_size)
    }

    /// Up to `limit` matching rows with OID greater than `after`, sorted by
    /// OID, plus the minimum shard watermark seen during the scan. Row QITs
    /// are left for the cursor to fill in.
    pub(crate) fn scan(
        &self,
        predicate: &Predicate,
        after: Option<&MetadataOid>,
        limit: usize,
    ) -> (Vec<QueryRow>, QueryIntegrityTime) {
        let lower = after.map_or(Bound::Unbounded, |oid| Bound::Excluded(*oid));
        let mut rows = Vec::new();
        let mut watermark: Option<QueryIntegrityTime> = None;
        for shard in &self.shards {
            let shard = shard.lock().expect("lock poisoned");
            watermark = Some(watermark.map_or(shard.watermark, |w| w.min(shard.watermark)));
            rows.extend(
                shard
                    .rows
                    .range((lower, Bound::Unbounded))
                    .filter(|(_, row)| predicate.matches(&row.attributes))
                    .take(limit)
                    .map(|(oid, row)| QueryRow {
                        oid: *oid,
                        data_oid: row.data_oid,
                        attributes: row.attributes.clone(),
                        query_integrity_time: QueryIntegrityTime::zero(),
                    }),
            );
        }
        rows.sort_by_key(|row| row.oid);
        rows.truncate(limit);
        (rows, watermark.unwrap_or_default())
    }
}

impl ChangeListener for QueryIndex {
    fn on_change(&self, event: &ChangeEvent) {
        self.enqueue(event.clone());
    }
}
