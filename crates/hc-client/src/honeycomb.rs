//! The caller-facing Honeycomb API over one or more cells.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hc_crypto::Digest;
use hc_meta::{MetadataChain, MetadataObject, RefCountAudit};
use hc_query::{
    CycleReport, Indexer, IndexerHandle, Predicate, QueryCursor, QueryIndex, QueryRow, Schema,
};
use hc_store::{DataObjectTable, FaultInjector, GcReport, InMemoryBlobStore};
use hc_types::{
    Attributes, Clock, DataOid, MetadataOid, QueryIntegrityTime, SystemClock,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HoneycombConfig;
use crate::error::{ClientError, ClientResult};
use crate::retry::RetryPolicy;

/// What `store` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub md_oid: MetadataOid,
    pub data_oid: DataOid,
    pub digest: Digest,
    pub size: u64,
    /// Cell the object was placed in.
    pub cell: usize,
}

/// One independent storage cell: blobs, metadata chain and query index.
pub struct Cell {
    id: usize,
    blobs: Arc<InMemoryBlobStore>,
    chain: Arc<MetadataChain>,
    index: Arc<QueryIndex>,
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("chain", &self.chain)
            .field("index", &self.index)
            .finish()
    }
}

impl Cell {
    fn new(id: usize, config: &HoneycombConfig, clock: Arc<dyn Clock>) -> Self {
        let blobs = Arc::new(InMemoryBlobStore::new(config.fragments));
        blobs.set_capacity(config.capacity_bytes);
        let data = Arc::new(DataObjectTable::new(blobs.clone(), config.reclamation));
        let chain = Arc::new(MetadataChain::new(data, clock.clone()));
        let schema = Schema::from_fields(config.schema.clone());
        let index = Arc::new(QueryIndex::with_schema(config.shards_per_cell, schema));
        chain.subscribe(index.clone());
        index.repopulate(chain.as_ref(), clock.now_ms());
        Self {
            id,
            blobs,
            chain,
            index,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn blobs(&self) -> &Arc<InMemoryBlobStore> {
        &self.blobs
    }

    pub fn chain(&self) -> &Arc<MetadataChain> {
        &self.chain
    }

    pub fn index(&self) -> &Arc<QueryIndex> {
        &self.index
    }

    pub fn faults(&self) -> &FaultInjector {
        self.blobs.faults()
    }
}

/// A Honeycomb deployment.
///
/// New objects are placed round-robin across cells. Every later operation
/// on an OID goes to the cell that issued it; queries fan out to all cells.
pub struct Honeycomb {
    config: HoneycombConfig,
    clock: Arc<dyn Clock>,
    schema: Schema,
    cells: Vec<Cell>,
    next_cell: AtomicUsize,
    indexers: Mutex<Vec<IndexerHandle>>,
}

impl std::fmt::Debug for Honeycomb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Honeycomb")
            .field("cells", &self.cells)
            .field("config", &self.config)
            .finish()
    }
}

impl Honeycomb {
    /// Build a deployment on the wall clock.
    pub fn new(config: HoneycombConfig) -> ClientResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a deployment on an explicit clock.
    pub fn with_clock(config: HoneycombConfig, clock: Arc<dyn Clock>) -> ClientResult<Self> {
        config.validate()?;
        let cells = (0..config.cells)
            .map(|id| Cell::new(id, &config, clock.clone()))
            .collect();
        info!(
            cells = config.cells,
            shards = config.shards_per_cell,
            reclamation = ?config.reclamation,
            "honeycomb ready"
        );
        Ok(Self {
            schema: Schema::from_fields(config.schema.clone()),
            config,
            clock,
            cells,
            next_cell: AtomicUsize::new(0),
            indexers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &HoneycombConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, id: usize) -> Option<&Cell> {
        self.cells.get(id)
    }

    /// Fault injector of one cell's blob store.
    pub fn faults(&self, cell: usize) -> Option<&FaultInjector> {
        self.cell(cell).map(Cell::faults)
    }

    // ---------------------------------------------------------------
    // Object operations
    // ---------------------------------------------------------------

    /// Store `data` with its first metadata object.
    pub fn store(&self, data: &[u8], attributes: Attributes) -> ClientResult<StoreReceipt> {
        self.schema.check_attributes(&attributes)?;
        let cell = self.next_cell.fetch_add(1, Ordering::Relaxed) % self.cells.len();
        let stored = self.cells[cell].chain.store(data, attributes)?;
        Ok(StoreReceipt {
            md_oid: stored.md_oid,
            data_oid: stored.data_oid,
            digest: stored.digest,
            size: stored.size,
            cell,
        })
    }

    /// Add a metadata object sharing `oid`'s data. The new object carries
    /// exactly `attributes`.
    pub fn add_metadata(
        &self,
        oid: &MetadataOid,
        attributes: Attributes,
    ) -> ClientResult<MetadataOid> {
        self.schema.check_attributes(&attributes)?;
        Ok(self.owner(oid)?.chain.add_metadata(oid, attributes)?)
    }

    pub fn delete(&self, oid: &MetadataOid) -> ClientResult<()> {
        Ok(self.owner(oid)?.chain.delete(oid)?)
    }

    pub fn retrieve(&self, oid: &MetadataOid) -> ClientResult<Vec<u8>> {
        Ok(self.owner(oid)?.chain.retrieve(oid)?)
    }

    pub fn retrieve_metadata(&self, oid: &MetadataOid) -> ClientResult<MetadataObject> {
        Ok(self.owner(oid)?.chain.retrieve_metadata(oid)?)
    }

    /// Read a data object directly. Identical bytes stored in different
    /// cells are separate data objects; the first live one wins.
    pub fn retrieve_data(&self, oid: &DataOid) -> ClientResult<Vec<u8>> {
        let cell = self
            .cells
            .iter()
            .find(|c| c.chain.data_object(oid).is_some_and(|d| d.is_live()))
            .ok_or_else(|| ClientError::NoSuchObject(oid.to_hex()))?;
        Ok(cell.chain.retrieve_data(oid)?)
    }

    /// Refcount of a data object summed over cells; `None` if no cell has it.
    pub fn ref_count(&self, oid: &DataOid) -> Option<u32> {
        self.cells
            .iter()
            .filter_map(|c| c.chain.ref_count(oid))
            .reduce(|a, b| a + b)
    }

    fn owner(&self, oid: &MetadataOid) -> ClientResult<&Cell> {
        self.cells
            .iter()
            .find(|c| c.chain.contains(oid))
            .ok_or_else(|| ClientError::NoSuchObject(oid.to_hex()))
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Open a cursor over every cell.
    pub fn query(&self, predicate: &str, page_size: usize) -> ClientResult<MultiCellCursor> {
        let predicate = Predicate::parse(predicate)?;
        let cursors = self
            .cells
            .iter()
            .map(|c| c.index.query_predicate(predicate.clone(), page_size))
            .collect::<Result<Vec<QueryCursor>, _>>()?;
        Ok(MultiCellCursor::new(cursors, page_size))
    }

    /// QIT covering `oid` in its cell, or 0 if it is not (yet) indexed.
    pub fn check_indexed(&self, oid: &MetadataOid) -> QueryIntegrityTime {
        self.owner(oid)
            .map(|c| c.index.check_indexed(oid))
            .unwrap_or_default()
    }

    /// Poll [`check_indexed`](Self::check_indexed) with the retry backoff
    /// until `oid` is covered.
    pub async fn wait_indexed(&self, oid: &MetadataOid) -> ClientResult<QueryIntegrityTime> {
        let policy = &self.config.retry;
        for attempt in 0..policy.max_attempts {
            let qit = self.check_indexed(oid);
            if qit.is_established() {
                return Ok(qit);
            }
            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }
        Err(ClientError::IndexTimeout(oid.to_hex()))
    }

    /// Minimum watermark across cells.
    pub fn watermark(&self) -> QueryIntegrityTime {
        self.cells
            .iter()
            .map(|c| c.index.watermark())
            .min()
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------
    // Index control
    // ---------------------------------------------------------------

    /// Run one indexing cycle in every cell at the current clock time,
    /// fenced by that cell's chain.
    pub fn run_index_cycle(&self) -> CycleReport {
        let now = self.clock.now_ms();
        merge_reports(
            self.cells
                .iter()
                .map(|c| c.index.run_cycle(c.chain.fence(now))),
        )
    }

    pub fn wipe_index(&self) {
        for cell in &self.cells {
            cell.index.wipe();
        }
    }

    /// Restart every cell's index: watermarks return to 0, rows survive.
    pub fn reboot(&self) {
        for cell in &self.cells {
            cell.index.reboot();
        }
    }

    pub fn repopulate_index(&self) -> CycleReport {
        let now = self.clock.now_ms();
        merge_reports(
            self.cells
                .iter()
                .map(|c| c.index.repopulate(c.chain.as_ref(), now)),
        )
    }

    pub fn set_index_static(&self, pinned: bool) {
        for cell in &self.cells {
            cell.index.set_static(pinned);
        }
    }

    /// Start one background indexer per cell. Requires a tokio runtime.
    /// An indexer repopulates its cell on its own after a wipe or reboot.
    pub fn start_indexers(&self) {
        let interval = Duration::from_millis(self.config.indexer_interval_ms);
        let mut indexers = self.indexers.lock().expect("lock poisoned");
        if !indexers.is_empty() {
            return;
        }
        for cell in &self.cells {
            indexers.push(Indexer::spawn(
                cell.index.clone(),
                cell.chain.clone(),
                self.clock.clone(),
                interval,
            ));
        }
        debug!(count = indexers.len(), "indexers started");
    }

    pub async fn stop_indexers(&self) {
        let handles = std::mem::take(&mut *self.indexers.lock().expect("lock poisoned"));
        for handle in handles {
            handle.shutdown().await;
        }
    }

    // ---------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------

    pub fn collect_garbage(&self) -> ClientResult<GcReport> {
        let mut total = GcReport::default();
        for cell in &self.cells {
            let report = cell.chain.data().collect_garbage()?;
            total.reclaimed += report.reclaimed;
            total.reclaimed_bytes += report.reclaimed_bytes;
            total.live += report.live;
        }
        Ok(total)
    }

    /// Refcount audit across every cell.
    pub fn audit(&self) -> RefCountAudit {
        let mut total = RefCountAudit::default();
        for cell in &self.cells {
            let audit = cell.chain.audit();
            total.checked += audit.checked;
            total.mismatches.extend(audit.mismatches);
        }
        total
    }
}

fn merge_reports(reports: impl Iterator<Item = CycleReport>) -> CycleReport {
    let mut merged: Option<CycleReport> = None;
    for report in reports {
        merged = Some(match merged {
            None => report,
            Some(acc) => CycleReport {
                applied: acc.applied + report.applied,
                pending: acc.pending + report.pending,
                watermark: acc.watermark.min(report.watermark),
            },
        });
    }
    merged.unwrap_or_default()
}

/// A query cursor merging every cell's results in OID order.
///
/// The QIT of each page is the minimum across cells, and never increases
/// over the life of the cursor.
#[derive(Debug)]
pub struct MultiCellCursor {
    cursors: Vec<QueryCursor>,
    buffers: Vec<VecDeque<QueryRow>>,
    page_size: usize,
    qit: Option<QueryIntegrityTime>,
}

impl MultiCellCursor {
    fn new(cursors: Vec<QueryCursor>, page_size: usize) -> Self {
        let buffers = cursors.iter().map(|_| VecDeque::new()).collect();
        Self {
            cursors,
            buffers,
            page_size,
            qit: None,
        }
    }

    pub fn query_integrity_time(&self) -> Option<QueryIntegrityTime> {
        self.qit
    }

    pub fn is_exhausted(&self) -> bool {
        self.buffers.iter().all(VecDeque::is_empty) && self.cursors.iter().all(|c| c.is_exhausted())
    }

    pub fn next_page(&mut self) -> Vec<QueryRow> {
        let mut page = Vec::new();
        while page.len() < self.page_size {
            for (cursor, buffer) in self.cursors.iter_mut().zip(self.buffers.iter_mut()) {
                if buffer.is_empty() && !cursor.is_exhausted() {
                    buffer.extend(cursor.next_page());
                }
            }
            let next = self
                .buffers
                .iter()
                .enumerate()
                .filter_map(|(i, b)| b.front().map(|row| (row.oid, i)))
                .min();
            let Some((_, i)) = next else { break };
            if let Some(row) = self.buffers[i].pop_front() {
                page.push(row);
            }
        }

        let current = self
            .cursors
            .iter()
            .filter_map(QueryCursor::query_integrity_time)
            .min()
            .unwrap_or_default();
        let qit = self.qit.map_or(current, |prev| prev.min(current));
        self.qit = Some(qit);
        for row in &mut page {
            row.query_integrity_time = qit;
        }
        page
    }

    pub fn collect_all(mut self) -> Vec<QueryRow> {
        let mut out = Vec::new();
        while !self.is_exhausted() {
            out.extend(self.next_page());
        }
        out
    }
}
