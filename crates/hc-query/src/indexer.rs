//! Background task driving indexing cycles.

use std::sync::Arc;
use std::time::Duration;

use hc_types::Clock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::index::{MetadataSource, QueryIndex};

/// Runs [`QueryIndex::tick`] on a fixed interval: a fenced cycle while the
/// watermark is established, a repopulation from `source` after a wipe or
/// reboot.
pub struct Indexer {
    index: Arc<QueryIndex>,
    source: Arc<dyn MetadataSource>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

/// Handle to a running [`Indexer`]. Dropping it also stops the task.
#[derive(Debug)]
pub struct IndexerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl Indexer {
    /// Spawn the indexing loop on the current tokio runtime.
    pub fn spawn(
        index: Arc<QueryIndex>,
        source: Arc<dyn MetadataSource>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> IndexerHandle {
        let indexer = Self {
            index,
            source,
            clock,
            interval: interval.max(Duration::from_millis(1)),
        };
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(indexer.run(shutdown_rx));
        IndexerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = self.interval.as_millis() as u64, "indexer started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("indexer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.index.tick(self.source.as_ref(), self.clock.now_ms());
                    trace!(applied = report.applied, watermark = %report.watermark, "indexer tick");
                }
            }
        }
    }
}

impl IndexerHandle {
    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
