use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

/// Transient failure injection for a blob backend.
///
/// Each armed failure is consumed by exactly one operation, so a caller
/// that retries enough times eventually gets through.
#[derive(Debug, Default)]
pub struct FaultInjector {
    failing_writes: AtomicU32,
    failing_reads: AtomicU32,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with a transient I/O error.
    pub fn fail_next_writes(&self, n: u32) {
        warn!(n, "arming write faults");
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with a transient I/O error.
    pub fn fail_next_reads(&self, n: u32) {
        warn!(n, "arming read faults");
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.failing_writes.store(0, Ordering::SeqCst);
        self.failing_reads.store(0, Ordering::SeqCst);
    }

    /// Consume one armed write failure, if any.
    pub(crate) fn take_write_fault(&self) -> bool {
        Self::take(&self.failing_writes)
    }

    /// Consume one armed read failure, if any.
    pub(crate) fn take_read_fault(&self) -> bool {
        Self::take(&self.failing_reads)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}
