use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Query integrity time: the watermark below which every committed,
/// undeleted metadata object is guaranteed visible to queries.
///
/// Milliseconds since the UNIX epoch. Zero means the watermark has not been
/// established (fresh index, after a wipe, or after a reboot).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryIntegrityTime(u64);

impl QueryIntegrityTime {
    pub const fn new(ms: u64) -> Self {
        Self(ms)
    }

    /// The unestablished watermark.
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn is_established(&self) -> bool {
        self.0 > 0
    }

    /// Whether a write committed at `committed_at_ms` is covered.
    pub fn covers(&self, committed_at_ms: u64) -> bool {
        self.is_established() && committed_at_ms <= self.0
    }
}

impl fmt::Debug for QueryIntegrityTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QIT({}ms)", self.0)
    }
}

impl fmt::Display for QueryIntegrityTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-driven clock for deterministic tests and scenarios.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward and return the new time.
    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_unestablished() {
        let qit = QueryIntegrityTime::zero();
        assert!(!qit.is_established());
        assert!(!qit.covers(0));
    }

    #[test]
    fn covers_earlier_commits() {
        let qit = QueryIntegrityTime::new(100);
        assert!(qit.covers(100));
        assert!(qit.covers(1));
        assert!(!qit.covers(101));
    }

    #[test]
    fn system_clock_is_reasonable() {
        // After 2020-01-01.
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.advance(5), 15);
        assert_eq!(clock.now_ms(), 15);
        clock.set(3);
        assert_eq!(clock.now_ms(), 3);
    }

    #[test]
    fn ordering_and_display() {
        assert!(QueryIntegrityTime::new(1) < QueryIntegrityTime::new(2));
        assert_eq!(format!("{}", QueryIntegrityTime::new(77)), "77");
        assert_eq!(format!("{:?}", QueryIntegrityTime::new(77)), "QIT(77ms)");
    }
}
