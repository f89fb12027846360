use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Data + parity fragment counts for every stored blob.
///
/// Only the bookkeeping is modelled: a blob stays reconstructable while the
/// number of unhealthy fragments does not exceed `parity_fragments`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentLayout {
    pub data_fragments: usize,
    pub parity_fragments: usize,
}

impl FragmentLayout {
    pub const fn new(data_fragments: usize, parity_fragments: usize) -> Self {
        Self {
            data_fragments,
            parity_fragments,
        }
    }

    pub fn total(&self) -> usize {
        self.data_fragments + self.parity_fragments
    }

    /// Bytes per fragment for a payload of `len` bytes.
    pub fn fragment_size(&self, len: u64) -> u64 {
        len.div_ceil(self.data_fragments as u64)
    }

    /// Bytes a payload of `len` bytes occupies across all fragments.
    pub fn footprint(&self, len: u64) -> u64 {
        self.fragment_size(len) * self.total() as u64
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.data_fragments == 0 {
            return Err(StoreError::InvalidLayout(
                "at least one data fragment is required".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FragmentLayout {
    fn default() -> Self {
        Self::new(5, 2)
    }
}

/// Health of a single fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentState {
    Healthy,
    /// The fragment is gone (disk or node loss).
    Lost,
    /// The fragment is present but fails its checksum.
    Corrupt,
}

/// Per-blob fragment summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHealth {
    pub fragments: Vec<FragmentState>,
    pub tolerated: usize,
}

impl FragmentHealth {
    pub fn unhealthy(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| **f != FragmentState::Healthy)
            .count()
    }

    pub fn is_recoverable(&self) -> bool {
        self.unhealthy() <= self.tolerated
    }
}
