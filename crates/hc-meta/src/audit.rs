//! Refcount invariant audit.
//!
//! After quiescence every data object's refcount must equal the number of
//! live metadata objects pointing at it. An undercount risks reclaiming
//! data that is still referenced; an overcount leaks storage.

use serde::{Deserialize, Serialize};

use hc_types::DataOid;

/// Direction of a refcount mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchKind {
    /// Stored refcount below the live reference count.
    Undercount,
    /// Stored refcount above the live reference count.
    Overcount,
}

/// One data object whose stored refcount disagrees with the metadata table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountMismatch {
    pub data_oid: DataOid,
    /// Refcount held by the data object (0 if missing or tombstoned).
    pub stored: u32,
    /// Live metadata objects that reference it.
    pub live_references: u32,
}

impl RefCountMismatch {
    pub fn kind(&self) -> MismatchKind {
        if self.stored < self.live_references {
            MismatchKind::Undercount
        } else {
            MismatchKind::Overcount
        }
    }
}

/// Result of a refcount audit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefCountAudit {
    /// Number of data objects examined.
    pub checked: usize,
    pub mismatches: Vec<RefCountMismatch>,
}

impl RefCountAudit {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn undercounts(&self) -> impl Iterator<Item = &RefCountMismatch> {
        self.mismatches
            .iter()
            .filter(|m| m.kind() == MismatchKind::Undercount)
    }

    pub fn overcounts(&self) -> impl Iterator<Item = &RefCountMismatch> {
        self.mismatches
            .iter()
            .filter(|m| m.kind() == MismatchKind::Overcount)
    }
}
