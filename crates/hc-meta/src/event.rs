use serde::{Deserialize, Serialize};

use crate::object::MetadataObject;

/// Kind of committed change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A metadata object became live.
    Upsert,
    /// A metadata object was deleted.
    Remove,
}

/// A committed change to one metadata object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// State of the object right after the change.
    pub object: MetadataObject,
    pub committed_at_ms: u64,
}

/// Receiver of committed changes.
///
/// Called while the chain still holds the changed object's lock, so events
/// for one OID arrive in commit order. Implementations must only record the
/// event and return; they must not call back into the chain.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}
