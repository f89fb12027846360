//! Client API for the Honeycomb reference model.
//!
//! Wraps one or more cells (blob store, metadata chain, query index) behind
//! a single facade with a caller-facing error taxonomy, a retry policy for
//! transient failures, and TOML configuration.

pub mod config;
pub mod error;
pub mod honeycomb;
pub mod retry;

pub use config::HoneycombConfig;
pub use error::{ClientError, ClientResult};
pub use honeycomb::{Cell, Honeycomb, MultiCellCursor, StoreReceipt};
pub use retry::RetryPolicy;

// Re-export key types
pub use hc_crypto::Digest;
pub use hc_meta::{MetadataObject, RefCountAudit};
pub use hc_query::{CycleReport, QueryRow, WatermarkState};
pub use hc_store::{FragmentLayout, GcReport, ReclamationPolicy};
pub use hc_types::{
    AttrType, AttrValue, Attributes, Clock, DataOid, ManualClock, MetadataOid, QueryIntegrityTime,
    SystemClock,
};
