//! Reference-counted metadata chains.
//!
//! A metadata object is an independent handle on a data object. `store`
//! creates both (refcount 1); `add_metadata` creates another handle on the
//! same data object (refcount + 1); `delete` tombstones one handle
//! (refcount - 1) and, at zero, the data object too.
//!
//! # Key Types
//!
//! - [`MetadataChain`] -- the chain itself, over a
//!   [`DataObjectTable`](hc_store::DataObjectTable)
//! - [`MetadataObject`] -- one handle with its typed attributes
//! - [`ChangeEvent`] / [`ChangeListener`] -- committed-change notifications
//!   consumed by the query index
//! - [`RefCountAudit`] -- refcount invariant check

pub mod audit;
pub mod chain;
pub mod error;
pub mod event;
pub mod object;

pub use audit::{MismatchKind, RefCountAudit, RefCountMismatch};
pub use chain::MetadataChain;
pub use error::{MetaError, MetaResult};
pub use event::{ChangeEvent, ChangeKind, ChangeListener};
pub use object::{MetadataObject, Stored};
