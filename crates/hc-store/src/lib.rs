//! Data-object storage for the Honeycomb reference model.
//!
//! Payload bytes live in a content-addressed [`BlobStore`]; the
//! [`DataObjectTable`] tracks one [`DataObject`] per payload with its
//! reference count and tombstone flag.
//!
//! # Layers
//!
//! - [`BlobStore`] -- raw byte storage keyed by [`DataOid`](hc_types::DataOid)
//! - [`InMemoryBlobStore`] -- `HashMap`-backed implementation with capacity
//!   accounting, per-fragment health and fault injection
//! - [`DataObjectTable`] -- refcounted records over a blob store
//!
//! # Rules
//!
//! 1. Payloads are immutable once written; identical bytes share one OID.
//! 2. Every refcount change happens under that object's own mutex.
//! 3. A tombstoned data object is unreachable at once. Its bytes are
//!    reclaimed according to the [`ReclamationPolicy`].
//! 4. A blob is readable while no more than `parity_fragments` of its
//!    fragments are lost or corrupt.

pub mod data;
pub mod error;
pub mod fault;
pub mod layout;
pub mod memory;
pub mod traits;

pub use data::{DataObject, DataObjectTable, GcReport, ReclamationPolicy, Release};
pub use error::{StoreError, StoreResult};
pub use fault::FaultInjector;
pub use layout::{FragmentHealth, FragmentLayout, FragmentState};
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;
