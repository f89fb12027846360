//! Query index for the Honeycomb reference model.
//!
//! The index lags the metadata chain on purpose: changes are queued and
//! applied by indexing cycles, and every result carries the query integrity
//! time (QIT) that says how far behind it may be.
//!
//! # Key Types
//!
//! - [`Predicate`] -- Parsed where-clause (`owner = 'qa' AND size > 10`)
//! - [`Schema`] -- Optional field types checked on queries and writes
//! - [`QueryIndex`] -- Sharded rows, pending queues and watermarks
//! - [`QueryCursor`] -- Paginated scan with a non-increasing QIT
//! - [`Indexer`] -- Tokio task running cycles on an interval

pub mod cursor;
pub mod error;
pub mod index;
pub mod indexer;
mod parser;
pub mod predicate;
pub mod schema;

pub use cursor::{QueryCursor, QueryRow};
pub use error::{QueryError, QueryResult};
pub use index::{
    CycleReport, MetadataSource, QueryIndex, ShardStatus, WatermarkState, DEFAULT_SHARDS,
};
pub use indexer::{Indexer, IndexerHandle};
pub use predicate::{CompareOp, Predicate};
pub use schema::Schema;
