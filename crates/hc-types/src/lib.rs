//! Foundation types for the Honeycomb reference model.
//!
//! Every other `hc-*` crate depends on `hc-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- 32-byte BLAKE3 identifier underlying every OID
//! - [`DataOid`] -- Content-addressed identifier of a data object
//! - [`MetadataOid`] -- Identifier of a metadata object (unique per creation)
//! - [`AttrValue`] / [`AttrType`] -- Typed metadata attribute values
//! - [`QueryIntegrityTime`] -- Query index watermark (0 = not established)
//! - [`Clock`] -- Millisecond time source ([`SystemClock`], [`ManualClock`])

pub mod error;
pub mod object;
pub mod temporal;
pub mod value;

pub use error::TypeError;
pub use object::{DataOid, MetadataOid, ObjectId};
pub use temporal::{Clock, ManualClock, QueryIntegrityTime, SystemClock};
pub use value::{AttrType, AttrValue, Attributes};
