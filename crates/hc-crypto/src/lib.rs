//! Hashing primitives for the Honeycomb reference model.
//!
//! Data OIDs, metadata OIDs and content digests are all BLAKE3; the OIDs are
//! domain-separated so a data object and a metadata object can never share
//! an identifier.

pub mod digest;
pub mod hasher;

pub use digest::{Digest, DigestError};
pub use hasher::ContentHasher;
