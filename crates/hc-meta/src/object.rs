use hc_crypto::Digest;
use hc_types::{Attributes, DataOid, MetadataOid};
use serde::{Deserialize, Serialize};

/// A metadata object: one handle on a data object plus its attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataObject {
    pub oid: MetadataOid,
    pub data_oid: DataOid,
    pub attributes: Attributes,
    pub deleted: bool,
    /// Commit time of the creating `store`/`add_metadata`, in milliseconds.
    pub created_at_ms: u64,
}

impl MetadataObject {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// What a successful `store` hands back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stored {
    pub md_oid: MetadataOid,
    pub data_oid: DataOid,
    pub digest: Digest,
    pub size: u64,
}
