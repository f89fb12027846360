use hc_types::{DataOid, MetadataOid, ObjectId};

/// Domain-separated BLAKE3 hasher.
///
/// Each hasher prepends its domain tag (e.g. `"hc-data-v1"`) to every hash
/// computation, so identical bytes hashed for different purposes produce
/// different identifiers.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for data-object payloads.
    pub const DATA: Self = Self {
        domain: "hc-data-v1",
    };
    /// Hasher for metadata-object identifiers.
    pub const METADATA: Self = Self {
        domain: "hc-metadata-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash a sequence of byte slices under this domain.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> ObjectId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for part in parts {
            hasher.update(part);
        }
        ObjectId::from_hash(*hasher.finalize().as_bytes())
    }

    pub fn hash(&self, data: &[u8]) -> ObjectId {
        self.hash_parts(&[data])
    }

    /// Content-addressed OID of a data payload.
    pub fn data_oid(data: &[u8]) -> DataOid {
        DataOid::new(Self::DATA.hash(data))
    }

    /// OID for a new metadata object. `nonce` must be unique per creation
    /// (callers pass a UUID); the data OID is mixed in so the identifier
    /// also commits to what it references.
    pub fn metadata_oid(nonce: &[u8], data: &DataOid) -> MetadataOid {
        MetadataOid::new(Self::METADATA.hash_parts(&[nonce, data.object_id().as_bytes()]))
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify_data(data: &[u8], expected: &DataOid) -> bool {
        Self::data_oid(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}
