//! Full-text index mapping fingerprint.
//!
//! The store rebuilds its full-text index from the authoritative key-value
//! records whenever the configured mapping no longer matches the one it was
//! built with. The comparison is a digest of the mapping, so it must be
//! deterministic across processes and insensitive to field declaration
//! order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One field of the full-text schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingField {
    pub name: String,
    /// Field kind (`text`, `keyword`, `numeric`).
    pub kind: String,
    /// Whether the raw value is stored and retrievable.
    pub stored: bool,
    /// Tokenizer identifier for `text` fields, empty otherwise.
    #[serde(default)]
    pub tokenizer: String,
}

/// The configured full-text schema of the symbol store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping {
    pub fields: Vec<MappingField>,
}

/// Deterministic digest of a mapping.
///
/// Fields are hashed in name order, so two mappings that declare the same
/// fields in a different order fingerprint identically. Equal fingerprints
/// mean the schema has not changed; a difference tells the store to rebuild.
pub fn mapping_fingerprint(mapping: &IndexMapping) -> String {
    let mut fields: Vec<&MappingField> = mapping.fields.iter().collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.name.as_bytes());
        hasher.update([0]);
        hasher.update(field.kind.as_bytes());
        hasher.update([0]);
        hasher.update([field.stored as u8]);
        hasher.update(field.tokenizer.as_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}
