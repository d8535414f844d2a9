//! Blob descriptors.
//!
//! A blob is the unit of content-addressed data: either raw file bytes
//! (`data`) or a serialized directory listing (`tree`). Blobs live inside
//! pack objects; a [`PackLocation`] records where.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// The two kinds of blob a repository stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobType {
    Data,
    Tree,
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobType::Data => f.write_str("data"),
            BlobType::Tree => f.write_str("tree"),
        }
    }
}

/// Where a blob's encrypted bytes sit inside a pack.
///
/// `length` covers the whole envelope (IV and tag included). A set,
/// non-zero `uncompressed_length` marks the plaintext as zstd-compressed
/// and records its decompressed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackLocation {
    pub pack: Id,
    pub blob_type: BlobType,
    pub offset: u64,
    pub length: u64,
    pub uncompressed_length: Option<u64>,
}
