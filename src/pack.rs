//! Pack access: materializing blobs and parsing pack headers.
//!
//! A pack stored at `data/<XX>/<id>` is parsed tail-first:
//!
//! ```ascii
//! encrypted blob 0            xx xx xx xx  (envelope)
//! ...
//! encrypted blob N-1          xx xx xx xx  (envelope)
//! encrypted header            xx xx xx xx  (envelope)
//! header length               xx xx xx xx  (u32 little-endian, does not
//!                                           count these 4 bytes)
//! ```
//!
//! The decrypted header is a run of fixed-width entries:
//!
//! ```ascii
//! type                        xx           (0 data, 1 tree: plain;
//!                                           2 data, 3 tree: compressed)
//! length                      xx xx xx xx  (u32 little-endian, envelope
//!                                           bytes included)
//! uncompressed length         xx xx xx xx  (u32 little-endian;
//!                                           compressed entries only)
//! id                          xx xx .. xx  (32 bytes)
//! ```
//!
//! Reading a blob never touches the header: the index already records the
//! blob's offset and length, so a single ranged GET per blob suffices.

use sha2::{Digest, Sha256};

use crate::blob::{BlobType, PackLocation};
use crate::codec;
use crate::crypto::{self, MasterKey};
use crate::error::{Error, ObjectKind, Result};
use crate::id::Id;
use crate::store::{self, ObjectStore};

const HEADER_LEN_FIELD: u64 = 4;
const PLAIN_ENTRY_LEN: usize = 37;
const COMPRESSED_ENTRY_LEN: usize = 41;

/// Materializes a blob's plaintext from its pack location.
///
/// With `verify` set, the result is hashed and compared against the blob
/// ID before being returned.
pub fn read_blob(
    store: &dyn ObjectStore,
    master: &MasterKey,
    id: &Id,
    location: &PackLocation,
    verify: bool,
) -> Result<Vec<u8>> {
    let key = store::pack_key(&location.pack);
    let envelope = store
        .get_range(&key, location.offset, location.length)
        .map_err(Error::Transport)?;
    let plaintext = master.open(&envelope, ObjectKind::Blob)?;
    let data = codec::decode_blob(plaintext, location.uncompressed_length)?;

    if verify && Sha256::digest(&data)[..] != id.as_bytes()[..] {
        return Err(Error::Integrity(*id));
    }
    Ok(data)
}

/// One decoded pack-header entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub id: Id,
    pub blob_type: BlobType,
    /// Stored (enveloped, possibly compressed) length.
    pub length: u32,
    /// Plaintext length for compressed entries.
    pub uncompressed_length: Option<u32>,
}

/// Reads and parses a pack's header without touching its blobs.
pub fn read_header(
    store: &dyn ObjectStore,
    master: &MasterKey,
    pack: &Id,
) -> Result<Vec<PackEntry>> {
    let key = store::pack_key(pack);
    let size = store.head(&key).map_err(Error::Transport)?.size;
    if size < HEADER_LEN_FIELD + crypto::ENVELOPE_OVERHEAD as u64 {
        return Err(Error::Format(format!(
            "pack {pack} is only {size} bytes, too small for a header"
        )));
    }

    let trailer = store
        .get_range(&key, size - HEADER_LEN_FIELD, HEADER_LEN_FIELD)
        .map_err(Error::Transport)?;
    let header_len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as u64;
    if header_len < crypto::ENVELOPE_OVERHEAD as u64 || header_len + HEADER_LEN_FIELD > size {
        return Err(Error::Format(format!(
            "pack {pack} records a {header_len}-byte header inside {size} bytes"
        )));
    }

    let envelope = store
        .get_range(&key, size - HEADER_LEN_FIELD - header_len, header_len)
        .map_err(Error::Transport)?;
    let header = master.open(&envelope, ObjectKind::PackHeader)?;
    parse_header(&header)
}

fn parse_header(mut data: &[u8]) -> Result<Vec<PackEntry>> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let (blob_type, compressed) = match data[0] {
            0 => (BlobType::Data, false),
            1 => (BlobType::Tree, false),
            2 => (BlobType::Data, true),
            3 => (BlobType::Tree, true),
            other => {
                return Err(Error::Format(format!(
                    "unknown pack entry type {other:#04x}"
                )))
            }
        };
        let entry_len = if compressed {
            COMPRESSED_ENTRY_LEN
        } else {
            PLAIN_ENTRY_LEN
        };
        if data.len() < entry_len {
            return Err(Error::Format("truncated pack header entry".into()));
        }

        let length = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let (uncompressed_length, id_at) = if compressed {
            let n = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
            (Some(n), 9)
        } else {
            (None, 5)
        };
        entries.push(PackEntry {
            id: Id::from_slice(&data[id_at..id_at + 32])?,
            blob_type,
            length,
            uncompressed_length,
        });
        data = &data[entry_len..];
    }
    Ok(entries)
}
