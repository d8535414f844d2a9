//! Format-version-aware decoding of decrypted bytes.
//!
//! Unpacked files (config, index manifests, snapshots) are raw JSON in
//! version-1 repositories. Version-2 repositories tag them with a leading
//! byte: `{` or `[` means legacy raw JSON (files written before an
//! upgrade), `0x02` means the remainder is zstd-compressed.
//!
//! Packed blobs carry no tag byte; whether a blob is compressed is
//! recorded next to its pack location in the index, as an expected
//! uncompressed length.

use crate::config::FormatVersion;
use crate::error::{Error, Result};

/// Leading byte marking a zstd-compressed unpacked file in version 2.
const COMPRESSED_MARKER: u8 = 0x02;

/// Decodes an unpacked file's plaintext into JSON bytes.
pub fn decode_unpacked(version: FormatVersion, data: Vec<u8>) -> Result<Vec<u8>> {
    match version {
        FormatVersion::V1 => Ok(data),
        FormatVersion::V2 => match data.first() {
            Some(b'{') | Some(b'[') => Ok(data),
            Some(&COMPRESSED_MARKER) => zstd::stream::decode_all(&data[1..])
                .map_err(|err| Error::Decompression(err.to_string())),
            Some(other) => Err(Error::Format(format!(
                "unsupported encoding (leading byte 0x{other:02x})"
            ))),
            None => Err(Error::Format("empty unpacked file".into())),
        },
    }
}

/// Decodes a packed blob's plaintext.
///
/// A set, non-zero `uncompressed_length` means the bytes are
/// zstd-compressed and must decompress to exactly that many bytes.
pub fn decode_blob(data: Vec<u8>, uncompressed_length: Option<u64>) -> Result<Vec<u8>> {
    match uncompressed_length {
        Some(expected) if expected > 0 => {
            let decompressed = zstd::bulk::decompress(&data, expected as usize)
                .map_err(|err| Error::Decompression(err.to_string()))?;
            if decompressed.len() as u64 != expected {
                return Err(Error::Decompression(format!(
                    "expected {expected} bytes, got {}",
                    decompressed.len()
                )));
            }
            Ok(decompressed)
        }
        _ => Ok(data),
    }
}
