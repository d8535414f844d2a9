//! The repository config object.
//!
//! A small record stored encrypted at the object key `config`: the format
//! version, the repository UUID and the content-chunker polynomial of the
//! writer that created it.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::MasterKey;
use crate::error::{Error, ObjectKind, Result};

/// The two repository format versions this crate reads.
///
/// Version 1 never uses compression; version 2 may compress both unpacked
/// files and packed blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
}

impl FormatVersion {
    pub fn as_u32(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for FormatVersion {
    type Error = Error;

    fn try_from(version: u32) -> Result<Self> {
        match version {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    pub id: String,
    pub chunker_polynomial: String,
}

impl Config {
    /// Decrypts and decodes the config object body, validating the version.
    ///
    /// The version is only known after parsing, so the bytes are decoded
    /// under version-2 rules; those accept everything a version-1 config
    /// can be.
    pub fn decode(master: &MasterKey, body: &[u8]) -> Result<(Config, FormatVersion)> {
        let plaintext = master.open(body, ObjectKind::Config)?;
        let json = codec::decode_unpacked(FormatVersion::V2, plaintext)?;
        let config: Config = serde_json::from_slice(&json)
            .map_err(|err| Error::Format(format!("bad config: {err}")))?;
        let version = FormatVersion::try_from(config.version)?;
        Ok((config, version))
    }
}
