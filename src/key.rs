//! Key files and the password unlock protocol.
//!
//! A repository carries one or more key files under `keys/`. Each is a
//! plain-JSON record naming its KDF (always scrypt here), the KDF
//! parameters and salt, and a base64 `data` field. `data` is an
//! authenticated envelope sealed under the password-derived key; it
//! decrypts to the master-key record
//! `{"mac":{"k":"<b64>","r":"<b64>"},"encrypt":"<b64>"}`.
//!
//! Unlocking tries each key file in listing order. A wrong password shows
//! up as a failed MAC on the `data` envelope, never as a JSON parse
//! error, so password rejection does not depend on decode luck. The first
//! key file that authenticates wins; if none does, the last failure is
//! reported.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::crypto::MasterKey;
use crate::error::{Error, ObjectKind, Result};
use crate::store::{self, ObjectStore};

const KDF_SCRYPT: &str = "scrypt";

/// The plain-JSON body of a `keys/<id>` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub kdf: String,
    #[serde(rename = "N")]
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub salt: String,
    pub data: String,
}

/// The master-key record sealed inside a key file's `data` field.
#[derive(Debug, Serialize, Deserialize)]
pub struct MasterKeyFile {
    pub mac: MacKeyFile,
    pub encrypt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MacKeyFile {
    pub k: String,
    pub r: String,
}

impl MasterKeyFile {
    pub fn into_key(self) -> Result<MasterKey> {
        Ok(MasterKey::from_parts(
            decode_b64_array(&self.encrypt, "encrypt")?,
            decode_b64_array(&self.mac.k, "mac.k")?,
            decode_b64_array(&self.mac.r, "mac.r")?,
        ))
    }
}

fn decode_b64_array<const N: usize>(field: &str, name: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(field)
        .map_err(|err| Error::Format(format!("bad base64 in master key {name}: {err}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::Format(format!(
            "master key {name} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Discovers key files and unlocks one with the password.
pub fn unlock(store: &dyn ObjectStore, password: &str) -> Result<MasterKey> {
    let listing = store.list(store::KEY_PREFIX).map_err(Error::Transport)?;
    if listing.is_empty() {
        return Err(Error::NoKeys);
    }

    let mut last_failure = None;
    for key in &listing {
        match try_key_file(store, key, password) {
            Ok(master) => {
                debug!("unlocked repository with {key}");
                return Ok(master);
            }
            Err(err) => {
                debug!("key file {key} did not unlock: {err}");
                last_failure = Some(err);
            }
        }
    }

    // listing was non-empty, so at least one attempt recorded a failure
    let cause = last_failure.unwrap_or(Error::NoKeys);
    Err(Error::BadPassword(Box::new(cause)))
}

fn try_key_file(store: &dyn ObjectStore, key: &str, password: &str) -> Result<MasterKey> {
    let body = store.get(key).map_err(Error::Transport)?;
    let file: KeyFile = serde_json::from_slice(&body)
        .map_err(|err| Error::Format(format!("bad key file {key}: {err}")))?;

    if file.kdf != KDF_SCRYPT {
        warn!("key file {key} uses unsupported KDF {:?}", file.kdf);
        return Err(Error::Format(format!("unsupported KDF {:?}", file.kdf)));
    }

    let salt = BASE64
        .decode(&file.salt)
        .map_err(|err| Error::Format(format!("bad salt in {key}: {err}")))?;
    let sealed = BASE64
        .decode(&file.data)
        .map_err(|err| Error::Format(format!("bad data in {key}: {err}")))?;

    let user_key = MasterKey::derive(password, &salt, file.n, file.r, file.p)?;
    let plaintext = user_key.open(&sealed, ObjectKind::Key)?;

    let record: MasterKeyFile = serde_json::from_slice(&plaintext)
        .map_err(|err| Error::Format(format!("bad master key record in {key}: {err}")))?;
    record.into_key()
}
