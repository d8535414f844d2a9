//! Snapshot records and enumeration.
//!
//! A snapshot under `snapshots/<id>` decrypts to a JSON record pointing
//! at one root tree blob. The object-key basename is the snapshot's own
//! ID; nothing inside the record repeats it.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config::FormatVersion;
use crate::crypto::MasterKey;
use crate::error::{Error, ObjectKind, Result};
use crate::id::Id;
use crate::store::{self, ObjectStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    pub tree: Id,
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excludes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

/// Enumerates every readable snapshot, newest first.
///
/// Ordering is by recorded time descending, ties broken by ID. Unreadable
/// snapshots are logged and skipped rather than failing the listing.
pub fn list(
    store: &dyn ObjectStore,
    master: &MasterKey,
    version: FormatVersion,
) -> Result<Vec<(Id, Snapshot)>> {
    let listing = store
        .list(store::SNAPSHOT_PREFIX)
        .map_err(Error::Transport)?;

    let mut snapshots = Vec::with_capacity(listing.len());
    for key in listing {
        let id = match Id::from_hex(store::key_basename(&key)) {
            Ok(id) => id,
            Err(err) => {
                warn!("ignoring stray object {key}: {err}");
                continue;
            }
        };
        match load_one(store, master, version, &key) {
            Ok(snapshot) => snapshots.push((id, snapshot)),
            Err(err) => warn!("skipping unreadable snapshot {id}: {err}"),
        }
    }

    snapshots.sort_by(|(a_id, a), (b_id, b)| b.time.cmp(&a.time).then_with(|| a_id.cmp(b_id)));
    Ok(snapshots)
}

/// Resolves a snapshot by a unique hex prefix of its ID.
pub fn find(
    store: &dyn ObjectStore,
    master: &MasterKey,
    version: FormatVersion,
    prefix: &str,
) -> Result<(Id, Snapshot)> {
    let listing = store
        .list(store::SNAPSHOT_PREFIX)
        .map_err(Error::Transport)?;

    let mut matches = Vec::new();
    for key in listing {
        if let Ok(id) = Id::from_hex(store::key_basename(&key)) {
            if id.starts_with_hex(prefix) {
                matches.push((id, key));
            }
        }
    }
    match matches.as_slice() {
        [] => Err(Error::SnapshotNotFound(prefix.to_string())),
        [(id, key)] => Ok((*id, load_one(store, master, version, key)?)),
        _ => Err(Error::Format(format!(
            "snapshot prefix {prefix:?} is ambiguous ({} matches)",
            matches.len()
        ))),
    }
}

fn load_one(
    store: &dyn ObjectStore,
    master: &MasterKey,
    version: FormatVersion,
    key: &str,
) -> Result<Snapshot> {
    let body = store.get(key).map_err(Error::Transport)?;
    let plaintext = master.open(&body, ObjectKind::Snapshot)?;
    let json = codec::decode_unpacked(version, plaintext)?;
    serde_json::from_slice(&json)
        .map_err(|err| Error::Format(format!("bad snapshot {key}: {err}")))
}
