//! Index manifests and the in-memory blob index.
//!
//! Each `index/<id>` object decrypts to JSON listing packs and the blobs
//! they hold, plus an optional `supersedes` list naming older indexes the
//! writer replaced. Building the in-memory index is two passes over the
//! decoded manifests: collect every superseded ID, then populate the map
//! from the manifests that nothing supersedes. A superseded manifest
//! contributes nothing, whatever it says.
//!
//! Unreadable manifests are logged and skipped so a single damaged object
//! does not deny access to the rest; the build only fails when manifests
//! were listed but none loaded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobType, PackLocation};
use crate::codec;
use crate::config::FormatVersion;
use crate::crypto::MasterKey;
use crate::error::{Error, ObjectKind, Result};
use crate::id::Id;
use crate::store::{self, ObjectStore};

/// Cap on simultaneous manifest GETs while building.
const MAX_CONCURRENT_LOADS: usize = 8;

/// The JSON body of an `index/<id>` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<Id>,
    pub packs: Vec<IndexPack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPack {
    pub id: Id,
    pub blobs: Vec<IndexBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBlob {
    pub id: Id,
    #[serde(rename = "type")]
    pub blob_type: BlobType,
    pub offset: u64,
    pub length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncompressed_length: Option<u64>,
}

/// The in-memory map from blob ID to pack location.
pub struct BlobIndex {
    map: HashMap<Id, PackLocation>,
}

impl BlobIndex {
    /// Loads every non-superseded index manifest and builds the map.
    pub fn load(
        store: &dyn ObjectStore,
        master: &MasterKey,
        version: FormatVersion,
    ) -> Result<BlobIndex> {
        let listing = store.list(store::INDEX_PREFIX).map_err(Error::Transport)?;
        let mut entries = Vec::with_capacity(listing.len());
        for key in listing {
            match Id::from_hex(store::key_basename(&key)) {
                Ok(id) => entries.push((id, key)),
                Err(err) => warn!("ignoring stray object {key}: {err}"),
            }
        }

        let files = load_all(store, master, version, &entries)?;

        let mut superseded = HashSet::new();
        for (_, file) in &files {
            superseded.extend(file.supersedes.iter().copied());
        }

        let mut index = BlobIndex {
            map: HashMap::new(),
        };
        for (id, file) in files {
            if superseded.contains(&id) {
                debug!("index {id} is superseded, skipping");
                continue;
            }
            for pack in file.packs {
                for blob in pack.blobs {
                    index.insert(pack.id, blob)?;
                }
            }
        }
        debug!("blob index holds {} entries", index.len());
        Ok(index)
    }

    fn insert(&mut self, pack: Id, blob: IndexBlob) -> Result<()> {
        match self.map.entry(blob.id) {
            std::collections::hash_map::Entry::Occupied(existing) => {
                // duplicates across overlapping indexes are fine (the
                // content is identical); disagreeing compression metadata
                // is not, it would change what the accessor decodes
                if existing.get().uncompressed_length != blob.uncompressed_length {
                    return Err(Error::Format(format!(
                        "conflicting uncompressed lengths recorded for blob {}",
                        blob.id
                    )));
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(PackLocation {
                    pack,
                    blob_type: blob.blob_type,
                    offset: blob.offset,
                    length: blob.length,
                    uncompressed_length: blob.uncompressed_length,
                });
            }
        }
        Ok(())
    }

    /// Looks up a blob's pack location, checking the recorded type.
    pub fn find(&self, id: &Id, blob_type: BlobType) -> Result<&PackLocation> {
        let location = self.map.get(id).ok_or(Error::BlobNotFound(*id))?;
        if location.blob_type != blob_type {
            return Err(Error::BlobTypeMismatch {
                id: *id,
                expected: blob_type,
                actual: location.blob_type,
            });
        }
        Ok(location)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.map.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Fetches and decodes every listed manifest, at most
/// [`MAX_CONCURRENT_LOADS`] GETs in flight.
fn load_all(
    store: &dyn ObjectStore,
    master: &MasterKey,
    version: FormatVersion,
    entries: &[(Id, String)],
) -> Result<Vec<(Id, IndexFile)>> {
    let files = Mutex::new(Vec::with_capacity(entries.len()));
    let last_failure = Mutex::new(None);
    let cursor = AtomicUsize::new(0);
    let workers = entries.len().clamp(1, MAX_CONCURRENT_LOADS);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let slot = cursor.fetch_add(1, Ordering::Relaxed);
                let Some((id, key)) = entries.get(slot) else {
                    break;
                };
                match load_one(store, master, version, key) {
                    Ok(file) => files.lock().expect("index lock poisoned").push((*id, file)),
                    Err(err) => {
                        warn!("skipping unreadable index {id}: {err}");
                        *last_failure.lock().expect("index lock poisoned") = Some(err);
                    }
                }
            });
        }
    });

    let files = files.into_inner().expect("index lock poisoned");
    if files.is_empty() && !entries.is_empty() {
        let cause = last_failure
            .into_inner()
            .expect("index lock poisoned")
            .unwrap_or_else(|| Error::Format("no index manifest could be read".into()));
        return Err(cause);
    }
    Ok(files)
}

fn load_one(
    store: &dyn ObjectStore,
    master: &MasterKey,
    version: FormatVersion,
    key: &str,
) -> Result<IndexFile> {
    let body = store.get(key).map_err(Error::Transport)?;
    let plaintext = master.open(&body, ObjectKind::Index)?;
    let json = codec::decode_unpacked(version, plaintext)?;
    serde_json::from_slice(&json).map_err(|err| Error::Format(format!("bad index {key}: {err}")))
}
