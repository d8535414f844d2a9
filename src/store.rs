//! The object-store capability the engine reads through.
//!
//! Everything the engine touches goes through the four-method
//! [`ObjectStore`] trait: paginated listing, whole-object GET, ranged GET
//! and HEAD. Adapters own request signing, path/virtual-host addressing and
//! the optional repository prefix; the engine only ever emits the relative
//! keys built by the helpers below.
//!
//! The repository namespace:
//!
//! ```ascii
//! config                  repository config (single object)
//! keys/<id-hex>           key files
//! snapshots/<id-hex>      snapshot records
//! index/<id-hex>          index manifests
//! data/<XX>/<id-hex>      packs, sharded by the first two hex chars
//! locks/<id-hex>          never read by this crate
//! ```

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::id::Id;

/// Key of the repository config object.
pub const CONFIG_KEY: &str = "config";
/// Prefix under which key files live.
pub const KEY_PREFIX: &str = "keys/";
/// Prefix under which snapshot records live.
pub const SNAPSHOT_PREFIX: &str = "snapshots/";
/// Prefix under which index manifests live.
pub const INDEX_PREFIX: &str = "index/";

/// Builds the object key of a key file.
pub fn key_key(id: &Id) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Builds the object key of a snapshot record.
pub fn snapshot_key(id: &Id) -> String {
    format!("{SNAPSHOT_PREFIX}{id}")
}

/// Builds the object key of an index manifest.
pub fn index_key(id: &Id) -> String {
    format!("{INDEX_PREFIX}{id}")
}

/// Builds the object key of a pack, sharded by the first two hex characters.
pub fn pack_key(id: &Id) -> String {
    let hex = id.to_hex();
    format!("data/{}/{}", &hex[..2], hex)
}

/// The basename of an object key, used to recover IDs from listings.
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// A transport failure surfaced by an adapter.
#[derive(Debug, thiserror::Error)]
#[error("object store request for {key:?} failed: {source}")]
pub struct TransportError {
    pub key: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new(
        key: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TransportError {
            key: key.into(),
            source: source.into(),
        }
    }

    fn not_found(key: &str) -> Self {
        TransportError::new(
            key,
            std::io::Error::new(std::io::ErrorKind::NotFound, "object does not exist"),
        )
    }
}

/// HEAD metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
}

/// Narrow capability over an opaque bucket.
///
/// `list` follows the store's pagination until exhausted. `get_range` must
/// return exactly `length` bytes on success; an adapter talking to a store
/// that answers a range request with the whole object truncates the
/// response itself.
pub trait ObjectStore: Send + Sync {
    fn list(&self, prefix: &str) -> Result<Vec<String>, TransportError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, TransportError>;
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>, TransportError>;
    fn head(&self, key: &str) -> Result<ObjectInfo, TransportError>;
}

/// An in-memory [`ObjectStore`] over a sorted map.
///
/// Listing order is lexicographic. Used by the fixture builders in this
/// crate's test suite and handy for downstream tests; it is not a backend
/// for real repositories.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .write()
            .expect("store lock poisoned")
            .insert(key.into(), bytes);
    }

    pub fn remove(&self, key: &str) {
        self.objects
            .write()
            .expect("store lock poisoned")
            .remove(key);
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, TransportError> {
        let objects = self.objects.read().expect("store lock poisoned");
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, TransportError> {
        let objects = self.objects.read().expect("store lock poisoned");
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::not_found(key))
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>, TransportError> {
        let objects = self.objects.read().expect("store lock poisoned");
        let body = objects
            .get(key)
            .ok_or_else(|| TransportError::not_found(key))?;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= body.len() as u64)
            .ok_or_else(|| {
                TransportError::new(
                    key,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "range {offset}+{length} outside object of {} bytes",
                            body.len()
                        ),
                    ),
                )
            })?;
        Ok(body[offset as usize..end as usize].to_vec())
    }

    fn head(&self, key: &str) -> Result<ObjectInfo, TransportError> {
        let objects = self.objects.read().expect("store lock poisoned");
        let body = objects
            .get(key)
            .ok_or_else(|| TransportError::not_found(key))?;
        Ok(ObjectInfo {
            size: body.len() as u64,
        })
    }
}
