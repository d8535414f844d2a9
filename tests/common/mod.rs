//! Fixture repositories for the integration tests.
//!
//! Everything is authored in-memory against [`MemoryStore`], using the
//! same seal primitives the engine reads with: a config object, key
//! files, packs with real headers, index manifests and snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use cairn::blob::BlobType;
use cairn::config::Config;
use cairn::crypto::MasterKey;
use cairn::id::Id;
use cairn::index::{IndexBlob, IndexFile, IndexPack};
use cairn::key::{KeyFile, MacKeyFile, MasterKeyFile};
use cairn::snapshot::Snapshot;
use cairn::store::{self, MemoryStore, ObjectInfo, ObjectStore, TransportError};
use cairn::tree::{Node, NodeType, Tree};

pub const PASSWORD: &str = "correct horse";
pub const WRONG_PASSWORD: &str = "battery staple";

/// Fast scrypt parameters for fixtures whose point is not the KDF.
pub const CHEAP_N: u64 = 4;
pub const CHEAP_R: u32 = 8;
pub const CHEAP_P: u32 = 1;

const MASTER_ENCRYPT: [u8; 32] = [0x21; 32];
const MASTER_MAC_K: [u8; 16] = [0x42; 16];
const MASTER_MAC_R: [u8; 16] = [0x63; 16];

pub struct RepoBuilder {
    pub store: Arc<MemoryStore>,
    master: MasterKey,
    rng: StdRng,
}

impl RepoBuilder {
    /// An empty repository with a config but no keys yet.
    pub fn new(version: u32) -> RepoBuilder {
        let mut builder = RepoBuilder {
            store: Arc::new(MemoryStore::new()),
            master: MasterKey::from_parts(MASTER_ENCRYPT, MASTER_MAC_K, MASTER_MAC_R),
            rng: StdRng::seed_from_u64(0xcafe),
        };
        let config = serde_json::to_vec(&Config {
            version,
            id: "5c296b47-8f0d-42f9-a1c2-9f8e6b3d7a10".into(),
            chunker_polynomial: "3da3358b4dc173".into(),
        })
        .expect("config serializes");
        let body = builder.seal(&config);
        builder.store.insert(store::CONFIG_KEY, body);
        builder
    }

    /// The usual fixture: version `version`, one key file under
    /// [`PASSWORD`] with cheap KDF parameters.
    pub fn standard(version: u32) -> RepoBuilder {
        let mut builder = RepoBuilder::new(version);
        builder.add_key(PASSWORD, CHEAP_N, CHEAP_R, CHEAP_P, [0x5a; 32]);
        builder
    }

    fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let iv: [u8; 16] = self.rng.gen();
        self.master.seal(&iv, plaintext)
    }

    fn fresh_id(&mut self) -> Id {
        Id::from_bytes(self.rng.gen())
    }

    /// Writes a key file sealing the fixture master key under `password`.
    pub fn add_key(&mut self, password: &str, n: u64, r: u32, p: u32, salt: [u8; 32]) {
        let record = MasterKeyFile {
            mac: MacKeyFile {
                k: BASE64.encode(MASTER_MAC_K),
                r: BASE64.encode(MASTER_MAC_R),
            },
            encrypt: BASE64.encode(MASTER_ENCRYPT),
        };
        let user_key = MasterKey::derive(password, &salt, n, r, p).expect("derive fixture key");
        let iv: [u8; 16] = self.rng.gen();
        let sealed = user_key.seal(&iv, &serde_json::to_vec(&record).expect("record serializes"));

        let file = KeyFile {
            created: Some("2024-05-01T10:00:00Z".into()),
            username: Some("alice".into()),
            hostname: Some("workstation".into()),
            kdf: "scrypt".into(),
            n,
            r,
            p,
            salt: BASE64.encode(salt),
            data: BASE64.encode(sealed),
        };
        let id = self.fresh_id();
        self.store.insert(
            store::key_key(&id),
            serde_json::to_vec(&file).expect("key file serializes"),
        );
    }

    pub fn new_pack(&self) -> PackBuilder {
        PackBuilder {
            body: Vec::new(),
            blobs: Vec::new(),
        }
    }

    /// Appends a blob to the pack, returning its content address.
    pub fn add_blob(
        &mut self,
        pack: &mut PackBuilder,
        blob_type: BlobType,
        plaintext: &[u8],
        compress: bool,
    ) -> Id {
        let id = Id::from_slice(&Sha256::digest(plaintext)).expect("digest is 32 bytes");
        let (payload, uncompressed_length) = if compress {
            let compressed = zstd::bulk::compress(plaintext, 0).expect("zstd compress");
            (compressed, Some(plaintext.len() as u64))
        } else {
            (plaintext.to_vec(), None)
        };
        let sealed = self.seal(&payload);
        pack.blobs.push(IndexBlob {
            id,
            blob_type,
            offset: pack.body.len() as u64,
            length: sealed.len() as u64,
            uncompressed_length,
        });
        pack.body.extend_from_slice(&sealed);
        id
    }

    /// Seals the header, stores the pack and returns its index entry.
    pub fn finish_pack(&mut self, pack: PackBuilder) -> IndexPack {
        let mut header = Vec::new();
        for blob in &pack.blobs {
            let type_byte = match (blob.blob_type, blob.uncompressed_length) {
                (BlobType::Data, None) => 0u8,
                (BlobType::Tree, None) => 1,
                (BlobType::Data, Some(_)) => 2,
                (BlobType::Tree, Some(_)) => 3,
            };
            header.push(type_byte);
            header.extend_from_slice(&(blob.length as u32).to_le_bytes());
            if let Some(n) = blob.uncompressed_length {
                header.extend_from_slice(&(n as u32).to_le_bytes());
            }
            header.extend_from_slice(blob.id.as_bytes());
        }
        let sealed_header = self.seal(&header);

        let mut body = pack.body;
        body.extend_from_slice(&sealed_header);
        body.extend_from_slice(&(sealed_header.len() as u32).to_le_bytes());

        let id = Id::from_slice(&Sha256::digest(&body)).expect("digest is 32 bytes");
        self.store.insert(store::pack_key(&id), body);
        IndexPack {
            id,
            blobs: pack.blobs,
        }
    }

    /// Writes an index manifest, optionally zstd-tagged (version 2 only).
    pub fn write_index(&mut self, supersedes: Vec<Id>, packs: Vec<IndexPack>, compress: bool) -> Id {
        let json = serde_json::to_vec(&IndexFile { supersedes, packs }).expect("index serializes");
        let encoded = if compress {
            let mut encoded = vec![0x02];
            encoded.extend_from_slice(&zstd::bulk::compress(&json, 0).expect("zstd compress"));
            encoded
        } else {
            json
        };
        let body = self.seal(&encoded);
        let id = self.fresh_id();
        self.store.insert(store::index_key(&id), body);
        id
    }

    pub fn add_snapshot(&mut self, time: &str, tree: Id) -> (Id, Snapshot) {
        let snapshot = Snapshot {
            time: time.parse().expect("fixture timestamp parses"),
            parent: None,
            tree,
            paths: vec!["/home".into()],
            hostname: Some("workstation".into()),
            username: Some("alice".into()),
            tags: None,
            excludes: None,
            summary: None,
        };
        let body = self.seal(&serde_json::to_vec(&snapshot).expect("snapshot serializes"));
        let id = self.fresh_id();
        self.store.insert(store::snapshot_key(&id), body);
        (id, snapshot)
    }
}

pub struct PackBuilder {
    body: Vec<u8>,
    blobs: Vec<IndexBlob>,
}

/// A directory node pointing at a subtree.
pub fn dir_node(name: &str, subtree: Id) -> Node {
    Node {
        name: name.into(),
        node_type: NodeType::Dir,
        mode: Some(0o755),
        mtime: Some("2024-01-01T10:30:00Z".parse().expect("fixture timestamp")),
        atime: None,
        ctime: None,
        uid: Some(1000),
        gid: Some(1000),
        user: Some("alice".into()),
        group: None,
        size: None,
        content: None,
        subtree: Some(subtree),
        linktarget: None,
    }
}

/// A regular-file node over the given content blobs.
pub fn file_node(name: &str, size: u64, content: Vec<Id>) -> Node {
    Node {
        name: name.into(),
        node_type: NodeType::File,
        mode: Some(0o644),
        mtime: Some("2024-01-01T10:30:00Z".parse().expect("fixture timestamp")),
        atime: None,
        ctime: None,
        uid: Some(1000),
        gid: Some(1000),
        user: Some("alice".into()),
        group: None,
        size: Some(size),
        content: Some(content),
        subtree: None,
        linktarget: None,
    }
}

pub fn tree_json(nodes: Vec<Node>) -> Vec<u8> {
    serde_json::to_vec(&Tree { nodes }).expect("tree serializes")
}

/// An [`ObjectStore`] wrapper counting calls, with an optional delay in
/// `get_range` to widen the window in which concurrent fetches overlap.
pub struct CountingStore {
    inner: Arc<MemoryStore>,
    lists: Mutex<HashMap<String, usize>>,
    range_gets: Mutex<HashMap<String, usize>>,
    range_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new(inner: Arc<MemoryStore>, range_delay: Option<Duration>) -> CountingStore {
        CountingStore {
            inner,
            lists: Mutex::new(HashMap::new()),
            range_gets: Mutex::new(HashMap::new()),
            range_delay,
        }
    }

    pub fn list_count(&self, prefix: &str) -> usize {
        *self.lists.lock().unwrap().get(prefix).unwrap_or(&0)
    }

    /// Ranged-GET count for one blob, identified by its pack key and
    /// offset.
    pub fn range_get_count(&self, key: &str, offset: u64) -> usize {
        *self
            .range_gets
            .lock()
            .unwrap()
            .get(&format!("{key}@{offset}"))
            .unwrap_or(&0)
    }
}

impl ObjectStore for CountingStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, TransportError> {
        *self.lists.lock().unwrap().entry(prefix.into()).or_insert(0) += 1;
        self.inner.list(prefix)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, TransportError> {
        self.inner.get(key)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>, TransportError> {
        *self
            .range_gets
            .lock()
            .unwrap()
            .entry(format!("{key}@{offset}"))
            .or_insert(0) += 1;
        if let Some(delay) = self.range_delay {
            std::thread::sleep(delay);
        }
        self.inner.get_range(key, offset, length)
    }

    fn head(&self, key: &str) -> Result<ObjectInfo, TransportError> {
        self.inner.head(key)
    }
}
