//! The repository facade.
//!
//! [`Repository::open`] unlocks the master key and validates the config;
//! the opened value then serves snapshot enumeration, tree walks and file
//! reads. It is reentrant and thread-safe: the master key and config are
//! written once at open, the blob index is built lazily under a blocking
//! one-shot guard, and an in-flight map deduplicates concurrent fetches
//! of the same blob so overlapping requests share one ranged GET. The
//! engine never retries; transport failures surface to the caller.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::blob::BlobType;
use crate::config::{Config, FormatVersion};
use crate::crypto::MasterKey;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::index::BlobIndex;
use crate::inflight::{Claim, InflightMap};
use crate::key;
use crate::pack::{self, PackEntry};
use crate::snapshot::{self, Snapshot};
use crate::store::{self, ObjectStore};
use crate::tree::{self, Node, NodeType, Tree};

/// Read-path policy knobs.
#[derive(Debug, Clone, Default)]
pub struct RepoOptions {
    /// Hash every materialized blob and compare against its ID.
    pub verify_blobs: bool,
}

/// What `browse` resolved: the tree the path landed in, and the addressed
/// node (`None` when the path was the snapshot root).
#[derive(Debug, Clone)]
pub struct BrowseResult {
    pub tree: Tree,
    pub node: Option<Node>,
}

pub struct Repository {
    store: Arc<dyn ObjectStore>,
    master: MasterKey,
    config: Config,
    version: FormatVersion,
    options: RepoOptions,
    index: Mutex<Option<Arc<BlobIndex>>>,
    inflight: InflightMap<Id, Arc<Vec<u8>>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("version", &self.version)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens the repository: config GET, key unlock, config decode,
    /// version check, in that order.
    pub fn open(store: Arc<dyn ObjectStore>, password: &str) -> Result<Repository> {
        Self::open_with(store, password, RepoOptions::default())
    }

    pub fn open_with(
        store: Arc<dyn ObjectStore>,
        password: &str,
        options: RepoOptions,
    ) -> Result<Repository> {
        let config_body = store.get(store::CONFIG_KEY).map_err(Error::Transport)?;
        let master = key::unlock(store.as_ref(), password)?;
        let (config, version) = Config::decode(&master, &config_body)?;
        debug!(
            "opened repository {} (format version {})",
            config.id,
            version.as_u32()
        );

        Ok(Repository {
            store,
            master,
            config,
            version,
            options,
            index: Mutex::new(None),
            inflight: InflightMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Enumerates snapshots, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<(Id, Snapshot)>> {
        snapshot::list(self.store.as_ref(), &self.master, self.version)
    }

    /// Resolves a snapshot by a unique hex prefix of its ID.
    pub fn find_snapshot(&self, prefix: &str) -> Result<(Id, Snapshot)> {
        snapshot::find(self.store.as_ref(), &self.master, self.version, prefix)
    }

    /// Loads a snapshot's root tree.
    pub fn load_snapshot_tree(&self, snapshot: &Snapshot) -> Result<Tree> {
        self.load_tree(&snapshot.tree)
    }

    /// Loads a tree blob by ID.
    pub fn load_tree(&self, id: &Id) -> Result<Tree> {
        let bytes = self.blob(id, BlobType::Tree)?;
        Tree::from_bytes(&bytes)
    }

    /// Walks `path` from the snapshot root.
    ///
    /// An empty path (or one made only of `/` and `.`) resolves to the
    /// root tree with no node. A final segment naming a directory
    /// resolves to that directory's own listing; anything else resolves
    /// to the tree containing the node. Errors name the longest prefix
    /// that was walked when the failure happened.
    pub fn browse(&self, snapshot: &Snapshot, path: &str) -> Result<BrowseResult> {
        let segments = tree::split_path(path);
        let mut current = self.load_snapshot_tree(snapshot)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(BrowseResult {
                tree: current,
                node: None,
            });
        };

        let mut walked = String::new();
        for segment in parents {
            walked.push('/');
            walked.push_str(segment);
            let node = current
                .find(segment)
                .ok_or_else(|| Error::PathNotFound(walked.clone()))?;
            let subtree = match (node.node_type, node.subtree) {
                (NodeType::Dir, Some(subtree)) => subtree,
                _ => return Err(Error::NotADirectory(walked)),
            };
            current = self.load_tree(&subtree)?;
        }

        walked.push('/');
        walked.push_str(last);
        let node = current
            .find(last)
            .ok_or(Error::PathNotFound(walked))?
            .clone();
        if let (NodeType::Dir, Some(subtree)) = (node.node_type, node.subtree) {
            let listing = self.load_tree(&subtree)?;
            return Ok(BrowseResult {
                tree: listing,
                node: Some(node),
            });
        }
        Ok(BrowseResult {
            tree: current,
            node: Some(node),
        })
    }

    /// Streams a file's bytes, one content blob per chunk, in recorded
    /// order.
    pub fn read_file(&self, node: &Node) -> Result<FileReader<'_>> {
        if !node.is_file() {
            return Err(Error::NotAFile(node.name.clone()));
        }
        Ok(FileReader {
            repo: self,
            content: node.content.clone().unwrap_or_default().into_iter(),
            expected: node.size,
            delivered: 0,
            finished: false,
        })
    }

    /// Parses a pack's header without reading its blobs.
    pub fn pack_entries(&self, pack: &Id) -> Result<Vec<PackEntry>> {
        pack::read_header(self.store.as_ref(), &self.master, pack)
    }

    /// Drops the repository; the master key is zeroed as part of the
    /// drop.
    pub fn close(self) {}

    /// The blob index, built on first use. Concurrent first lookups block
    /// on the builder; a successful build is never repeated. A failed
    /// build is not cached, the next lookup tries again.
    fn index(&self) -> Result<Arc<BlobIndex>> {
        let mut guard = self.index.lock().expect("index guard poisoned");
        if let Some(index) = guard.as_ref() {
            return Ok(index.clone());
        }
        let built = Arc::new(BlobIndex::load(
            self.store.as_ref(),
            &self.master,
            self.version,
        )?);
        *guard = Some(built.clone());
        Ok(built)
    }

    /// Fetches a blob's plaintext, deduplicating concurrent requests for
    /// the same ID. Followers of a fetch that failed see [`Error::Shared`]
    /// with the owner's rendered failure; the owner's caller gets the
    /// typed original.
    fn blob(&self, id: &Id, blob_type: BlobType) -> Result<Arc<Vec<u8>>> {
        let index = self.index()?;
        let location = index.find(id, blob_type)?.clone();

        match self.inflight.claim(*id) {
            Claim::Leader(claim) => {
                let fetched = pack::read_blob(
                    self.store.as_ref(),
                    &self.master,
                    id,
                    &location,
                    self.options.verify_blobs,
                )
                .map(Arc::new);
                claim.publish(match &fetched {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(err) => Err(err.to_string()),
                });
                fetched
            }
            Claim::Follower(waiter) => waiter.wait().map_err(Error::Shared),
        }
    }
}

/// Iterator over a file's chunks, yielded strictly in `content` order.
///
/// After the last chunk, a node size that disagrees with the delivered
/// total surfaces as a final [`Error::SizeMismatch`] item; the bytes
/// already handed out stay valid.
pub struct FileReader<'a> {
    repo: &'a Repository,
    content: std::vec::IntoIter<Id>,
    expected: Option<u64>,
    delivered: u64,
    finished: bool,
}

impl std::fmt::Debug for FileReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("expected", &self.expected)
            .field("delivered", &self.delivered)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FileReader<'_> {
    /// Collects the whole stream into one buffer.
    pub fn read_to_vec(self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for chunk in self {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

impl Iterator for FileReader<'_> {
    type Item = Result<Arc<Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.content.next() {
            Some(id) => match self.repo.blob(&id, BlobType::Data) {
                Ok(chunk) => {
                    self.delivered += chunk.len() as u64;
                    Some(Ok(chunk))
                }
                Err(err) => {
                    self.finished = true;
                    Some(Err(err))
                }
            },
            None => {
                self.finished = true;
                match self.expected {
                    Some(expected) if expected != self.delivered => {
                        Some(Err(Error::SizeMismatch {
                            expected,
                            actual: self.delivered,
                        }))
                    }
                    _ => None,
                }
            }
        }
    }
}
