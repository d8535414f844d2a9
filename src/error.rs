//! Crate-wide error taxonomy.
//!
//! Security-sensitive failures deliberately render as
//! "wrong password or corrupted data": the message never reveals whether
//! an integrity check or a decoding step rejected the input.

use crate::blob::BlobType;
use crate::id::Id;
use crate::store::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

/// What was being decrypted when an envelope failed to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Config,
    Key,
    Index,
    Snapshot,
    Blob,
    PackHeader,
    Link,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectKind::Config => "repository config",
            ObjectKind::Key => "key file",
            ObjectKind::Index => "index file",
            ObjectKind::Snapshot => "snapshot",
            ObjectKind::Blob => "blob",
            ObjectKind::PackHeader => "pack header",
            ObjectKind::Link => "link payload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object store failed; carries the offending key and cause.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope failed its MAC check (or was too short to carry one).
    #[error("wrong password or corrupted data ({0})")]
    Authentication(ObjectKind),

    /// No key file accepted the supplied password.
    #[error("wrong password or corrupted data")]
    BadPassword(#[source] Box<Error>),

    /// The repository has no key files at all.
    #[error("repository has no key files")]
    NoKeys,

    /// The repository config names a format version this crate cannot read.
    #[error("unsupported repository format version {0}")]
    UnsupportedVersion(u32),

    /// Malformed JSON, a bad encoding byte, a truncated structure.
    #[error("malformed repository data: {0}")]
    Format(String),

    /// The blob is in no non-superseded index.
    #[error("blob {0} is not present in the repository index")]
    BlobNotFound(Id),

    /// The blob exists but is recorded with a different type.
    #[error("blob {id} is a {actual} blob, not a {expected} blob")]
    BlobTypeMismatch {
        id: Id,
        expected: BlobType,
        actual: BlobType,
    },

    /// A path segment did not resolve to any node.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A non-final path segment resolved to something other than a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// `read_file` was handed a node that is not a regular file.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// A reassembled blob hashed to something other than its ID.
    #[error("blob {0} failed content verification")]
    Integrity(Id),

    /// A file's delivered byte count disagrees with its recorded size.
    #[error("file size mismatch: node records {expected} bytes, content holds {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// zstd rejected a compressed payload.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The snapshot prefix matched nothing.
    #[error("no snapshot matches {0:?}")]
    SnapshotNotFound(String),

    /// A concurrent fetch of the same blob failed in the request that owned it.
    #[error("shared blob fetch failed: {0}")]
    Shared(String),
}
