//! Content-addressed storage for uploaded images.
//!
//! A blob lives at `{root}/{hh}/{rest}` where `hh` is the first two hex digits
//! of the MD5 digest of its bytes and `rest` the remaining thirty. Identical
//! uploads land on the same path, so writes are idempotent and storage is
//! deduplicated for free. Directory fan-out is bounded to 256 shards.

use std::{
    fmt,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SHARD_LEN: usize = 2;
const DIGEST_HEX_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Relative location of a stored blob, `{shard}/{name}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobPath {
    shard: String,
    name: String,
}

impl BlobPath {
    fn from_digest(hex: &str) -> Self {
        let (shard, name) = hex.split_at(SHARD_LEN);
        Self {
            shard: shard.to_string(),
            name: name.to_string(),
        }
    }

    /// Validate a path received from a client. Both halves must be lowercase
    /// hex of the right length, which also rules out traversal.
    pub fn parse(shard: &str, name: &str) -> Result<Self, BlobError> {
        let is_hex = |s: &str| s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if shard.len() != SHARD_LEN
            || name.len() != DIGEST_HEX_LEN - SHARD_LEN
            || !is_hex(shard)
            || !is_hex(name)
        {
            return Err(BlobError::InvalidPath);
        }
        Ok(Self {
            shard: shard.to_string(),
            name: name.to_string(),
        })
    }

    /// Retrieval path under the media route, e.g. `/images/5e/b63b...`.
    pub fn public_path(&self, media_route: &str) -> String {
        format!("{}/{}", media_route.trim_end_matches('/'), self)
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard, self.name)
    }
}

/// Filesystem-backed content-addressed blob store.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &BlobPath) -> PathBuf {
        self.root.join(&path.shard).join(&path.name)
    }

    /// Store `bytes` and return their content address.
    ///
    /// Skips the write when the blob is already present. New blobs are
    /// written to a temporary file in the shard directory and renamed into
    /// place, so a reader never observes a partial blob.
    pub async fn put(&self, bytes: &[u8]) -> Result<BlobPath, BlobError> {
        let digest = format!("{:x}", md5::compute(bytes));
        let path = BlobPath::from_digest(&digest);
        let file_path = self.file_path(&path);

        if fs::try_exists(&file_path).await? {
            debug!(blob = %path, "blob already stored");
            return Ok(path);
        }

        let shard_dir = self.root.join(&path.shard);
        fs::create_dir_all(&shard_dir).await?;

        let tmp_path = shard_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_file(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        debug!(blob = %path, size = bytes.len(), "stored blob");
        Ok(path)
    }

    /// Open a stored blob for streaming.
    pub async fn open(&self, path: &BlobPath) -> Result<File, BlobError> {
        File::open(self.file_path(path)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(path.to_string())
            } else {
                BlobError::Io(err)
            }
        })
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn temp_store() -> (BlobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("images")).await.unwrap();
        (store, dir)
    }

    async fn shard_entries(store: &BlobStore, path: &BlobPath) -> Vec<String> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(store.root().join(&path.shard)).await.unwrap();
        while let Some(entry) = dir.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names
    }

    #[tokio::test]
    async fn path_is_derived_from_md5_digest() {
        let (store, _dir) = temp_store().await;
        let path = store.put(b"hello world").await.unwrap();
        assert_eq!(path.to_string(), "5e/b63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            path.public_path("/images/"),
            "/images/5e/b63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[tokio::test]
    async fn identical_bytes_share_one_file() {
        let (store, _dir) = temp_store().await;
        let first = store.put(b"same content").await.unwrap();
        let second = store.put(b"same content").await.unwrap();
        assert_eq!(first, second);

        assert_eq!(shard_entries(&store, &first).await, vec![first.name.clone()]);
        let on_disk = fs::read(store.file_path(&first)).await.unwrap();
        assert_eq!(on_disk, b"same content");
    }

    #[tokio::test]
    async fn distinct_bytes_get_distinct_paths() {
        let (store, _dir) = temp_store().await;
        let a = store.put(b"first image").await.unwrap();
        let b = store.put(b"second image").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_identical_puts_are_idempotent() {
        let (store, _dir) = temp_store().await;
        let payload = vec![7u8; 64 * 1024];
        let paths = futures::future::join_all((0..8).map(|_| store.put(&payload))).await;

        let first = paths[0].as_ref().unwrap().clone();
        assert!(paths.iter().all(|p| p.as_ref().unwrap() == &first));
        assert_eq!(shard_entries(&store, &first).await, vec![first.name.clone()]);
    }

    #[tokio::test]
    async fn open_streams_stored_bytes() {
        let (store, _dir) = temp_store().await;
        let path = store.put(b"pixels").await.unwrap();
        let mut file = store.open(&path).await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"pixels");
    }

    #[tokio::test]
    async fn open_missing_blob_is_not_found() {
        let (store, _dir) = temp_store().await;
        let path = BlobPath::parse("ab", "cdef0123456789abcdef0123456789").unwrap();
        assert!(matches!(store.open(&path).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn unwritable_root_surfaces_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("images")).await.unwrap();
        fs::remove_dir(store.root()).await.unwrap();
        fs::write(store.root(), b"not a directory").await.unwrap();

        assert!(matches!(store.put(b"data").await, Err(BlobError::Io(_))));
    }

    #[test]
    fn parse_rejects_non_hex_and_traversal() {
        assert!(BlobPath::parse("ab", "cdef0123456789abcdef0123456789").is_ok());
        assert!(BlobPath::parse("..", "cdef0123456789abcdef0123456789").is_err());
        assert!(BlobPath::parse("ab", "../etc/passwd").is_err());
        assert!(BlobPath::parse("AB", "cdef0123456789abcdef0123456789").is_err());
        assert!(BlobPath::parse("ab", "cdef").is_err());
    }
}
