//! The working-tree index and its binary codec.
//!
//! An index is an ordered sequence of `(path, digest, mode, size, mtime)`
//! entries describing the logical contents of one snapshot. Iteration order
//! is the insertion order produced by the scanner; equality of snapshots is
//! judged on paths and digests, not order.
//!
//! On-disk format (little-endian, packed):
//!
//! ```text
//! magic   "FIDX"            4 bytes
//! version u32               = 1
//! count   u32
//! entries, repeated `count` times:
//!   path_len u16            1..=4096
//!   path     path_len bytes
//!   digest   32 bytes
//!   mode     u32
//!   size     u64
//!   mtime    i64
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fractyl_fs_utils::write_atomic;

use crate::error::{Error, Result};
use crate::hash::{Digest, DIGEST_LEN};

const MAGIC: &[u8; 4] = b"FIDX";
const VERSION: u32 = 1;

/// Longest encodable path, in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// One tracked regular file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Relative to the repository root, forward-slash separated.
    pub path: String,
    pub digest: Digest,
    pub mode: u32,
    pub size: u64,
    /// Seconds-resolution modification time.
    pub mtime: i64,
}

/// An ordered set of [`IndexEntry`]s with unique paths.
#[derive(Clone, Debug, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
    by_path: HashMap<String, usize>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn find_entry(&self, path: &str) -> Option<&IndexEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Insert `entry`, replacing any existing entry with the same path.
    pub fn add_entry(&mut self, entry: IndexEntry) {
        match self.by_path.get(&entry.path) {
            Some(&i) => self.entries[i] = entry,
            None => self.add_entry_direct(entry),
        }
    }

    /// Append without the duplicate check. The caller guarantees the path is
    /// not already present; the scanner's traversal provides that.
    pub fn add_entry_direct(&mut self, entry: IndexEntry) {
        debug_assert!(!self.by_path.contains_key(&entry.path));
        self.by_path.insert(entry.path.clone(), self.entries.len());
        self.entries.push(entry);
    }

    pub fn remove_entry(&mut self, path: &str) -> Option<IndexEntry> {
        let i = self.by_path.remove(path)?;
        let entry = self.entries.swap_remove(i);
        if let Some(moved) = self.entries.get(i) {
            self.by_path.insert(moved.path.clone(), i);
        }
        Some(entry)
    }

    /// Serialize to the binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.entries.len() * 64);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            let path = entry.path.as_bytes();
            debug_assert!(!path.is_empty() && path.len() <= MAX_PATH_LEN);
            out.extend_from_slice(&(path.len() as u16).to_le_bytes());
            out.extend_from_slice(path);
            out.extend_from_slice(entry.digest.as_bytes());
            out.extend_from_slice(&entry.mode.to_le_bytes());
            out.extend_from_slice(&entry.size.to_le_bytes());
            out.extend_from_slice(&entry.mtime.to_le_bytes());
        }
        out
    }

    /// Decode the binary format. `origin` names the source in errors.
    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self> {
        let bad = |detail: &str| Error::bad_format(origin, detail);

        let mut r = Reader(bytes);
        if r.take(4).ok_or_else(|| bad("truncated header"))? != MAGIC {
            return Err(bad("bad magic, expected FIDX"));
        }
        let version = r.u32().ok_or_else(|| bad("truncated header"))?;
        if version != VERSION {
            return Err(bad(&format!("unsupported version {version}")));
        }
        let count = r.u32().ok_or_else(|| bad("truncated header"))?;

        let mut index = Index::new();
        for _ in 0..count {
            let path_len = r.u16().ok_or_else(|| bad("truncated entry"))? as usize;
            if path_len == 0 || path_len > MAX_PATH_LEN {
                return Err(bad(&format!("path length {path_len} out of range")));
            }
            let path = r.take(path_len).ok_or_else(|| bad("truncated path"))?;
            let path = std::str::from_utf8(path)
                .map_err(|_| bad("path is not valid UTF-8"))?
                .to_owned();
            let digest = Digest::from_slice(r.take(DIGEST_LEN).ok_or_else(|| bad("truncated digest"))?)
                .expect("slice is DIGEST_LEN bytes");
            let mode = r.u32().ok_or_else(|| bad("truncated entry"))?;
            let size = r.u64().ok_or_else(|| bad("truncated entry"))?;
            let mtime = r.i64().ok_or_else(|| bad("truncated entry"))?;

            if index.by_path.contains_key(&path) {
                return Err(bad(&format!("duplicate path {path}")));
            }
            index.add_entry_direct(IndexEntry {
                path,
                digest,
                mode,
                size,
                mtime,
            });
        }
        Ok(index)
    }

    /// Load from `path`. A missing file yields an empty index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_atomic(path, &self.to_bytes())?;
        Ok(())
    }
}

/// The digest of the index-blob: the content address under which a
/// serialized index is stored.
pub fn index_object_origin(digest: &Digest) -> PathBuf {
    PathBuf::from(format!("<index object {digest}>"))
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.0.len() < n {
            return None;
        }
        let (head, rest) = self.0.split_at(n);
        self.0 = rest;
        Some(head)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
