//! The persistent per-branch stat cache.
//!
//! The cache is the engine of fast change detection: it records, for every
//! path seen by the previous snapshot, the stat metadata and a digest hint.
//! On the next snapshot a parallel `lstat` sweep over the cached paths
//! classifies each file as unchanged, changed or deleted without reading a
//! single file body.
//!
//! On-disk format (host-native endianness; the file never leaves the host
//! and is regenerated from scratch when absent):
//!
//! ```text
//! header:
//!   signature  u32   0x46524143 ("FRAC")
//!   version    u32   = 1
//!   entry_count u32
//!   checksum   u32   reserved, zero
//!   branch     [u8;16] null-padded
//!   timestamp  u64   seconds since epoch at save time
//! entries, `entry_count` fixed-width packed records:
//!   mtime_sec/mtime_nsec   u32, u32
//!   ctime_sec/ctime_nsec   u32, u32
//!   size                   u64
//!   inode                  u64
//!   device                 u32
//!   mode                   u32
//!   uid                    u32
//!   gid                    u32
//!   digest prefix          [u8;20]
//!   path_length            u16
//!   flags                  u16
//! then, in the same order, `path_length` bytes of path per entry.
//! ```
//!
//! The digest field stores only the first 20 bytes of the SHA-256; it is a
//! hint layer. Full digests always come from the prior index or from fresh
//! hashing.

use std::collections::HashMap;
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use fractyl_fs_utils::write_atomic;
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::hash::Digest;

const SIGNATURE: u32 = 0x4652_4143;
const VERSION: u32 = 1;
const ENTRY_LEN: usize = 72;
const DIGEST_PREFIX_LEN: usize = 20;
const BRANCH_FIELD_LEN: usize = 16;

// Header field offsets; `parse` and `save` must agree on these.
const HEADER_COUNT_OFF: usize = 8;
const HEADER_BRANCH_OFF: usize = 16;
const HEADER_TIMESTAMP_OFF: usize = HEADER_BRANCH_OFF + BRANCH_FIELD_LEN;
const HEADER_LEN: usize = HEADER_TIMESTAMP_OFF + 8;

/// Classification of a file against the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Unchanged,
    Changed,
    New,
}

/// Stat metadata for one cached path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheEntry {
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub size: u64,
    pub inode: u64,
    pub device: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub digest_prefix: [u8; DIGEST_PREFIX_LEN],
    pub flags: u16,
}

/// The fields of `stat` the cache compares and stores.
#[derive(Clone, Copy, Debug)]
pub struct StatFields {
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub size: u64,
    pub inode: u64,
    pub device: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[cfg(unix)]
impl StatFields {
    pub fn from_metadata(md: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            mtime_sec: md.mtime() as u32,
            mtime_nsec: md.mtime_nsec() as u32,
            ctime_sec: md.ctime() as u32,
            ctime_nsec: md.ctime_nsec() as u32,
            size: md.len(),
            inode: md.ino(),
            device: md.dev() as u32,
            mode: md.mode(),
            uid: md.uid(),
            gid: md.gid(),
        }
    }
}

#[cfg(not(unix))]
impl StatFields {
    pub fn from_metadata(md: &Metadata) -> Self {
        let mtime = md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Self {
            mtime_sec: mtime.as_secs() as u32,
            mtime_nsec: mtime.subsec_nanos(),
            ctime_sec: 0,
            ctime_nsec: 0,
            size: md.len(),
            inode: 0,
            device: 0,
            mode: if md.permissions().readonly() { 0o100444 } else { 0o100644 },
            uid: 0,
            gid: 0,
        }
    }
}

/// Branch-local table of `(path, stat metadata, digest hint)` with O(1)
/// lookup by path.
#[derive(Debug)]
pub struct StatCache {
    branch: String,
    /// Save time of the loaded file; zero for a fresh cache.
    timestamp: u64,
    entries: Vec<(String, CacheEntry)>,
    by_path: HashMap<String, usize>,
}

impl StatCache {
    pub fn new(branch: &str) -> Self {
        Self {
            branch: branch.to_owned(),
            timestamp: 0,
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Seconds elapsed since the cache file was written.
    pub fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    pub fn find_entry(&self, path: &str) -> Option<&CacheEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i].1)
    }

    /// Classify `path` given its current stat.
    ///
    /// Unchanged iff an entry exists and `mtime_sec`, `size`, `inode` and
    /// `mode` all match; sub-second mtime and the remaining fields are
    /// recorded but deliberately not compared.
    pub fn check_file(&self, path: &str, stat: &StatFields) -> FileStatus {
        match self.find_entry(path) {
            None => FileStatus::New,
            Some(entry) => {
                if entry.mtime_sec == stat.mtime_sec
                    && entry.size == stat.size
                    && entry.inode == stat.inode
                    && entry.mode == stat.mode
                {
                    FileStatus::Unchanged
                } else {
                    FileStatus::Changed
                }
            }
        }
    }

    /// Insert or update the entry for `path`.
    pub fn update_entry(&mut self, path: &str, stat: &StatFields, digest: &Digest) {
        let mut prefix = [0u8; DIGEST_PREFIX_LEN];
        prefix.copy_from_slice(&digest.as_bytes()[..DIGEST_PREFIX_LEN]);
        let entry = CacheEntry {
            mtime_sec: stat.mtime_sec,
            mtime_nsec: stat.mtime_nsec,
            ctime_sec: stat.ctime_sec,
            ctime_nsec: stat.ctime_nsec,
            size: stat.size,
            inode: stat.inode,
            device: stat.device,
            mode: stat.mode,
            uid: stat.uid,
            gid: stat.gid,
            digest_prefix: prefix,
            flags: 0,
        };
        match self.by_path.get(path) {
            Some(&i) => self.entries[i].1 = entry,
            None => {
                self.by_path.insert(path.to_owned(), self.entries.len());
                self.entries.push((path.to_owned(), entry));
            }
        }
    }

    pub fn remove_entry(&mut self, path: &str) -> bool {
        let Some(i) = self.by_path.remove(path) else {
            return false;
        };
        self.entries.swap_remove(i);
        if let Some((moved, _)) = self.entries.get(i) {
            self.by_path.insert(moved.clone(), i);
        }
        true
    }

    /// Load the cache for `branch` from `path`. A missing file yields an
    /// empty cache; the hash table is rebuilt from the mapped bytes.
    pub fn load(path: impl AsRef<Path>, branch: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(branch)),
            Err(e) => return Err(e.into()),
        };
        // Read-only map; the cache is owned by the lock-holding writer, and
        // stale concurrent reads are acceptable by contract.
        let map = unsafe { Mmap::map(&file) }?;
        Self::parse(&map, path, branch)
    }

    fn parse(bytes: &[u8], origin: &Path, branch: &str) -> Result<Self> {
        let bad = |detail: &str| Error::bad_format(origin, detail);

        if bytes.len() < HEADER_LEN {
            return Err(bad("truncated header"));
        }
        if read_u32(bytes, 0) != SIGNATURE {
            return Err(bad("bad signature, expected FRAC"));
        }
        let version = read_u32(bytes, 4);
        if version != VERSION {
            return Err(bad(&format!("unsupported version {version}")));
        }
        let count = read_u32(bytes, HEADER_COUNT_OFF) as usize;
        let timestamp = read_u64(bytes, HEADER_TIMESTAMP_OFF);

        let entries_end = HEADER_LEN + count * ENTRY_LEN;
        if bytes.len() < entries_end {
            return Err(bad("truncated entry table"));
        }

        let mut cache = Self::new(branch);
        cache.timestamp = timestamp;

        let mut path_off = entries_end;
        for i in 0..count {
            let base = HEADER_LEN + i * ENTRY_LEN;
            let entry = CacheEntry {
                mtime_sec: read_u32(bytes, base),
                mtime_nsec: read_u32(bytes, base + 4),
                ctime_sec: read_u32(bytes, base + 8),
                ctime_nsec: read_u32(bytes, base + 12),
                size: read_u64(bytes, base + 16),
                inode: read_u64(bytes, base + 24),
                device: read_u32(bytes, base + 32),
                mode: read_u32(bytes, base + 36),
                uid: read_u32(bytes, base + 40),
                gid: read_u32(bytes, base + 44),
                digest_prefix: bytes[base + 48..base + 68].try_into().unwrap(),
                flags: read_u16(bytes, base + 70),
            };
            let path_len = read_u16(bytes, base + 68) as usize;
            if path_off + path_len > bytes.len() {
                return Err(bad("truncated path table"));
            }
            let path = std::str::from_utf8(&bytes[path_off..path_off + path_len])
                .map_err(|_| bad("path is not valid UTF-8"))?
                .to_owned();
            path_off += path_len;

            cache.by_path.insert(path.clone(), cache.entries.len());
            cache.entries.push((path, entry));
        }
        Ok(cache)
    }

    /// Write the cache to `path` atomically, stamping the current time.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.timestamp = now_secs();

        let paths_len: usize = self.entries.iter().map(|(p, _)| p.len()).sum();
        let mut out = Vec::with_capacity(HEADER_LEN + self.entries.len() * ENTRY_LEN + paths_len);

        out.extend_from_slice(&SIGNATURE.to_ne_bytes());
        out.extend_from_slice(&VERSION.to_ne_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_ne_bytes());
        out.extend_from_slice(&0u32.to_ne_bytes());
        let mut branch = [0u8; BRANCH_FIELD_LEN];
        let name = self.branch.as_bytes();
        let n = name.len().min(BRANCH_FIELD_LEN);
        branch[..n].copy_from_slice(&name[..n]);
        out.extend_from_slice(&branch);
        out.extend_from_slice(&self.timestamp.to_ne_bytes());

        for (path, e) in &self.entries {
            out.extend_from_slice(&e.mtime_sec.to_ne_bytes());
            out.extend_from_slice(&e.mtime_nsec.to_ne_bytes());
            out.extend_from_slice(&e.ctime_sec.to_ne_bytes());
            out.extend_from_slice(&e.ctime_nsec.to_ne_bytes());
            out.extend_from_slice(&e.size.to_ne_bytes());
            out.extend_from_slice(&e.inode.to_ne_bytes());
            out.extend_from_slice(&e.device.to_ne_bytes());
            out.extend_from_slice(&e.mode.to_ne_bytes());
            out.extend_from_slice(&e.uid.to_ne_bytes());
            out.extend_from_slice(&e.gid.to_ne_bytes());
            out.extend_from_slice(&e.digest_prefix);
            out.extend_from_slice(&(path.len() as u16).to_ne_bytes());
            out.extend_from_slice(&e.flags.to_ne_bytes());
        }
        for (path, _) in &self.entries {
            out.extend_from_slice(path.as_bytes());
        }

        write_atomic(path, &out)?;
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_u16(bytes: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes(bytes[off..off + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(bytes[off..off + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], off: usize) -> u64 {
    u64::from_ne_bytes(bytes[off..off + 8].try_into().unwrap())
}
