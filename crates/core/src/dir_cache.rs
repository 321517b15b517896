//! Directory mtime cache.
//!
//! A small auxiliary table mapping directory paths to `(mtime, direct file
//! count)`, persisted beside the stat cache. The new-file walk uses it to
//! skip descending into directories whose recorded metadata is unchanged.
//! Strictly a hint: actual change classification always goes through the
//! stat cache or the prior index.
//!
//! Format: magic `FDIR`, version u32 = 1, count u32, then per entry
//! `path_len u16, path, mtime i64, file_count u32`, little-endian.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use fractyl_fs_utils::write_atomic;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"FDIR";
const VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub mtime: i64,
    /// Direct (non-recursive) regular-file children.
    pub file_count: u32,
}

#[derive(Debug, Default)]
pub struct DirCache {
    entries: HashMap<String, DirEntry>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `dir` is recorded with exactly this mtime and file count.
    pub fn unchanged(&self, dir: &str, mtime: i64, file_count: u32) -> bool {
        self.entries.get(dir).is_some_and(|e| {
            e.mtime == mtime && e.file_count == file_count
        })
    }

    pub fn update(&mut self, dir: &str, mtime: i64, file_count: u32) {
        self.entries
            .insert(dir.to_owned(), DirEntry { mtime, file_count });
    }

    pub fn remove(&mut self, dir: &str) {
        self.entries.remove(dir);
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        let bad = |detail: &str| Error::bad_format(path, detail);
        if bytes.len() < 12 || &bytes[..4] != MAGIC {
            return Err(bad("bad magic, expected FDIR"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(bad(&format!("unsupported version {version}")));
        }
        let count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());

        let mut entries = HashMap::with_capacity(count as usize);
        let mut off = 12;
        for _ in 0..count {
            if off + 2 > bytes.len() {
                return Err(bad("truncated entry"));
            }
            let path_len = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
            off += 2;
            if off + path_len + 12 > bytes.len() {
                return Err(bad("truncated entry"));
            }
            let dir = std::str::from_utf8(&bytes[off..off + path_len])
                .map_err(|_| bad("path is not valid UTF-8"))?
                .to_owned();
            off += path_len;
            let mtime = i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
            off += 8;
            let file_count = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
            off += 4;
            entries.insert(dir, DirEntry { mtime, file_count });
        }
        Ok(Self { entries })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (dir, e) in &self.entries {
            out.extend_from_slice(&(dir.len() as u16).to_le_bytes());
            out.extend_from_slice(dir.as_bytes());
            out.extend_from_slice(&e.mtime.to_le_bytes());
            out.extend_from_slice(&e.file_count.to_le_bytes());
        }
        write_atomic(path, &out)?;
        Ok(())
    }
}
