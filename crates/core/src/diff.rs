//! Support surface for diffing two snapshots.
//!
//! The core enumerates the union of paths across two indices and classifies
//! each as added, deleted or modified by digest; it also knows how to sniff
//! binary content. Rendering the actual text diff is presentation and lives
//! with the caller.

use std::path::Path;

use crate::index::{Index, IndexEntry};

/// How far into a body the binary sniff looks.
const SNIFF_LEN: usize = 8 * 1024;

/// Extensions never worth line-diffing regardless of content.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "bz2", "xz", "zst",
    "tar", "7z", "jar", "class", "o", "a", "so", "dylib", "dll", "exe", "bin", "wasm", "sqlite",
    "db", "woff", "woff2", "ttf", "otf", "mp3", "mp4", "ogg", "avi", "mov",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

/// One path that differs between two snapshots.
#[derive(Clone, Debug)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<IndexEntry>,
    pub new: Option<IndexEntry>,
}

/// Paths differing between `old` and `new`, lexicographically ordered.
pub fn diff_indices(old: &Index, new: &Index) -> Vec<DiffEntry> {
    let mut paths: Vec<&str> = old
        .iter()
        .chain(new.iter())
        .map(|e| e.path.as_str())
        .collect();
    paths.sort_unstable();
    paths.dedup();

    let mut changes = Vec::new();
    for path in paths {
        let old_entry = old.find_entry(path);
        let new_entry = new.find_entry(path);
        let kind = match (old_entry, new_entry) {
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Deleted,
            (Some(o), Some(n)) if o.digest != n.digest => ChangeKind::Modified,
            _ => continue,
        };
        changes.push(DiffEntry {
            path: path.to_owned(),
            kind,
            old: old_entry.cloned(),
            new: new_entry.cloned(),
        });
    }
    changes
}

/// Whether a body should be treated as binary: a NUL byte in its first 8 KiB.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0)
}

/// Extension-based binary detection, for skipping the content sniff.
pub fn has_binary_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| BINARY_EXTENSIONS.contains(&e.as_str()))
}
