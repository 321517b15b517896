//! Content-addressed snapshot engine for a developer's working tree.
//!
//! A fractyl repository lives in a `.fractyl/` directory at the root of a
//! working tree. Each snapshot captures the full set of tracked regular
//! files: file bodies are deduplicated into a content-addressed object store
//! keyed by SHA-256, the set itself is described by an [`index::Index`]
//! stored as an object in its own right, and a small JSON
//! [`record::SnapshotRecord`] ties the index digest to a parent snapshot,
//! description and timestamp. Snapshot history is partitioned by the current
//! branch of an external version-control tool, so switching branches yields
//! disjoint histories over a shared object store.
//!
//! The interesting machinery is the scan-and-commit pipeline in [`scanner`]
//! and [`commit`]: a persistent per-branch [`stat_cache::StatCache`] lets a
//! snapshot reconcile the tree against the previous one with parallel `stat`
//! calls alone, rehashing only files whose metadata changed.

pub mod commit;
pub mod diff;
pub mod dir_cache;
pub mod error;
pub mod filter;
pub mod hash;
pub mod index;
pub mod record;
pub mod refs;
pub mod repo;
pub mod resolver;
pub mod restore;
pub mod scanner;
pub mod stat_cache;
pub mod store;
pub mod vcs;

pub use error::{Error, Result};
pub use hash::Digest;
pub use repo::Repository;

/// Files larger than this are skipped by the scanner with a warning.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Branch name used when no version-control context is available.
pub const DEFAULT_BRANCH: &str = "main";
