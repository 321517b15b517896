//! The snapshot committer.
//!
//! Orchestrates one commit under the repository lock: resolve the branch,
//! load the prior index through the parent snapshot, scan, bail out early
//! when nothing changed, then persist in the order that keeps the store
//! consistent across crashes: objects first, then the index object, then the
//! record, and `CURRENT` last.

use std::time::Duration;

use chrono::{Timelike, Utc};
use log::warn;
use uuid::Uuid;

use crate::dir_cache::DirCache;
use crate::error::Result;
use crate::filter::PathFilter;
use crate::index::{index_object_origin, Index};
use crate::record::SnapshotRecord;
use crate::refs::Branch;
use crate::repo::{Repository, DEFAULT_LOCK_TIMEOUT};
use crate::scanner::{self, ScanStats};
use crate::stat_cache::StatCache;
use crate::store::ObjectStore;
use crate::vcs::VcsProvider;
use crate::DEFAULT_BRANCH;

/// Description used for the first snapshot on a branch.
const INITIAL_DESCRIPTION: &str = "working";

#[derive(Debug, Default)]
pub struct CommitOptions {
    /// User-supplied description; generated per the `+N` scheme when absent.
    pub description: Option<String>,
    /// Lock wait; [`DEFAULT_LOCK_TIMEOUT`] when `None`.
    pub lock_timeout: Option<Duration>,
}

#[derive(Debug)]
pub enum CommitOutcome {
    Created {
        record: SnapshotRecord,
        stats: ScanStats,
    },
    /// The working tree matches the prior snapshot; nothing was written.
    NoChanges,
}

/// Take a snapshot of the repository's working tree.
pub fn commit(
    repo: &Repository,
    vcs: &dyn VcsProvider,
    opts: &CommitOptions,
) -> Result<CommitOutcome> {
    let _lock = repo.lock(opts.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT))?;
    commit_locked(repo, vcs, opts)
}

/// Commit with the repository lock already held. The restore engine uses
/// this for its safety snapshot.
pub(crate) fn commit_locked(
    repo: &Repository,
    vcs: &dyn VcsProvider,
    opts: &CommitOptions,
) -> Result<CommitOutcome> {
    let ctx = vcs.context();
    let branch_name = ctx.branch.clone().unwrap_or_else(|| DEFAULT_BRANCH.into());
    let branch = repo.branch(&branch_name);

    repo.migrate_legacy_layout(&branch)?;
    branch.create()?;

    let current = branch.current_id()?;
    let (prior_record, prior_index) = match &current {
        Some(id) => {
            let record = branch.load_record(id)?;
            let bytes = repo.store().get(&record.index_hash)?;
            let index = Index::from_bytes(&bytes, &index_object_origin(&record.index_hash))?;
            (Some(record), index)
        }
        None => (None, Index::new()),
    };

    let cache_path = repo.dir().cache().stat_cache(&branch_name);
    let dir_cache_path = repo.dir().cache().dir_cache(&branch_name);
    // Caches are hints, regenerated when unreadable.
    let mut cache = StatCache::load(&cache_path, &branch_name).unwrap_or_else(|e| {
        warn!("rebuilding stat cache: {e}");
        StatCache::new(&branch_name)
    });
    let mut dir_cache = DirCache::load(&dir_cache_path).unwrap_or_else(|e| {
        warn!("rebuilding directory cache: {e}");
        DirCache::new()
    });

    let filter = PathFilter::load(repo.workdir());
    let outcome = scanner::scan(
        repo.workdir(),
        &prior_index,
        &mut cache,
        &mut dir_cache,
        &filter,
        repo.store(),
    )?;

    if let Err(e) = cache.save(&cache_path) {
        warn!("failed to save stat cache: {e}");
    }
    if let Err(e) = dir_cache.save(&dir_cache_path) {
        warn!("failed to save directory cache: {e}");
    }

    let unchanged = match prior_record {
        None => outcome.index.is_empty(),
        Some(_) => indices_equal(&prior_index, &outcome.index),
    };
    if unchanged {
        return Ok(CommitOutcome::NoChanges);
    }

    let description = match &opts.description {
        Some(d) => d.clone(),
        None => default_description(&branch, prior_record.as_ref())?,
    };

    // Objects before the index object, the index object before the record,
    // the record before CURRENT. A crash at any point leaves the branch on
    // its previous consistent state.
    let index_hash = repo.store().put_bytes(&outcome.index.to_bytes())?;
    outcome.index.save(repo.dir().live_index())?;

    let record = SnapshotRecord {
        id: Uuid::new_v4().to_string(),
        parent: current,
        description,
        timestamp: Utc::now().with_nanosecond(0).expect("zero is in range"),
        index_hash,
        git_branch: ctx.branch,
        git_commit: ctx.commit,
        git_dirty: ctx.dirty,
        git_status: ctx.status,
    };
    branch.write_record(&record)?;
    branch.set_current(&record.id)?;

    Ok(CommitOutcome::Created {
        record,
        stats: outcome.stats,
    })
}

/// Whether two indices describe the same tree. Paths and digests decide;
/// order does not. The ordered pass catches the common case cheaply since
/// the scanner is deterministic for an unchanged tree.
fn indices_equal(a: &Index, b: &Index) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let ordered = a
        .iter()
        .zip(b.iter())
        .all(|(x, y)| x.path == y.path && x.digest == y.digest);
    if ordered {
        return true;
    }
    a.iter().all(|x| {
        b.find_entry(&x.path)
            .is_some_and(|y| y.digest == x.digest)
    })
}

/// The default description scheme.
///
/// `"working"` for the first snapshot; otherwise the prior description with
/// a ` +N` counter appended or incremented. When committing on top of a
/// `CURRENT` that is no longer the newest snapshot (the user restored
/// backwards and is branching off), the counter is replaced by a dash and
/// the first 6 characters of that snapshot's id.
fn default_description(branch: &Branch, prior: Option<&SnapshotRecord>) -> Result<String> {
    let Some(prior) = prior else {
        return Ok(INITIAL_DESCRIPTION.into());
    };

    let (base, counter) = split_counter(&prior.description);

    let newest = branch.list_records()?.into_iter().next();
    let diverged = newest.is_some_and(|newest| newest.id != prior.id);
    if diverged {
        let short = prior.id.get(..6).unwrap_or(&prior.id);
        return Ok(format!("{base}-{short}"));
    }

    Ok(format!("{base} +{}", counter.unwrap_or(0) + 1))
}

/// Split `"<base> +N"` into base and counter.
fn split_counter(description: &str) -> (&str, Option<u64>) {
    if let Some((base, tail)) = description.rsplit_once(" +") {
        if let Ok(n) = tail.parse::<u64>() {
            return (base, Some(n));
        }
    }
    (description, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::index::IndexEntry;

    fn entry(path: &str, body: &[u8]) -> IndexEntry {
        IndexEntry {
            path: path.into(),
            digest: hash_bytes(body),
            mode: 0o100644,
            size: body.len() as u64,
            mtime: 0,
        }
    }

    #[test]
    fn split_counter_forms() {
        assert_eq!(split_counter("working"), ("working", None));
        assert_eq!(split_counter("working +3"), ("working", Some(3)));
        assert_eq!(split_counter("fix bug +x"), ("fix bug +x", None));
        assert_eq!(split_counter("a + b +12"), ("a + b", Some(12)));
    }

    #[test]
    fn equality_ignores_order() {
        let mut a = Index::new();
        a.add_entry(entry("x", b"1"));
        a.add_entry(entry("y", b"2"));

        let mut b = Index::new();
        b.add_entry(entry("y", b"2"));
        b.add_entry(entry("x", b"1"));

        assert!(indices_equal(&a, &b));
    }

    #[test]
    fn equality_sees_digest_changes() {
        let mut a = Index::new();
        a.add_entry(entry("x", b"1"));

        let mut b = Index::new();
        b.add_entry(entry("x", b"different"));

        assert!(!indices_equal(&a, &b));
    }

    #[test]
    fn equality_sees_renames() {
        let mut a = Index::new();
        a.add_entry(entry("x", b"1"));

        let mut b = Index::new();
        b.add_entry(entry("renamed", b"1"));

        assert!(!indices_equal(&a, &b));
    }
}
