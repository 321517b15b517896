//! The restore engine: reconstitute the working tree from a snapshot.
//!
//! Restore is not transactional; a failure partway leaves the tree in an
//! intermediate state, and re-running the restore recovers. Before touching
//! anything, a best-effort safety snapshot preserves uncommitted work.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::commit::{self, CommitOptions, CommitOutcome};
use crate::error::Result;
use crate::filter::PathFilter;
use crate::index::{index_object_origin, Index};
use crate::record::SnapshotRecord;
use crate::repo::{Repository, DEFAULT_LOCK_TIMEOUT};
use crate::resolver;
use crate::store::ObjectStore;
use crate::vcs::VcsProvider;
use crate::DEFAULT_BRANCH;

#[derive(Debug, Default)]
pub struct RestoreOptions {
    pub lock_timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RestoreOutcome {
    pub record: SnapshotRecord,
    /// Files written from the object store.
    pub restored: usize,
    /// Extraneous working-tree files removed.
    pub removed: usize,
    /// Id of the safety snapshot, when one was created.
    pub safety_snapshot: Option<String>,
}

/// Restore the working tree to the snapshot named by `reference`.
pub fn restore(
    repo: &Repository,
    vcs: &dyn VcsProvider,
    reference: &str,
    opts: &RestoreOptions,
) -> Result<RestoreOutcome> {
    let _lock = repo.lock(opts.lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT))?;

    let ctx = vcs.context();
    let branch_name = ctx.branch.clone().unwrap_or_else(|| DEFAULT_BRANCH.into());
    let branch = repo.branch(&branch_name);
    repo.migrate_legacy_layout(&branch)?;

    let id = resolver::resolve(&branch, reference)?;
    let record = branch.load_record(&id)?;
    let bytes = repo.store().get(&record.index_hash)?;
    let index = Index::from_bytes(&bytes, &index_object_origin(&record.index_hash))?;

    // Uncommitted work would be overwritten below; capture it first. The
    // committer no-ops when the tree already matches CURRENT. Failure here
    // is a warning, not a reason to refuse the restore.
    let safety_snapshot = match commit::commit_locked(repo, vcs, &CommitOptions::default()) {
        Ok(CommitOutcome::Created { record, .. }) => Some(record.id),
        Ok(CommitOutcome::NoChanges) => None,
        Err(e) => {
            warn!("safety snapshot failed: {e}");
            None
        }
    };

    let mut restored = 0;
    for entry in index.iter() {
        let dest = repo.workdir().join(&entry.path);
        if let Err(e) = repo.store().restore_file(&entry.digest, &dest) {
            warn!("failed to restore {}: {e}", entry.path);
            continue;
        }
        set_mode(&dest, entry.mode);
        restored += 1;
    }

    let removed = remove_extraneous(repo.workdir(), &index)?;

    index.save(repo.dir().live_index())?;
    branch.set_current(&id)?;

    Ok(RestoreOutcome {
        record,
        restored,
        removed,
        safety_snapshot,
    })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)) {
        warn!("failed to set permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

/// Delete working-tree files absent from `index`.
///
/// The repository directory, `.git`, foreign repository roots and ignored
/// paths are left alone: none of them are ever captured by a snapshot, so a
/// restore has no say over them. Directories emptied by the removals are
/// pruned.
fn remove_extraneous(root: &Path, index: &Index) -> Result<usize> {
    let filter = PathFilter::load(root);
    let mut removed = 0;
    let mut visited_dirs = Vec::new();
    remove_extraneous_in(root, "", index, &filter, &mut removed, &mut visited_dirs)?;

    // Deepest-first so empty parents fall after their children.
    visited_dirs.sort_by_key(|d: &PathBuf| std::cmp::Reverse(d.components().count()));
    for dir in visited_dirs {
        let _ = fs::remove_dir(dir);
    }
    Ok(removed)
}

fn remove_extraneous_in(
    dir: &Path,
    rel: &str,
    index: &Index,
    filter: &PathFilter,
    removed: &mut usize,
    visited_dirs: &mut Vec<PathBuf>,
) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read directory {}: {e}", dir.display());
            return Ok(());
        }
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == fractyl_paths::REPO_DIR_NAME || name == ".git" {
            continue;
        }
        let rel_child = if rel.is_empty() {
            name.to_owned()
        } else {
            format!("{rel}/{name}")
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if filter.ignored(&rel_child, true)
                || entry.path().join(".git").symlink_metadata().is_ok()
            {
                continue;
            }
            visited_dirs.push(entry.path());
            remove_extraneous_in(
                &entry.path(),
                &rel_child,
                index,
                filter,
                removed,
                visited_dirs,
            )?;
        } else if file_type.is_file() {
            if filter.ignored(&rel_child, false) || index.find_entry(&rel_child).is_some() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => *removed += 1,
                Err(e) => warn!("failed to remove {rel_child}: {e}"),
            }
        }
    }
    Ok(())
}
