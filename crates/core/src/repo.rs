//! Repository lifecycle: locating, initializing and opening the `.fractyl/`
//! directory, plus the operations that need only ref state.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fractyl_fs_utils::Lockfile;
use fractyl_paths::RepoDir;
use log::info;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::refs::Branch;
use crate::resolver;
use crate::store::FsObjectStore;

/// Default time to wait for the repository lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// An opened fractyl repository.
#[derive(Clone, Debug)]
pub struct Repository {
    workdir: PathBuf,
    dir: RepoDir,
    store: FsObjectStore,
}

impl Repository {
    /// Initialize a new repository for the working tree at `path`.
    ///
    /// Branch refs are not created here; the first commit does that lazily.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let workdir = fs::canonicalize(path.as_ref())?;
        let dir = RepoDir::from_workdir(&workdir);
        if dir.exists() {
            return Err(Error::InvalidArgs(format!(
                "repository already exists at {}",
                dir.display()
            )));
        }
        dir.create()?;
        dir.objects().create()?;
        // The pre-branch location; migrated under refs/heads/ on first commit.
        dir.legacy_snapshots().create()?;
        Index::new().save(dir.live_index())?;

        Ok(Self::assemble(workdir, dir))
    }

    /// Find the repository root by walking up from `start`.
    pub fn find_root(start: impl AsRef<Path>) -> Result<PathBuf> {
        let start = fs::canonicalize(start.as_ref())?;
        for dir in start.ancestors() {
            if RepoDir::from_workdir(dir).metadata().map(|m| m.is_dir()).unwrap_or(false) {
                return Ok(dir.to_path_buf());
            }
        }
        Err(Error::NotFound(
            "fractyl repository (run 'fractyl init' first)".into(),
        ))
    }

    /// Open the repository containing `start`.
    pub fn open(start: impl AsRef<Path>) -> Result<Self> {
        let workdir = Self::find_root(start)?;
        let dir = RepoDir::from_workdir(&workdir);
        Ok(Self::assemble(workdir, dir))
    }

    fn assemble(workdir: PathBuf, dir: RepoDir) -> Self {
        let store = FsObjectStore::new(dir.objects());
        Self { workdir, dir, store }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn dir(&self) -> &RepoDir {
        &self.dir
    }

    pub fn store(&self) -> &FsObjectStore {
        &self.store
    }

    pub fn branch(&self, name: &str) -> Branch {
        Branch::new(name.to_owned(), self.dir.branch(name))
    }

    /// Acquire the repository write lock, waiting up to `timeout`.
    pub fn lock(&self, timeout: Duration) -> Result<Lockfile> {
        Ok(Lockfile::wait_acquire(self.dir.lockfile(), timeout)?)
    }

    /// Move a pre-branch layout (`snapshots/` and `CURRENT` directly under
    /// `.fractyl/`) into `refs/heads/<branch>/`. Runs under the commit lock;
    /// a no-op for repositories already migrated.
    pub fn migrate_legacy_layout(&self, branch: &Branch) -> Result<()> {
        let legacy = self.dir.legacy_snapshots();
        let has_legacy_records = fs::read_dir(&legacy)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !has_legacy_records {
            return Ok(());
        }

        info!(
            "migrating legacy snapshot layout to refs/heads/{}",
            branch.name()
        );
        branch.dir().create()?;
        fs::rename(&legacy, branch.dir().snapshots())?;

        let legacy_current = self.dir.legacy_current();
        if legacy_current.exists() {
            fs::rename(&legacy_current, branch.dir().current())?;
        }
        Ok(())
    }

    /// Delete a single snapshot record. Objects are never touched; the store
    /// is not garbage-collected.
    ///
    /// If the deleted snapshot was `CURRENT`, the pointer falls back to its
    /// parent so it never names a missing record.
    pub fn delete_snapshot(&self, branch: &Branch, reference: &str) -> Result<String> {
        let _lock = self.lock(DEFAULT_LOCK_TIMEOUT)?;

        let id = resolver::resolve(branch, reference)?;
        let record = branch.load_record(&id)?;
        branch.delete_record(&id)?;

        if branch.current_id()?.as_deref() == Some(id.as_str()) {
            match record.parent {
                Some(parent) => branch.set_current(&parent)?,
                None => {
                    let _ = fs::remove_file(branch.dir().current());
                }
            }
        }
        Ok(id)
    }
}
