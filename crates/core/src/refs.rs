//! Per-branch ref state: the `CURRENT` pointer and the directory of
//! snapshot records.
//!
//! Branches are disjoint; nothing here ever reaches across to another
//! branch's state. Readers may observe a record whose `CURRENT` advance has
//! not happened yet, so enumeration of records is authoritative for
//! existence and `CURRENT` is a hint for "latest".

use std::fs;
use std::io;

use fractyl_fs_utils::write_atomic;
use fractyl_paths::BranchDir;
use log::warn;

use crate::error::{Error, Result};
use crate::record::SnapshotRecord;

/// Handle scoping all ref-state operations to one branch.
#[derive(Clone, Debug)]
pub struct Branch {
    name: String,
    dir: BranchDir,
}

impl Branch {
    pub fn new(name: String, dir: BranchDir) -> Self {
        Self { name, dir }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &BranchDir {
        &self.dir
    }

    /// Create the branch's ref directories. Idempotent.
    pub fn create(&self) -> Result<()> {
        self.dir.snapshots().create()?;
        Ok(())
    }

    /// The id in `CURRENT`, or `None` when the branch has no snapshots yet.
    pub fn current_id(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.current()) {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| id.to_owned()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically point `CURRENT` at `id`. The last step of every commit and
    /// restore.
    pub fn set_current(&self, id: &str) -> Result<()> {
        write_atomic(self.dir.current(), format!("{id}\n").as_bytes())?;
        Ok(())
    }

    pub fn record_exists(&self, id: &str) -> bool {
        self.dir.snapshots().record(id).exists()
    }

    pub fn load_record(&self, id: &str) -> Result<SnapshotRecord> {
        SnapshotRecord::load(&self.dir.snapshots().record(id))
    }

    /// Persist `record` into this branch's snapshot directory.
    pub fn write_record(&self, record: &SnapshotRecord) -> Result<()> {
        record.save(&self.dir.snapshots().record(&record.id))
    }

    /// Remove the record file for `id`. Objects are untouched.
    pub fn delete_record(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.dir.snapshots().record(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("snapshot {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All record ids in this branch, in directory order.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(self.dir.snapshots()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                if !id.is_empty() && !id.starts_with('.') {
                    ids.push(id.to_owned());
                }
            }
        }
        Ok(ids)
    }

    /// All records in this branch, newest first by timestamp. Records that
    /// fail to parse are skipped with a warning rather than failing the
    /// enumeration.
    pub fn list_records(&self) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids()? {
            match self.load_record(&id) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable snapshot record {id}: {e}"),
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use chrono::{TimeZone, Utc};
    use fractyl_paths::{FromPathUnchecked, RepoDir};
    use tempfile::TempDir;

    fn branch(tmp: &TempDir) -> Branch {
        let repo = RepoDir::from_path_unchecked(tmp.path().join(".fractyl"));
        let b = Branch::new("main".into(), repo.branch("main"));
        b.create().unwrap();
        b
    }

    fn record(id: &str, secs: u32) -> SnapshotRecord {
        SnapshotRecord {
            id: id.into(),
            parent: None,
            description: String::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            index_hash: hash_bytes(id.as_bytes()),
            git_branch: None,
            git_commit: None,
            git_dirty: None,
            git_status: None,
        }
    }

    #[test]
    fn current_starts_absent() {
        let tmp = TempDir::new().unwrap();
        let b = branch(&tmp);
        assert_eq!(b.current_id().unwrap(), None);

        b.set_current("some-id").unwrap();
        assert_eq!(b.current_id().unwrap().as_deref(), Some("some-id"));
    }

    #[test]
    fn records_list_newest_first() {
        let tmp = TempDir::new().unwrap();
        let b = branch(&tmp);

        b.write_record(&record("older", 1)).unwrap();
        b.write_record(&record("newer", 30)).unwrap();

        let listed = b.list_records().unwrap();
        assert_eq!(listed[0].id, "newer");
        assert_eq!(listed[1].id, "older");
    }

    #[test]
    fn delete_missing_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let b = branch(&tmp);
        assert!(matches!(
            b.delete_record("absent"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_record_is_skipped_by_listing() {
        let tmp = TempDir::new().unwrap();
        let b = branch(&tmp);

        b.write_record(&record("good", 1)).unwrap();
        std::fs::write(b.dir().snapshots().record("bad"), b"not json").unwrap();

        let listed = b.list_records().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }
}
