//! End-to-end scenarios driving init, snapshot, restore, delete and the
//! branch partitioning through the public engine API.

use std::fs;
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use fractyl_core::commit::{commit, CommitOptions, CommitOutcome};
use fractyl_core::hash::hash_bytes;
use fractyl_core::index::{Index, IndexEntry};
use fractyl_core::record::SnapshotRecord;
use fractyl_core::restore::{restore, RestoreOptions};
use fractyl_core::store::ObjectStore;
use fractyl_core::vcs::{FixedVcs, NoVcs, VcsContext, VcsProvider};
use fractyl_core::{Error, Repository};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct TestRepo {
    _tmp: TempDir,
    repo: Repository,
}

impl TestRepo {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        Self { _tmp: tmp, repo }
    }

    fn write(&self, rel: &str, body: &[u8]) {
        let path = self.repo.workdir().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn read(&self, rel: &str) -> Option<Vec<u8>> {
        fs::read(self.repo.workdir().join(rel)).ok()
    }

    fn remove(&self, rel: &str) {
        fs::remove_file(self.repo.workdir().join(rel)).unwrap();
    }

    fn snapshot(&self, vcs: &dyn VcsProvider, description: &str) -> SnapshotRecord {
        match commit(
            &self.repo,
            vcs,
            &CommitOptions {
                description: Some(description.into()),
                lock_timeout: None,
            },
        )
        .unwrap()
        {
            CommitOutcome::Created { record, .. } => record,
            CommitOutcome::NoChanges => panic!("expected a snapshot to be created"),
        }
    }

    fn snapshot_auto(&self, vcs: &dyn VcsProvider) -> CommitOutcome {
        commit(&self.repo, vcs, &CommitOptions::default()).unwrap()
    }
}

fn on_branch(name: &str) -> FixedVcs {
    FixedVcs(VcsContext {
        branch: Some(name.into()),
        commit: None,
        dirty: None,
        status: None,
    })
}

#[test]
fn init_snapshot_restore_round_trip() {
    let t = TestRepo::new();
    t.write("a.txt", b"hello");
    t.write("b/c.txt", b"world");

    let s1 = t.snapshot(&NoVcs, "S1");

    t.write("a.txt", b"bye");
    t.remove("b/c.txt");
    t.write("d.txt", b"new");
    let _s2 = t.snapshot(&NoVcs, "S2");

    let outcome = restore(&t.repo, &NoVcs, &s1.id, &RestoreOptions::default()).unwrap();
    assert_eq!(outcome.record.id, s1.id);

    assert_eq!(t.read("a.txt").unwrap(), b"hello");
    assert_eq!(t.read("b/c.txt").unwrap(), b"world");
    assert_eq!(t.read("d.txt"), None);

    let branch = t.repo.branch("main");
    assert_eq!(branch.current_id().unwrap().as_deref(), Some(s1.id.as_str()));
}

#[test]
fn identical_bodies_deduplicate() {
    let t = TestRepo::new();
    t.write("x.txt", b"k");
    t.write("y.txt", b"k");

    t.snapshot(&NoVcs, "first");
    // One shared body plus one index object.
    assert_eq!(t.repo.store().object_count().unwrap(), 2);

    match t.snapshot_auto(&NoVcs) {
        CommitOutcome::NoChanges => {}
        CommitOutcome::Created { .. } => panic!("no changes expected"),
    }
    assert_eq!(t.repo.store().object_count().unwrap(), 2);
    assert_eq!(t.repo.branch("main").list_records().unwrap().len(), 1);
}

#[test]
fn restore_then_snapshot_is_a_fixpoint() {
    let t = TestRepo::new();
    t.write("a.txt", b"version one");
    let s1 = t.snapshot(&NoVcs, "S1");

    t.write("a.txt", b"version two longer");
    t.write("extra.txt", b"extra");
    t.snapshot(&NoVcs, "S2");

    restore(&t.repo, &NoVcs, &s1.id, &RestoreOptions::default()).unwrap();

    // The tree now equals S1; committing again must be a no-op.
    match t.snapshot_auto(&NoVcs) {
        CommitOutcome::NoChanges => {}
        CommitOutcome::Created { record, .. } => {
            // Permitted alternative: a snapshot with the identical index.
            assert_eq!(record.index_hash, s1.index_hash);
        }
    }
}

#[test]
fn divergent_restore_takes_safety_snapshot() {
    let t = TestRepo::new();
    t.write("file.txt", b"one");
    let s1 = t.snapshot(&NoVcs, "S1");

    // Distinct timestamps keep the chronological ordering unambiguous.
    thread::sleep(Duration::from_millis(1100));
    t.write("file.txt", b"two, but longer");
    let s2 = t.snapshot(&NoVcs, "S2");

    thread::sleep(Duration::from_millis(1100));
    t.write("file.txt", b"three, uncommitted");

    let outcome = restore(&t.repo, &NoVcs, &s1.id, &RestoreOptions::default()).unwrap();

    let safety_id = outcome.safety_snapshot.expect("safety snapshot expected");
    let branch = t.repo.branch("main");
    let safety = branch.load_record(&safety_id).unwrap();
    assert_eq!(safety.parent.as_deref(), Some(s2.id.as_str()));
    assert_eq!(safety.description, "S2 +1");

    // The uncommitted modification is preserved in the store.
    assert!(t.repo.store().exists(&hash_bytes(b"three, uncommitted")));
    // And the tree plus CURRENT now reflect S1.
    assert_eq!(t.read("file.txt").unwrap(), b"one");
    assert_eq!(branch.current_id().unwrap().as_deref(), Some(s1.id.as_str()));
}

#[test]
fn stale_lock_is_recovered() {
    let t = TestRepo::new();
    t.write("a.txt", b"contents");

    // A crashed writer left its lock and half an object behind.
    fs::write(t.repo.dir().lockfile(), "999999999\n").unwrap();
    let partial = t.repo.workdir().join(".fractyl/objects/de");
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("adbeef"), b"partial").unwrap();

    let record = t.snapshot(&NoVcs, "after crash");
    assert!(t.repo.branch("main").record_exists(&record.id));
    assert!(!t.repo.dir().lockfile().exists());
}

#[test]
fn branches_have_disjoint_histories_over_a_shared_store() {
    let t = TestRepo::new();
    t.write("shared.txt", b"same body everywhere");

    let on_a = t.snapshot(&on_branch("feature-a"), "on a");

    // Same tree, different branch: new history, shared objects.
    let on_b = t.snapshot(&on_branch("feature-b"), "on b");

    let a = t.repo.branch("feature-a").list_records().unwrap();
    let b = t.repo.branch("feature-b").list_records().unwrap();
    assert_eq!(a.iter().map(|r| &r.id).collect::<Vec<_>>(), vec![&on_a.id]);
    assert_eq!(b.iter().map(|r| &r.id).collect::<Vec<_>>(), vec![&on_b.id]);
    assert_eq!(on_b.parent, None);

    assert!(t.repo.store().exists(&hash_bytes(b"same body everywhere")));
    assert_eq!(on_a.git_branch.as_deref(), Some("feature-a"));
}

#[test]
fn every_byte_value_round_trips() {
    let t = TestRepo::new();
    let body: Vec<u8> = (0u8..=255).collect();
    t.write("bytes.bin", &body);

    let s1 = t.snapshot(&NoVcs, "binary");
    t.remove("bytes.bin");
    t.write("other.txt", b"replacement");
    t.snapshot(&NoVcs, "without it");

    restore(&t.repo, &NoVcs, &s1.id, &RestoreOptions::default()).unwrap();
    assert_eq!(t.read("bytes.bin").unwrap(), body);
}

#[test]
fn delete_removes_the_record_but_not_objects() {
    let t = TestRepo::new();
    t.write("kept.txt", b"body stays");
    let s1 = t.snapshot(&NoVcs, "S1");

    thread::sleep(Duration::from_millis(1100));
    t.write("kept.txt", b"body stays, edited");
    let s2 = t.snapshot(&NoVcs, "S2");

    let branch = t.repo.branch("main");
    let deleted = t.repo.delete_snapshot(&branch, &s2.id).unwrap();
    assert_eq!(deleted, s2.id);

    assert!(!branch.record_exists(&s2.id));
    assert!(branch.record_exists(&s1.id));
    // CURRENT fell back to the parent; objects were not collected.
    assert_eq!(branch.current_id().unwrap().as_deref(), Some(s1.id.as_str()));
    assert!(t.repo.store().exists(&hash_bytes(b"body stays, edited")));

    assert!(matches!(
        t.repo.delete_snapshot(&branch, &s2.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn relative_and_prefix_references_resolve_against_real_records() {
    let t = TestRepo::new();
    t.write("f", b"1");
    let s1 = t.snapshot(&NoVcs, "first");

    thread::sleep(Duration::from_millis(1100));
    t.write("f", b"22");
    let s2 = t.snapshot(&NoVcs, "second");

    let branch = t.repo.branch("main");
    assert_eq!(fractyl_core::resolver::resolve(&branch, "-1").unwrap(), s2.id);
    assert_eq!(fractyl_core::resolver::resolve(&branch, "-2").unwrap(), s1.id);
    assert_eq!(
        fractyl_core::resolver::resolve(&branch, &s1.id[..8]).unwrap(),
        s1.id
    );

    // A hyphen-free prefix running past the UUID's first hyphen resolves too.
    let bare = s1.id.replace('-', "");
    assert_eq!(
        fractyl_core::resolver::resolve(&branch, &bare[..10]).unwrap(),
        s1.id
    );
}

#[test]
fn legacy_layout_is_migrated_on_first_commit() {
    let t = TestRepo::new();
    t.write("a.txt", b"hello");

    // A pre-branch repository: record and CURRENT directly under .fractyl.
    let mut index = Index::new();
    index.add_entry(IndexEntry {
        path: "a.txt".into(),
        digest: hash_bytes(b"hello"),
        mode: 0o100644,
        size: 5,
        mtime: 0,
    });
    let index_hash = t.repo.store().put_bytes(&index.to_bytes()).unwrap();
    let legacy = SnapshotRecord {
        id: "11111111-2222-3333-4444-555555555555".into(),
        parent: None,
        description: "from the old layout".into(),
        timestamp: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
        index_hash,
        git_branch: None,
        git_commit: None,
        git_dirty: None,
        git_status: None,
    };
    legacy
        .save(&t.repo.dir().legacy_snapshots().record(&legacy.id))
        .unwrap();
    fs::write(t.repo.dir().legacy_current(), format!("{}\n", legacy.id)).unwrap();

    // The tree matches the legacy snapshot, so this commit is a no-op; the
    // layout migration still runs.
    match t.snapshot_auto(&NoVcs) {
        CommitOutcome::NoChanges => {}
        CommitOutcome::Created { .. } => panic!("tree matches the legacy snapshot"),
    }

    let branch = t.repo.branch("main");
    assert!(branch.record_exists(&legacy.id));
    assert!(!t.repo.dir().legacy_current().exists());
    assert_eq!(
        branch.current_id().unwrap().as_deref(),
        Some(legacy.id.as_str())
    );

    // New snapshots chain onto the migrated history.
    t.write("a.txt", b"hello again");
    let next = t.snapshot(&NoVcs, "post-migration");
    assert_eq!(next.parent.as_deref(), Some(legacy.id.as_str()));
}

#[test]
fn commit_fails_fast_when_locked() {
    let t = TestRepo::new();
    t.write("a.txt", b"x");

    let _held = t.repo.lock(Duration::from_secs(5)).unwrap();
    let err = commit(
        &t.repo,
        &NoVcs,
        &CommitOptions {
            description: None,
            lock_timeout: Some(Duration::from_millis(200)),
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::Locked(_)));
}

#[test]
fn snapshot_of_empty_tree_creates_nothing() {
    let t = TestRepo::new();
    match t.snapshot_auto(&NoVcs) {
        CommitOutcome::NoChanges => {}
        CommitOutcome::Created { .. } => panic!("empty tree must not produce a snapshot"),
    }
    assert!(t.repo.branch("main").list_records().unwrap().is_empty());
}

#[test]
fn default_descriptions_increment() {
    let t = TestRepo::new();
    t.write("f", b"1");
    let first = match t.snapshot_auto(&NoVcs) {
        CommitOutcome::Created { record, .. } => record,
        CommitOutcome::NoChanges => panic!("expected snapshot"),
    };
    assert_eq!(first.description, "working");

    // Distinct timestamps keep "newest snapshot" well-defined for the
    // divergence check inside the description generator.
    thread::sleep(Duration::from_millis(1100));
    t.write("f", b"22");
    let second = match t.snapshot_auto(&NoVcs) {
        CommitOutcome::Created { record, .. } => record,
        CommitOutcome::NoChanges => panic!("expected snapshot"),
    };
    assert_eq!(second.description, "working +1");

    thread::sleep(Duration::from_millis(1100));
    t.write("f", b"333");
    let third = match t.snapshot_auto(&NoVcs) {
        CommitOutcome::Created { record, .. } => record,
        CommitOutcome::NoChanges => panic!("expected snapshot"),
    };
    assert_eq!(third.description, "working +2");
    assert_eq!(third.parent.as_deref(), Some(second.id.as_str()));
}
