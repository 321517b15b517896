//! Reconciling the working tree against the previous snapshot.
//!
//! The scanner produces the new index for a snapshot while hashing as little
//! as the stat cache and the prior index permit. Two strategies:
//!
//! * **Stat-only**: when a populated stat cache exists, every cached path is
//!   `lstat`ed in parallel and classified unchanged/changed/deleted without
//!   touching directories. Unchanged files take their digest from the prior
//!   index; only changed files are rehashed. A shallow walk then looks for
//!   files the cache has never seen, unless a fresh cache with zero changes
//!   makes that walk pointless.
//! * **Full traversal**: with no usable cache, worker threads drain a shared
//!   queue of directories, hashing any file whose `(size, mtime)` does not
//!   match the prior index, and rebuild the stat cache from scratch.
//!
//! Per-file failures are warnings, not errors: an unreadable file is simply
//! left out of the snapshot.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::dir_cache::DirCache;
use crate::error::Result;
use crate::filter::PathFilter;
use crate::hash::Digest;
use crate::index::{Index, IndexEntry};
use crate::stat_cache::{FileStatus, StatCache, StatFields};
use crate::store::ObjectStore;
use crate::MAX_FILE_SIZE;

/// Upper bound on scanner worker threads.
const MAX_WORKERS: usize = 8;

/// A cache younger than this with no observed changes lets the scanner skip
/// new-file detection entirely.
const FRESH_CACHE_SECS: u64 = 300;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub unchanged: usize,
    pub changed: usize,
    pub added: usize,
    pub deleted: usize,
    pub skipped_large: usize,
}

impl ScanStats {
    /// Whether anything differs from the prior snapshot's view.
    pub fn any_changes(&self) -> bool {
        self.changed > 0 || self.added > 0 || self.deleted > 0
    }
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub index: Index,
    pub stats: ScanStats,
}

/// Build the new index for the tree rooted at `root`.
///
/// `cache` and `dir_cache` are updated in place; the caller persists them.
pub fn scan<S: ObjectStore + Sync>(
    root: &Path,
    prior: &Index,
    cache: &mut StatCache,
    dir_cache: &mut DirCache,
    filter: &PathFilter,
    store: &S,
) -> Result<ScanOutcome> {
    if cache.is_empty() {
        scan_full(root, prior, cache, dir_cache, filter, store)
    } else {
        scan_stat_only(root, prior, cache, dir_cache, filter, store)
    }
}

fn worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(2, MAX_WORKERS)
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(unix)]
fn mtime_secs(md: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    md.mtime()
}

#[cfg(not(unix))]
fn mtime_secs(md: &Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn index_entry(path: String, md: &Metadata, digest: Digest) -> IndexEntry {
    IndexEntry {
        path,
        digest,
        mode: StatFields::from_metadata(md).mode,
        size: md.len(),
        mtime: mtime_secs(md),
    }
}

/// Whether `dir` is a foreign repository root that must not be absorbed
/// into a snapshot. Independent of the ignore predicate.
fn is_submodule_boundary(dir: &Path) -> bool {
    // A `.git` *file* marks a submodule worktree, a directory a full repo.
    dir.join(".git").symlink_metadata().is_ok()
}

fn skip_by_name(name: &str) -> bool {
    name == fractyl_paths::REPO_DIR_NAME || name == ".git"
}

// ---------------------------------------------------------------------------
// Stat-only strategy

fn scan_stat_only<S: ObjectStore + Sync>(
    root: &Path,
    prior: &Index,
    cache: &mut StatCache,
    dir_cache: &mut DirCache,
    filter: &PathFilter,
    store: &S,
) -> Result<ScanOutcome> {
    let paths: Vec<String> = cache.iter().map(|(p, _)| p.to_owned()).collect();
    let abs: Vec<PathBuf> = paths.iter().map(|p| root.join(p)).collect();

    // Parallel lstat sweep; each worker owns a contiguous slice.
    let mut stats_results: Vec<Option<Metadata>> = Vec::new();
    stats_results.resize_with(paths.len(), || None);
    let chunk = abs.len().div_ceil(worker_count()).max(1);
    thread::scope(|s| {
        for (abs_chunk, out_chunk) in abs.chunks(chunk).zip(stats_results.chunks_mut(chunk)) {
            s.spawn(move || {
                for (path, out) in abs_chunk.iter().zip(out_chunk.iter_mut()) {
                    *out = fs::symlink_metadata(path).ok();
                }
            });
        }
    });

    let mut index = Index::new();
    let mut stats = ScanStats::default();
    let mut deleted: Vec<String> = Vec::new();
    let mut changed: Vec<usize> = Vec::new();

    for (i, (path, md)) in paths.iter().zip(&stats_results).enumerate() {
        let md = match md {
            Some(md) if md.is_file() => md,
            // Gone, or no longer a regular file.
            _ => {
                deleted.push(path.clone());
                stats.deleted += 1;
                continue;
            }
        };

        if md.len() > MAX_FILE_SIZE {
            warn!("skipping large file {path} ({} bytes)", md.len());
            deleted.push(path.clone());
            stats.skipped_large += 1;
            continue;
        }

        let status = cache.check_file(path, &StatFields::from_metadata(md));
        if status == FileStatus::Unchanged {
            if let Some(prev) = prior.find_entry(path) {
                index.add_entry_direct(prev.clone());
                stats.unchanged += 1;
                continue;
            }
            // The cached digest is only a 20-byte hint; without a prior
            // entry the full digest must be recomputed.
        }
        debug_assert_ne!(status, FileStatus::New);
        changed.push(i);
    }

    // Hash changed bodies in parallel, one file per job; racing puts of
    // identical content are benign in a content-addressed store.
    let mut digests: Vec<Option<Digest>> = Vec::new();
    digests.resize_with(changed.len(), || None);
    if !changed.is_empty() {
        let hash_chunk = changed.len().div_ceil(worker_count()).max(1);
        thread::scope(|s| {
            for (job_chunk, out_chunk) in changed.chunks(hash_chunk).zip(digests.chunks_mut(hash_chunk)) {
                s.spawn(|| {
                    for (&i, out) in job_chunk.iter().zip(out_chunk.iter_mut()) {
                        match store.put_file(&abs[i]) {
                            Ok(digest) => *out = Some(digest),
                            Err(e) => warn!("failed to store {}: {e}", paths[i]),
                        }
                    }
                });
            }
        });
    }

    for (&i, digest) in changed.iter().zip(&digests) {
        let Some(digest) = digest else { continue };
        let md = stats_results[i].as_ref().expect("changed entries were statted");
        index.add_entry_direct(index_entry(paths[i].clone(), md, *digest));
        cache.update_entry(&paths[i], &StatFields::from_metadata(md), digest);
        stats.changed += 1;
    }

    for path in &deleted {
        cache.remove_entry(path);
    }

    // New files are invisible to a stat sweep. Walk for them unless a fresh
    // cache with zero observed changes says the tree is quiescent.
    let quiescent = stats.changed == 0
        && stats.deleted == 0
        && stats.skipped_large == 0
        && cache.age_secs() < FRESH_CACHE_SECS;
    if quiescent {
        debug!("skipping new-file walk: no changes and cache is recent");
    } else {
        walk_new_files(
            root,
            "",
            cache,
            dir_cache,
            filter,
            store,
            &mut index,
            &mut stats,
        )?;
    }

    Ok(ScanOutcome { index, stats })
}

/// Recursive walk looking only for files absent from the stat cache.
///
/// A directory whose recorded mtime and direct file count are unchanged has
/// gained no direct children, so its files are not re-examined; descent
/// into subdirectories still happens, their own entries decide.
#[allow(clippy::too_many_arguments)]
fn walk_new_files<S: ObjectStore + Sync>(
    dir: &Path,
    rel: &str,
    cache: &mut StatCache,
    dir_cache: &mut DirCache,
    filter: &PathFilter,
    store: &S,
    index: &mut Index,
    stats: &mut ScanStats,
) -> Result<()> {
    let dir_md = match fs::metadata(dir) {
        Ok(md) => md,
        Err(e) => {
            warn!("cannot stat directory {}: {e}", dir.display());
            return Ok(());
        }
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read directory {}: {e}", dir.display());
            return Ok(());
        }
    };

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut subdirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if skip_by_name(name) {
            continue;
        }
        let rel_child = join_rel(rel, name);
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };
        if file_type.is_dir() {
            if filter.ignored(&rel_child, true) || is_submodule_boundary(&entry.path()) {
                continue;
            }
            subdirs.push((rel_child, entry.path()));
        } else if file_type.is_file() {
            if filter.ignored(&rel_child, false) {
                continue;
            }
            files.push((rel_child, entry.path()));
        }
    }

    let file_count = files.len() as u32;
    let dir_mtime = mtime_secs(&dir_md);
    if !dir_cache.unchanged(rel, dir_mtime, file_count) {
        for (rel_child, abs_child) in files {
            if cache.find_entry(&rel_child).is_some() {
                continue;
            }
            let md = match fs::symlink_metadata(&abs_child) {
                Ok(md) if md.is_file() => md,
                _ => continue,
            };
            if md.len() > MAX_FILE_SIZE {
                warn!("skipping large file {rel_child} ({} bytes)", md.len());
                stats.skipped_large += 1;
                continue;
            }
            match store.put_file(&abs_child) {
                Ok(digest) => {
                    cache.update_entry(&rel_child, &StatFields::from_metadata(&md), &digest);
                    index.add_entry_direct(index_entry(rel_child, &md, digest));
                    stats.added += 1;
                }
                Err(e) => warn!("failed to store {rel_child}: {e}"),
            }
        }
        dir_cache.update(rel, dir_mtime, file_count);
    }

    for (rel_child, abs_child) in subdirs {
        walk_new_files(
            &abs_child, &rel_child, cache, dir_cache, filter, store, index, stats,
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Full-traversal strategy

enum Task {
    Dir { abs: PathBuf, rel: String },
    Shutdown,
}

struct Walk<'a, S> {
    store: &'a S,
    filter: &'a PathFilter,
    prior: &'a Index,
    tx: Sender<Task>,
    /// Directories enqueued but not yet fully processed; the worker that
    /// drops this to zero shuts the pool down.
    pending: AtomicUsize,
    threads: usize,
    index: Mutex<Index>,
    cache_updates: Mutex<Vec<(String, StatFields, Digest)>>,
    dir_updates: Mutex<Vec<(String, i64, u32)>>,
    stats: Mutex<ScanStats>,
}

impl<S: ObjectStore + Sync> Walk<'_, S> {
    fn enqueue(&self, abs: PathBuf, rel: String) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Task::Dir { abs, rel });
    }

    fn run(&self, rx: &Receiver<Task>) {
        while let Ok(task) = rx.recv() {
            match task {
                Task::Shutdown => break,
                Task::Dir { abs, rel } => {
                    self.process_dir(&abs, &rel);
                    if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        for _ in 0..self.threads {
                            let _ = self.tx.send(Task::Shutdown);
                        }
                    }
                }
            }
        }
    }

    fn process_dir(&self, abs: &Path, rel: &str) {
        let entries = match fs::read_dir(abs) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read directory {}: {e}", abs.display());
                return;
            }
        };

        let mut file_count = 0u32;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if skip_by_name(name) {
                continue;
            }
            let rel_child = join_rel(rel, name);
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if self.filter.ignored(&rel_child, true) || is_submodule_boundary(&entry.path()) {
                    continue;
                }
                self.enqueue(entry.path(), rel_child);
            } else if file_type.is_file() {
                if self.filter.ignored(&rel_child, false) {
                    continue;
                }
                file_count += 1;
                self.process_file(&entry.path(), rel_child);
            }
            // Symlinks, sockets, devices: out of scope.
        }

        if let Ok(md) = fs::metadata(abs) {
            self.dir_updates
                .lock()
                .unwrap()
                .push((rel.to_owned(), mtime_secs(&md), file_count));
        }
    }

    fn process_file(&self, abs: &Path, rel: String) {
        let md = match fs::symlink_metadata(abs) {
            Ok(md) if md.is_file() => md,
            _ => return,
        };
        if md.len() > MAX_FILE_SIZE {
            warn!("skipping large file {rel} ({} bytes)", md.len());
            self.stats.lock().unwrap().skipped_large += 1;
            return;
        }

        // Reuse the prior digest when size and mtime both match; anything
        // else gets hashed and stored.
        let prev = self.prior.find_entry(&rel);
        let reused = prev.filter(|p| p.size == md.len() && p.mtime == mtime_secs(&md));
        let digest = match reused {
            Some(prev) => prev.digest,
            None => match self.store.put_file(abs) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!("failed to store {rel}: {e}");
                    return;
                }
            },
        };

        {
            let mut stats = self.stats.lock().unwrap();
            match (reused.is_some(), prev.is_some()) {
                (true, _) => stats.unchanged += 1,
                (false, true) => stats.changed += 1,
                (false, false) => stats.added += 1,
            }
        }

        let fields = StatFields::from_metadata(&md);
        self.cache_updates
            .lock()
            .unwrap()
            .push((rel.clone(), fields, digest));
        self.index
            .lock()
            .unwrap()
            .add_entry_direct(index_entry(rel, &md, digest));
    }
}

fn scan_full<S: ObjectStore + Sync>(
    root: &Path,
    prior: &Index,
    cache: &mut StatCache,
    dir_cache: &mut DirCache,
    filter: &PathFilter,
    store: &S,
) -> Result<ScanOutcome> {
    let threads = worker_count();
    let (tx, rx) = unbounded();

    let walk = Walk {
        store,
        filter,
        prior,
        tx,
        pending: AtomicUsize::new(0),
        // Workers plus the calling thread all drain the queue.
        threads: threads + 1,
        index: Mutex::new(Index::new()),
        cache_updates: Mutex::new(Vec::new()),
        dir_updates: Mutex::new(Vec::new()),
        stats: Mutex::new(ScanStats::default()),
    };

    walk.enqueue(root.to_path_buf(), String::new());
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| walk.run(&rx));
        }
        walk.run(&rx);
    });

    let index = walk.index.into_inner().unwrap();
    let mut stats = walk.stats.into_inner().unwrap();
    for entry in prior.iter() {
        if index.find_entry(&entry.path).is_none() {
            stats.deleted += 1;
        }
    }

    // The traversal saw the whole tree; both caches are rebuilt from it.
    *cache = StatCache::new(cache.branch());
    for (path, fields, digest) in walk.cache_updates.into_inner().unwrap() {
        cache.update_entry(&path, &fields, &digest);
    }
    *dir_cache = DirCache::new();
    for (dir, mtime, count) in walk.dir_updates.into_inner().unwrap() {
        dir_cache.update(&dir, mtime, count);
    }

    Ok(ScanOutcome { index, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::store::FsObjectStore;
    use fractyl_paths::{FromPathUnchecked, ObjectsDir};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        store: FsObjectStore,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let store =
                FsObjectStore::new(ObjectsDir::from_path_unchecked(tmp.path().join("objects")));
            Self { tmp, store }
        }

        fn root(&self) -> PathBuf {
            self.tmp.path().join("work")
        }

        fn write(&self, rel: &str, body: &[u8]) {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }

        fn scan(
            &self,
            prior: &Index,
            cache: &mut StatCache,
            dir_cache: &mut DirCache,
        ) -> ScanOutcome {
            let filter = PathFilter::load(&self.root());
            scan(&self.root(), prior, cache, dir_cache, &filter, &self.store).unwrap()
        }
    }

    fn paths(index: &Index) -> BTreeSet<String> {
        index.iter().map(|e| e.path.clone()).collect()
    }

    #[test]
    fn full_scan_finds_regular_files() {
        let fx = Fixture::new();
        fx.write("a.txt", b"hello");
        fx.write("b/c.txt", b"world");
        fx.write(".fractyl/index", b"internal");
        fx.write(".git/config", b"internal");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let out = fx.scan(&Index::new(), &mut cache, &mut dirs);

        assert_eq!(
            paths(&out.index),
            BTreeSet::from(["a.txt".to_owned(), "b/c.txt".to_owned()])
        );
        assert_eq!(out.stats.added, 2);
        assert_eq!(
            out.index.find_entry("a.txt").unwrap().digest,
            hash_bytes(b"hello")
        );
        // The traversal populated the cache for the next scan.
        assert_eq!(cache.len(), 2);
        assert!(fx.store.exists(&hash_bytes(b"world")));
    }

    #[test]
    fn submodule_directories_are_not_descended() {
        let fx = Fixture::new();
        fx.write("tracked.txt", b"mine");
        fx.write("sub/.git/HEAD", b"ref: refs/heads/main");
        fx.write("sub/a.txt", b"foreign");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let out = fx.scan(&Index::new(), &mut cache, &mut dirs);

        assert_eq!(paths(&out.index), BTreeSet::from(["tracked.txt".to_owned()]));
        assert!(!fx.store.exists(&hash_bytes(b"foreign")));
    }

    #[test]
    fn gitignore_rules_are_honored() {
        let fx = Fixture::new();
        fx.write(".gitignore", b"*.log\n");
        fx.write("keep.txt", b"keep");
        fx.write("noise.log", b"noise");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let out = fx.scan(&Index::new(), &mut cache, &mut dirs);

        assert_eq!(
            paths(&out.index),
            BTreeSet::from([".gitignore".to_owned(), "keep.txt".to_owned()])
        );
    }

    #[test]
    fn second_scan_reuses_digests_without_rehashing() {
        let fx = Fixture::new();
        fx.write("a.txt", b"hello");
        fx.write("b.txt", b"world");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let first = fx.scan(&Index::new(), &mut cache, &mut dirs);

        let second = fx.scan(&first.index, &mut cache, &mut dirs);
        assert_eq!(second.stats.unchanged, 2);
        assert!(!second.stats.any_changes());
        // Change monotonicity: unchanged paths carry the prior digest.
        for entry in second.index.iter() {
            assert_eq!(
                entry.digest,
                first.index.find_entry(&entry.path).unwrap().digest
            );
        }
    }

    #[test]
    fn stat_only_detects_modification_and_deletion() {
        let fx = Fixture::new();
        fx.write("a.txt", b"one");
        fx.write("b.txt", b"two");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let first = fx.scan(&Index::new(), &mut cache, &mut dirs);

        // Rewrite with different size so second-resolution mtime can't hide it.
        fx.write("a.txt", b"one but longer");
        fs::remove_file(fx.root().join("b.txt")).unwrap();

        let second = fx.scan(&first.index, &mut cache, &mut dirs);
        assert_eq!(second.stats.changed, 1);
        assert_eq!(second.stats.deleted, 1);
        assert_eq!(paths(&second.index), BTreeSet::from(["a.txt".to_owned()]));
        assert_eq!(
            second.index.find_entry("a.txt").unwrap().digest,
            hash_bytes(b"one but longer")
        );
        assert!(cache.find_entry("b.txt").is_none());
    }

    #[test]
    fn quiescent_scan_skips_new_file_detection() {
        let fx = Fixture::new();
        fx.write("a.txt", b"steady");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let first = fx.scan(&Index::new(), &mut cache, &mut dirs);

        // Persisting the cache stamps it fresh; with zero observed changes
        // the next scan trusts it and skips the new-file walk entirely.
        cache.save(fx.tmp.path().join("index_main.bin")).unwrap();
        fx.write("unseen.txt", b"added moments later");

        let second = fx.scan(&first.index, &mut cache, &mut dirs);
        assert_eq!(second.stats.added, 0);
        assert!(second.index.find_entry("unseen.txt").is_none());
    }

    #[test]
    fn stat_only_finds_new_files_alongside_changes() {
        let fx = Fixture::new();
        fx.write("a.txt", b"one");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let first = fx.scan(&Index::new(), &mut cache, &mut dirs);

        fx.write("a.txt", b"one edited");
        fx.write("fresh/new.txt", b"brand new");

        let second = fx.scan(&first.index, &mut cache, &mut dirs);
        assert_eq!(second.stats.added, 1);
        assert!(second.index.find_entry("fresh/new.txt").is_some());
        assert!(fx.store.exists(&hash_bytes(b"brand new")));
    }

    #[test]
    fn empty_files_are_tracked() {
        let fx = Fixture::new();
        fx.write("empty", b"");

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let out = fx.scan(&Index::new(), &mut cache, &mut dirs);

        let entry = out.index.find_entry("empty").unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.digest, hash_bytes(b""));
        assert!(fx.store.exists(&hash_bytes(b"")));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let fx = Fixture::new();
        fx.write("real.txt", b"real");
        std::os::unix::fs::symlink(fx.root().join("real.txt"), fx.root().join("link.txt"))
            .unwrap();

        let mut cache = StatCache::new("main");
        let mut dirs = DirCache::new();
        let out = fx.scan(&Index::new(), &mut cache, &mut dirs);

        assert_eq!(paths(&out.index), BTreeSet::from(["real.txt".to_owned()]));
    }
}
