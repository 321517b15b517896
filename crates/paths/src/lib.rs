//! Typed paths for the on-disk layout of a fractyl repository.
//!
//! Every location inside the `.fractyl/` directory gets its own newtype, so
//! that functions taking e.g. a [`SnapshotsDir`] cannot accidentally be handed
//! the objects directory. Construction starts from [`RepoDir`] and flows down
//! the hierarchy; arbitrary paths can only enter via [`FromPathUnchecked`].

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the repository directory inside the working tree.
pub const REPO_DIR_NAME: &str = ".fractyl";

/// Escape hatch for constructing a typed path from an arbitrary [`PathBuf`],
/// e.g. in tests or when re-opening a location recorded elsewhere.
pub trait FromPathUnchecked {
    fn from_path_unchecked(path: impl Into<PathBuf>) -> Self;
}

macro_rules! path_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name(pub PathBuf);

        impl AsRef<Path> for $name {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl AsRef<OsStr> for $name {
            fn as_ref(&self) -> &OsStr {
                self.0.as_os_str()
            }
        }

        impl FromPathUnchecked for $name {
            fn from_path_unchecked(path: impl Into<PathBuf>) -> Self {
                Self(path.into())
            }
        }

        impl $name {
            pub fn display(&self) -> std::path::Display<'_> {
                self.0.display()
            }

            pub fn metadata(&self) -> io::Result<fs::Metadata> {
                self.0.metadata()
            }

            pub fn exists(&self) -> bool {
                self.0.exists()
            }
        }
    };
}

macro_rules! dir_type {
    ($(#[$attr:meta])* $name:ident) => {
        path_type!($(#[$attr])* $name);

        impl $name {
            /// Create this directory and any missing parents.
            pub fn create(&self) -> io::Result<()> {
                fs::create_dir_all(&self.0)
            }
        }
    };
}

dir_type!(
    /// The `.fractyl/` directory at the root of a working tree.
    RepoDir
);

impl RepoDir {
    /// The repository directory for the working tree rooted at `workdir`.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Self {
        Self(workdir.as_ref().join(REPO_DIR_NAME))
    }

    pub fn objects(&self) -> ObjectsDir {
        ObjectsDir(self.0.join("objects"))
    }

    pub fn branch(&self, name: &str) -> BranchDir {
        BranchDir(self.0.join("refs").join("heads").join(name))
    }

    pub fn cache(&self) -> CacheDir {
        CacheDir(self.0.join("cache"))
    }

    /// The live index, rewritten on every commit and restore.
    pub fn live_index(&self) -> IndexFilePath {
        IndexFilePath(self.0.join("index"))
    }

    pub fn lockfile(&self) -> LockfilePath {
        LockfilePath(self.0.join("fractyl.lock"))
    }

    pub fn daemon_pid(&self) -> DaemonPidPath {
        DaemonPidPath(self.0.join("daemon.pid"))
    }

    pub fn daemon_log(&self) -> DaemonLogPath {
        DaemonLogPath(self.0.join("daemon.log"))
    }

    /// Pre-branch layouts kept `snapshots/` and `CURRENT` directly under the
    /// repository directory. These accessors exist for migration only.
    pub fn legacy_snapshots(&self) -> SnapshotsDir {
        SnapshotsDir(self.0.join("snapshots"))
    }

    pub fn legacy_current(&self) -> CurrentFilePath {
        CurrentFilePath(self.0.join("CURRENT"))
    }
}

dir_type!(
    /// `objects/`, the content-addressed store.
    ObjectsDir
);

impl ObjectsDir {
    /// The fan-out location for an object named by its 64-char lowercase hex
    /// digest: `objects/<aa>/<remaining 62 chars>`.
    pub fn object(&self, hex: &str) -> ObjectPath {
        debug_assert_eq!(hex.len(), 64);
        ObjectPath(self.0.join(&hex[..2]).join(&hex[2..]))
    }

    /// The fan-out subdirectory for a digest prefix.
    pub fn fanout(&self, hex: &str) -> PathBuf {
        self.0.join(&hex[..2])
    }
}

dir_type!(
    /// `refs/heads/<branch>/`, the ref state of one branch.
    BranchDir
);

impl BranchDir {
    pub fn snapshots(&self) -> SnapshotsDir {
        SnapshotsDir(self.0.join("snapshots"))
    }

    pub fn current(&self) -> CurrentFilePath {
        CurrentFilePath(self.0.join("CURRENT"))
    }
}

dir_type!(
    /// A directory of snapshot record files, one `<id>.json` per snapshot.
    SnapshotsDir
);

impl SnapshotsDir {
    pub fn record(&self, id: &str) -> SnapshotRecordPath {
        SnapshotRecordPath(self.0.join(format!("{id}.json")))
    }
}

dir_type!(
    /// `cache/`, branch-local regeneratable state.
    CacheDir
);

impl CacheDir {
    pub fn stat_cache(&self, branch: &str) -> StatCachePath {
        StatCachePath(self.0.join(format!("index_{branch}.bin")))
    }

    pub fn dir_cache(&self, branch: &str) -> DirCachePath {
        DirCachePath(self.0.join(format!("dirs_{branch}.bin")))
    }
}

path_type!(ObjectPath);
path_type!(SnapshotRecordPath);
path_type!(CurrentFilePath);
path_type!(IndexFilePath);
path_type!(StatCachePath);
path_type!(DirCachePath);
path_type!(LockfilePath);
path_type!(DaemonPidPath);
path_type!(DaemonLogPath);

impl SnapshotRecordPath {
    /// The snapshot id encoded in this record's file name, if any.
    pub fn snapshot_id(&self) -> Option<&str> {
        self.0.file_name()?.to_str()?.strip_suffix(".json")
    }
}
