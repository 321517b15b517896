use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;

/// How often [`Lockfile::wait_acquire`] retries.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    /// The lock is held by a live process.
    #[error("repository is locked by running process {holder}")]
    Held { holder: u32 },
    /// [`Lockfile::wait_acquire`] gave up after the timeout.
    #[error("timed out waiting for repository lock after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An advisory, PID-stamped lock file.
///
/// Acquisition creates the file with `O_CREAT|O_EXCL` and writes the owning
/// process id. If the file already exists but its recorded pid is no longer
/// running, the stale file is removed and acquisition retried once, so a
/// crashed writer never wedges the repository.
///
/// Dropping the `Lockfile` releases it. Release double-checks that the file
/// still carries our pid before unlinking, so a crash-and-restart cannot
/// remove a newer owner's lock.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    pid: u32,
}

impl Lockfile {
    /// Try to acquire the lock at `path` without blocking.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref();

        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match read_pid(path) {
                    Some(holder) if process_alive(holder) => Err(LockError::Held { holder }),
                    holder => {
                        // Stale or unreadable lock; clear it and retry once.
                        info!(
                            "removing stale lock file (pid {} no longer running)",
                            holder.unwrap_or(0)
                        );
                        fs::remove_file(path)?;
                        match Self::try_create(path) {
                            Ok(lock) => Ok(lock),
                            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                                let holder = read_pid(path).unwrap_or(0);
                                Err(LockError::Held { holder })
                            }
                            Err(e) => Err(e.into()),
                        }
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire the lock, polling until `timeout` elapses.
    pub fn wait_acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, LockError> {
        let path = path.as_ref();
        let deadline = Instant::now() + timeout;
        let mut reported = false;

        loop {
            match Self::acquire(path) {
                Ok(lock) => return Ok(lock),
                Err(LockError::Held { holder }) => {
                    if !reported {
                        info!("waiting for operation in progress (pid {holder})");
                        reported = true;
                    }
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout(timeout));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_create(path: &Path) -> io::Result<Self> {
        let pid = std::process::id();
        let mut file = File::options().write(true).create_new(true).open(path)?;
        writeln!(file, "{pid}")?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        // Only unlink if the file still records our pid.
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("failed to remove lock file {}: {e}", self.path.display());
            }
        }
    }
}

/// The pid recorded in the lock file at `path`, if it parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    let mut buf = String::new();
    File::open(path).ok()?.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

/// Whether `pid` names a live process.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // kill(pid, 0) probes for existence without signalling. EPERM still
    // means the process exists.
    match unsafe { libc::kill(pid as libc::pid_t, 0) } {
        0 => true,
        _ => io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH),
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, err on the side of treating the
    // holder as alive; the user can remove the lock file manually.
    true
}
