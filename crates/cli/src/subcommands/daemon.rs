//! The periodic-snapshot supervisor: a timer that commits through the
//! repository lock. `start` spawns this binary again in the foreground mode
//! with its output appended to `.fractyl/daemon.log`; `daemon.pid` guards
//! against double starts and lets `stop` find the process.

use std::fs::OpenOptions;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use fractyl_core::commit::{commit, CommitOptions, CommitOutcome};
use fractyl_core::Repository;
use fractyl_fs_utils::lockfile::{process_alive, read_pid};
use fractyl_fs_utils::write_atomic;
use log::{info, warn};

use super::{open_repo, vcs_for};

/// Seconds between snapshots when `-i` is not given.
const DEFAULT_INTERVAL_SECS: u64 = 300;

#[derive(clap::Args)]
pub struct Args {
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Start the daemon in the background
    Start {
        /// Seconds between snapshots
        #[arg(short = 'i', long = "interval", default_value_t = DEFAULT_INTERVAL_SECS)]
        interval: u64,
        /// Run in the foreground instead of spawning
        #[arg(long, hide = true)]
        foreground: bool,
    },
    /// Stop a running daemon
    Stop,
    /// Report whether the daemon is running
    Status,
    /// Stop the daemon if running, then start it again
    Restart {
        #[arg(short = 'i', long = "interval", default_value_t = DEFAULT_INTERVAL_SECS)]
        interval: u64,
    },
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    match args.action {
        Action::Start { interval, foreground } => {
            if foreground {
                run_loop(&repo, interval)
            } else {
                start(&repo, interval)
            }
        }
        Action::Stop => stop(&repo),
        Action::Status => status(&repo),
        Action::Restart { interval } => {
            if running_pid(&repo).is_some() {
                stop(&repo)?;
            }
            start(&repo, interval)
        }
    }
}

fn running_pid(repo: &Repository) -> Option<u32> {
    let pid_path = repo.dir().daemon_pid();
    let pid = read_pid(&pid_path.0)?;
    process_alive(pid).then_some(pid)
}

fn start(repo: &Repository, interval: u64) -> Result<()> {
    if interval == 0 {
        bail!("interval must be at least 1 second");
    }
    if let Some(pid) = running_pid(repo) {
        bail!("daemon already running (pid {pid})");
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(repo.dir().daemon_log())
        .context("opening daemon log")?;

    let exe = std::env::current_exe().context("locating fractyl binary")?;
    let child = Command::new(exe)
        .args(["daemon", "start", "--foreground", "-i", &interval.to_string()])
        .current_dir(repo.workdir())
        .env("RUST_LOG", "info")
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .spawn()
        .context("spawning daemon")?;

    println!("Daemon started (pid {}), interval {interval}s", child.id());
    Ok(())
}

fn run_loop(repo: &Repository, interval: u64) -> Result<()> {
    let pid = std::process::id();
    write_atomic(repo.dir().daemon_pid(), format!("{pid}\n").as_bytes())?;
    info!("daemon pid {pid} snapshotting every {interval}s");

    let vcs = vcs_for(repo);
    loop {
        match commit(repo, &vcs, &CommitOptions::default()) {
            Ok(CommitOutcome::Created { record, stats }) => info!(
                "snapshot {} ({} changed, {} added, {} deleted)",
                &record.id[..8],
                stats.changed,
                stats.added,
                stats.deleted
            ),
            Ok(CommitOutcome::NoChanges) => info!("no changes"),
            // Another writer or a transient failure; try again next tick.
            Err(e) => warn!("snapshot failed: {e}"),
        }
        thread::sleep(Duration::from_secs(interval));
    }
}

fn stop(repo: &Repository) -> Result<()> {
    let pid_path = repo.dir().daemon_pid();
    let Some(pid) = running_pid(repo) else {
        bail!("daemon is not running");
    };

    terminate(pid)?;
    let _ = std::fs::remove_file(&pid_path);
    println!("Daemon stopped (pid {pid})");
    Ok(())
}

fn status(repo: &Repository) -> Result<()> {
    match running_pid(repo) {
        Some(pid) => println!("Daemon running (pid {pid})"),
        None => println!("Daemon not running"),
    }
    Ok(())
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        bail!("failed to signal pid {pid}: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    bail!("stopping the daemon is not supported on this platform (pid {pid})")
}
