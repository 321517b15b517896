use anyhow::Result;
use fractyl_core::commit::{commit, CommitOptions, CommitOutcome};

use super::{open_repo, vcs_for};

#[derive(clap::Args)]
pub struct Args {
    /// Snapshot description; generated from the previous one when omitted
    #[arg(short = 'm', long = "message")]
    pub message: Option<String>,
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    let vcs = vcs_for(&repo);

    let outcome = commit(
        &repo,
        &vcs,
        &CommitOptions {
            description: args.message,
            lock_timeout: None,
        },
    )?;

    match outcome {
        CommitOutcome::NoChanges => println!("No changes detected since last snapshot"),
        CommitOutcome::Created { record, stats } => {
            println!(
                "Created snapshot {}: \"{}\"",
                &record.id[..8.min(record.id.len())],
                record.description
            );
            println!(
                "  {} unchanged, {} changed, {} added, {} deleted",
                stats.unchanged, stats.changed, stats.added, stats.deleted
            );
        }
    }
    Ok(())
}
