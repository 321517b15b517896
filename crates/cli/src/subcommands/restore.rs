use anyhow::Result;
use fractyl_core::restore::{restore, RestoreOptions};

use super::{open_repo, vcs_for};

#[derive(clap::Args)]
pub struct Args {
    /// Snapshot to restore: full id, unique prefix (>= 4 chars), or -N
    pub reference: String,
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    let vcs = vcs_for(&repo);

    let outcome = restore(&repo, &vcs, &args.reference, &RestoreOptions::default())?;

    if let Some(id) = &outcome.safety_snapshot {
        println!("Saved uncommitted changes as snapshot {}", &id[..8]);
    }
    println!(
        "Restored snapshot {}: \"{}\" ({} files restored, {} removed)",
        &outcome.record.id[..8.min(outcome.record.id.len())],
        outcome.record.description,
        outcome.restored,
        outcome.removed
    );
    Ok(())
}
