use anyhow::Result;

use super::{current_branch, open_repo};

#[derive(clap::Args)]
pub struct Args {
    /// Snapshot to delete: full id, unique prefix, or -N
    pub reference: String,
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    let branch = current_branch(&repo);

    let id = repo.delete_snapshot(&branch, &args.reference)?;
    println!("Deleted snapshot {id}");
    println!("note: objects remain in the store; they are not garbage-collected");
    Ok(())
}
