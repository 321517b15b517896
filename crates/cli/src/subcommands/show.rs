use std::path::PathBuf;

use anyhow::Result;
use fractyl_core::index::Index;
use fractyl_core::resolver;
use fractyl_core::store::ObjectStore;

use super::{current_branch, open_repo};

#[derive(clap::Args)]
pub struct Args {
    /// Snapshot to show: full id, unique prefix, or -N
    pub reference: String,
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    let branch = current_branch(&repo);

    let id = resolver::resolve(&branch, &args.reference)?;
    let record = branch.load_record(&id)?;
    let bytes = repo.store().get(&record.index_hash)?;
    let index = Index::from_bytes(&bytes, &PathBuf::from(format!("<index object {}>", record.index_hash)))?;

    println!("snapshot {}", record.id);
    println!("Date:        {}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Parent:      {}", record.parent.as_deref().unwrap_or("(none)"));
    println!("Index:       {}", record.index_hash);
    if let Some(branch) = &record.git_branch {
        println!("Git branch:  {branch}");
    }
    if let Some(commit) = &record.git_commit {
        println!("Git commit:  {commit}");
    }
    if let Some(dirty) = record.git_dirty {
        println!("Git dirty:   {dirty}");
    }
    println!();
    println!("    {}", record.description);
    println!();

    let total: u64 = index.iter().map(|e| e.size).sum();
    println!("{} files, {total} bytes", index.len());
    Ok(())
}
