use anyhow::Result;

use super::{current_branch, open_repo};

#[derive(clap::Args)]
pub struct Args {}

pub fn exec(_args: Args) -> Result<()> {
    let repo = open_repo()?;
    let branch = current_branch(&repo);

    let records = branch.list_records()?;
    if records.is_empty() {
        println!("No snapshots on branch '{}'", branch.name());
        return Ok(());
    }

    let current = branch.current_id()?;
    println!("Snapshots on branch '{}':", branch.name());
    for record in records {
        let marker = if current.as_deref() == Some(record.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}  {}",
            &record.id[..8.min(record.id.len())],
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.description
        );
    }
    Ok(())
}
