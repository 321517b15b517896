use std::path::PathBuf;

use anyhow::Result;
use fractyl_core::diff::{diff_indices, has_binary_extension, is_binary, ChangeKind, DiffEntry};
use fractyl_core::hash::Digest;
use fractyl_core::index::Index;
use fractyl_core::refs::Branch;
use fractyl_core::resolver;
use fractyl_core::store::ObjectStore;
use fractyl_core::Repository;
use similar::TextDiff;

use super::{current_branch, open_repo};

#[derive(clap::Args)]
pub struct Args {
    /// Older snapshot reference
    pub ref_a: String,
    /// Newer snapshot reference; the last committed state when omitted
    pub ref_b: Option<String>,
}

pub fn exec(args: Args) -> Result<()> {
    let repo = open_repo()?;
    let branch = current_branch(&repo);

    let old = load_snapshot_index(&repo, &branch, &args.ref_a)?;
    let new = match &args.ref_b {
        Some(reference) => load_snapshot_index(&repo, &branch, reference)?,
        None => Index::load(repo.dir().live_index())?,
    };

    let changes = diff_indices(&old, &new);
    if changes.is_empty() {
        println!("No differences");
        return Ok(());
    }

    for change in &changes {
        render(&repo, change)?;
    }
    Ok(())
}

fn load_snapshot_index(repo: &Repository, branch: &Branch, reference: &str) -> Result<Index> {
    let id = resolver::resolve(branch, reference)?;
    let record = branch.load_record(&id)?;
    let bytes = repo.store().get(&record.index_hash)?;
    let origin = PathBuf::from(format!("<index object {}>", record.index_hash));
    Ok(Index::from_bytes(&bytes, &origin)?)
}

fn body(repo: &Repository, digest: Option<&Digest>) -> Result<Vec<u8>> {
    match digest {
        Some(digest) => Ok(repo.store().get(digest)?),
        None => Ok(Vec::new()),
    }
}

fn render(repo: &Repository, change: &DiffEntry) -> Result<()> {
    let path = &change.path;
    let tag = match change.kind {
        ChangeKind::Added => "added",
        ChangeKind::Deleted => "deleted",
        ChangeKind::Modified => "modified",
    };

    let old = body(repo, change.old.as_ref().map(|e| &e.digest))?;
    let new = body(repo, change.new.as_ref().map(|e| &e.digest))?;

    println!("--- a/{path}");
    println!("+++ b/{path}");
    if has_binary_extension(path) || is_binary(&old) || is_binary(&new) {
        println!("Binary files differ ({tag})");
        println!();
        return Ok(());
    }

    let old_text = String::from_utf8_lossy(&old);
    let new_text = String::from_utf8_lossy(&new);
    let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());
    print!(
        "{}",
        diff.unified_diff().context_radius(3).missing_newline_hint(false)
    );
    println!();
    Ok(())
}
