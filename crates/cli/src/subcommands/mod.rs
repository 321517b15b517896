pub mod daemon;
pub mod delete;
pub mod diff;
pub mod init;
pub mod list;
pub mod restore;
pub mod show;
pub mod snapshot;

use std::env;

use anyhow::Result;
use fractyl_core::refs::Branch;
use fractyl_core::vcs::{GitCli, VcsProvider};
use fractyl_core::{Repository, DEFAULT_BRANCH};

/// Open the repository containing the current directory.
pub(crate) fn open_repo() -> Result<Repository> {
    Ok(Repository::open(env::current_dir()?)?)
}

/// The VCS provider for a repository's working tree.
pub(crate) fn vcs_for(repo: &Repository) -> GitCli {
    GitCli::new(repo.workdir())
}

/// The branch snapshot history is currently partitioned under.
pub(crate) fn current_branch(repo: &Repository) -> Branch {
    let name = vcs_for(repo)
        .context()
        .branch
        .unwrap_or_else(|| DEFAULT_BRANCH.into());
    repo.branch(&name)
}
