use std::env;

use anyhow::Result;
use fractyl_core::Repository;

#[derive(clap::Args)]
pub struct Args {}

pub fn exec(_args: Args) -> Result<()> {
    let repo = Repository::init(env::current_dir()?)?;
    println!(
        "Initialized empty fractyl repository in {}",
        repo.dir().display()
    );
    Ok(())
}
