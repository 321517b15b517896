use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod subcommands;

use subcommands::{daemon, delete, diff, init, list, restore, show, snapshot};

#[derive(Parser)]
#[command(name = "fractyl", version, about = "Content-addressed snapshots of your working tree")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a fractyl repository in the current directory
    Init(init::Args),
    /// Take a snapshot of the working tree
    Snapshot(snapshot::Args),
    /// Restore the working tree to a snapshot
    Restore(restore::Args),
    /// List snapshots on the current branch, newest first
    List(list::Args),
    /// Delete a snapshot record
    Delete(delete::Args),
    /// Show one snapshot in detail
    Show(show::Args),
    /// Diff two snapshots, or a snapshot against the working state
    Diff(diff::Args),
    /// Manage the periodic-snapshot daemon
    Daemon(daemon::Args),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init(args) => init::exec(args),
        Command::Snapshot(args) => snapshot::exec(args),
        Command::Restore(args) => restore::exec(args),
        Command::List(args) => list::exec(args),
        Command::Delete(args) => delete::exec(args),
        Command::Show(args) => show::exec(args),
        Command::Diff(args) => diff::exec(args),
        Command::Daemon(args) => daemon::exec(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
