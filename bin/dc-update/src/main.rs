//! ---
//! dcu_section: "05-cli"
//! dcu_subsection: "binary"
//! dcu_type: "source"
//! dcu_scope: "code"
//! dcu_description: "Command line entry point for dc-update."
//! dcu_version: "v0.0.0-prealpha"
//! dcu_owner: "tbd"
//! ---
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};
use dcu_common::version::VersionInfo;

mod progress;
mod update;

#[derive(Debug, Parser)]
#[command(
    name = "dc-update",
    author,
    disable_version_flag = true,
    about = "Update docker compose services whose images have changed",
    long_about = "Pulls the image of every requested service and restarts only the \
                  containers whose image actually changed, a few services at a time."
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(flatten)]
    update: update::UpdateArgs,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(ExitCode::SUCCESS);
    }
    update::run(cli.update)
}
