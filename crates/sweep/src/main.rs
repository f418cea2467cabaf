//! Sweep driver executable for fusetune.

use anyhow::Result;
use clap::Parser;
use fusetune_sweep::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
