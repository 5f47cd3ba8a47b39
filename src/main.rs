//! Bulkpipe CLI: export users as JSON; use --seed to generate some first.

use anyhow::Result;
use bulkpipe::engine::arg_parser::Cli;
use bulkpipe::engine::handle_run;
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
