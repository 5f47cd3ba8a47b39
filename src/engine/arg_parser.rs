use clap::Parser;
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

/// Export every user in a SQLite database as JSON, newest first.
#[derive(Clone, Parser)]
#[command(name = "bulkpipe")]
#[command(about = "Stream users out of a database through a worker pool; output keeps scan order.")]
pub struct Cli {
    /// Users database. Default: $BULKPIPE_DB, else `bulkpipe.db` in the current directory.
    #[arg(value_name = "DB")]
    pub db: Option<PathBuf>,

    /// Insert N generated users before exporting (creates the database if missing).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub seed: Option<usize>,

    /// Give up after SECS seconds; the output is marked partial.
    #[arg(long, short = 't', value_name = "SECS", value_parser = clap::value_parser!(u64))]
    pub timeout: Option<u64>,

    /// Worker threads. Default: available threads x 3, at most 100.
    #[arg(long, short = 'w', value_parser = clap::value_parser!(usize))]
    pub workers: Option<usize>,

    /// Capacity of the job queue and the result sink.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub queue_cap: Option<usize>,

    /// Inputs shorter than this skip the worker pool.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub threshold: Option<usize>,

    /// Rows fetched per database round trip.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub batch_size: Option<usize>,

    /// Stop at the first user that fails to transform instead of reporting it in place.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub abort_on_failure: Option<bool>,

    /// Treat a failed total count as an error instead of omitting the total.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub require_count: Option<bool>,

    /// Write JSON here instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Open or create the database with SQLCipher. Prompts for passphrase (or use BULKPIPE_DB_KEY / .env).
    #[arg(long, short = 'x', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub encrypt: Option<bool>,

    /// Verbose output and a progress counter.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Database path from the command line or the environment, if either names one.
    pub fn db_from_args_or_env(&self) -> Option<PathBuf> {
        self.db.clone().or_else(|| {
            std::env::var_os(PackagePaths::get().db_env_var())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }
}
