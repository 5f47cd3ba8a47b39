//! CLI command handler: optional seeding, then export every user as a JSON envelope.

use anyhow::{Context as _, Result, bail};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::arg_parser::Cli;
use crate::engine::export::{Envelope, write_envelope};
use crate::engine::progress::{ProgressBar, create_counter, finish_bar, update_progress_bar};
use crate::pipeline::{Context, run_bulk_pipeline_observed};
use crate::source::SqliteSource;
use crate::source::sqlite::{is_encrypted, open_db};
use crate::types::{Opts, PipelineOutcome};
use crate::users::{UserDecoder, UserResponse, seed_users, to_response, users_query};
use crate::utils::bulkpipe_toml::{
    apply_file_to_opts, count_policy, failure_policy, load_bulkpipe_toml,
};
use crate::utils::config::PackagePaths;
use crate::utils::{Colors, get_passphrase, setup_logging};

/// Defaults, then `.bulkpipe.toml` in `dir`, then the command line.
fn setup_opts(cli: &Cli, dir: &Path) -> Opts {
    let mut opts = Opts::default();
    if let Some(file) = load_bulkpipe_toml(dir) {
        apply_file_to_opts(&file, &mut opts);
    }
    if let Some(db) = cli.db_from_args_or_env() {
        opts.db_path = Some(db);
    }
    opts.seed = cli.seed;
    if cli.timeout.is_some() {
        opts.timeout_secs = cli.timeout;
    }
    if cli.workers.is_some() {
        opts.pipeline.num_workers = cli.workers;
    }
    if let Some(cap) = cli.queue_cap {
        opts.pipeline.queue_capacity = cap;
    }
    if let Some(threshold) = cli.threshold {
        opts.pipeline.sequential_threshold = threshold;
    }
    if let Some(batch) = cli.batch_size {
        opts.batch_size = batch;
    }
    if let Some(abort) = cli.abort_on_failure {
        opts.pipeline.failure_policy = failure_policy(abort);
    }
    if let Some(required) = cli.require_count {
        opts.pipeline.count_policy = count_policy(required);
    }
    if cli.out.is_some() {
        opts.out = cli.out.clone();
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    if let Some(x) = cli.encrypt {
        opts.encrypt = x;
    }
    opts
}

fn resolve_db_path(opts: &Opts, dir: &Path) -> PathBuf {
    opts.db_path
        .clone()
        .unwrap_or_else(|| dir.join(PackagePaths::get().db_filename()))
}

/// Passphrase when `--encrypt` is set or the existing database needs one.
fn resolve_passphrase(opts: &Opts, db_path: &Path, dir: &Path) -> Result<Option<String>> {
    let exists = db_path.exists();
    if opts.encrypt || (exists && is_encrypted(db_path)) {
        return get_passphrase(dir, !exists).map(Some);
    }
    Ok(None)
}

/// Ctrl+C cancels `ctx`; the export returns what it has, marked partial.
fn install_interrupt(ctx: &Context) {
    let ctx = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || ctx.cancel()) {
        warn!("cannot install Ctrl+C handler: {}", e);
    }
}

fn summarize(outcome: &PipelineOutcome<UserResponse>) {
    let (color, label) = if outcome.is_complete() {
        (Colors::OK, "complete")
    } else if outcome.error.is_some() {
        (Colors::FAILED, "incomplete")
    } else {
        (Colors::PARTIAL, "degraded")
    };
    info!(
        "{} | exported {} of {} users in {:?} ({} workers{})",
        Colors::colorize(color, label),
        outcome.successes().count(),
        outcome
            .total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string()),
        outcome.stats.elapsed,
        outcome.stats.workers,
        if outcome.stats.sequential {
            ", sequential"
        } else {
            ""
        }
    );
}

/// Seed if asked, export, write the envelope. Errors when the export was not a success.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let dir = std::env::current_dir().context("resolve current directory")?;
    let _ = dotenvy::from_path(dir.join(".env"));
    let opts = setup_opts(cli, &dir);
    setup_logging(opts.verbose);
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        opts
    );

    let db_path = resolve_db_path(&opts, &dir);
    let passphrase = resolve_passphrase(&opts, &db_path, &dir)?;

    if let Some(n) = opts.seed {
        let mut conn = open_db(&db_path, passphrase.as_deref())?;
        seed_users(&mut conn, n)?;
    }
    if !db_path.exists() {
        bail!(
            "no database at {} (use --seed N to create one)",
            db_path.display()
        );
    }

    let ctx = match opts.timeout_secs {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };
    install_interrupt(&ctx);

    let source = SqliteSource::new(&db_path, UserDecoder)
        .with_passphrase(passphrase.as_deref())
        .with_batch_size(opts.batch_size);
    let bar: Option<ProgressBar> = opts.verbose.then(|| create_counter("Exporting", " users"));
    let mut on_progress = |n: usize| {
        if let Some(ref pb) = bar {
            update_progress_bar(pb, n);
        }
    };
    let outcome = run_bulk_pipeline_observed(
        &ctx,
        &source,
        &users_query(),
        to_response,
        &opts.pipeline,
        &mut on_progress,
    );
    if let Some(ref pb) = bar {
        finish_bar(pb);
    }
    summarize(&outcome);

    let envelope = Envelope::from_outcome(&outcome);
    write_envelope(&envelope, opts.out.as_deref())?;
    if let Some(err) = envelope.error {
        bail!("export failed: {}", err);
    }
    Ok(())
}
