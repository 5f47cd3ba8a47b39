use crossbeam_channel::{Sender, bounded};
use log::{debug, warn};
use std::thread;
use std::time::Instant;

use super::collector::Collector;
use super::context::{Context, Wait};
use super::count::{await_count, spawn_count_estimator};
use super::cursor::CursorAdapter;
use super::error_handler::finalize_outcome;
use super::producer::{ProducerReport, run_producer};
use super::workers::{join_workers, resolve_worker_count, run_sequential, spawn_workers};
use crate::error::{CancelReason, FirstError, PipelineError, render};
use crate::source::{DataSource, SourceCursor};
use crate::types::{
    IndexedJob, IndexedResult, ItemResult, PipelineOpts, PipelineOutcome, PipelineStats,
};

/// Run the pipeline: count concurrently, stream the scan through the worker pool, and return
/// the results in scan order. Never panics on source or transform failures; the outcome says
/// whether it is complete, partial, or empty, and why.
pub fn run_bulk_pipeline<S, O, F>(
    ctx: &Context,
    source: &S,
    query: &S::Query,
    transform: F,
    opts: &PipelineOpts,
) -> PipelineOutcome<O>
where
    S: DataSource,
    O: Send,
    F: Fn(S::Item) -> anyhow::Result<O> + Sync,
{
    run_bulk_pipeline_observed(ctx, source, query, transform, opts, &mut |_| {})
}

/// Same as [`run_bulk_pipeline`], calling `on_progress(n)` on the calling thread as batches of
/// `n` results reach the collector.
pub fn run_bulk_pipeline_observed<S, O, F>(
    ctx: &Context,
    source: &S,
    query: &S::Query,
    transform: F,
    opts: &PipelineOpts,
    on_progress: &mut dyn FnMut(usize),
) -> PipelineOutcome<O>
where
    S: DataSource,
    O: Send,
    F: Fn(S::Item) -> anyhow::Result<O> + Sync,
{
    let started = Instant::now();
    // Pipeline-internal context: abort-all cancels this one, never the caller's.
    let run_ctx = ctx.child();
    let errors = FirstError::new();

    let mut outcome = thread::scope(|scope| {
        let count_rx = spawn_count_estimator(scope, source, query, ctx);

        let cursor = match source.open(query) {
            Ok(cursor) => CursorAdapter::new(cursor),
            Err(e) => {
                warn!("cannot open source cursor: {:#}", e);
                let mut outcome =
                    PipelineOutcome::empty(PipelineError::Open(render(&e)), PipelineStats::default());
                if let Ok(total) = await_count(&count_rx, ctx) {
                    outcome.total = Some(total);
                }
                return outcome;
            }
        };
        let _interrupt = cursor.interrupter().map(|interrupt| run_ctx.on_cancel(interrupt));
        let watch = spawn_deadline_watch(scope, &run_ctx);

        let (items, report, stats) = run_stages(
            scope,
            cursor,
            &transform,
            opts,
            &run_ctx,
            &errors,
            on_progress,
        );
        drop(watch);
        let count = await_count(&count_rx, ctx);
        finalize_outcome(items, report, &errors, count, opts.count_policy, stats)
    });
    outcome.stats.elapsed = started.elapsed();
    debug!(
        "pipeline finished in {:?}: {} items, total {:?}, partial {}",
        outcome.stats.elapsed,
        outcome.items.len(),
        outcome.total,
        outcome.partial
    );
    outcome
}

/// A deadline only fires hooks once some thread observes it, and a thread blocked inside a
/// source read observes nothing. This one waits on the deadline so the read gets interrupted.
/// Exits when the returned sender is dropped.
fn spawn_deadline_watch<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    run_ctx: &Context,
) -> Option<Sender<()>> {
    run_ctx.deadline()?;
    let (finished_tx, finished_rx) = bounded::<()>(0);
    let signal = run_ctx.signal();
    let spawned = thread::Builder::new()
        .name(format!("{}-deadline", env!("CARGO_PKG_NAME")))
        .spawn_scoped(scope, move || {
            if let Wait::Cancelled(reason) = signal.recv(&finished_rx) {
                debug!("deadline watch: run stopped ({})", reason);
            }
        });
    match spawned {
        Ok(_) => Some(finished_tx),
        Err(e) => {
            warn!("deadline watch not started: {}", e);
            None
        }
    }
}

type StageResult<O> = (Vec<ItemResult<O>>, ProducerReport, PipelineStats);

/// Read ahead up to the sequential threshold (never more than the queue holds), then either
/// transform on this thread (short input) or hand the read-ahead and the cursor to the
/// producer and start the pool.
fn run_stages<'scope, 'env, C, O, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    mut cursor: CursorAdapter<C>,
    transform: &'env F,
    opts: &PipelineOpts,
    run_ctx: &Context,
    errors: &'env FirstError,
    on_progress: &mut dyn FnMut(usize),
) -> StageResult<O>
where
    C: SourceCursor + 'scope,
    O: Send + 'scope,
    F: Fn(C::Item) -> anyhow::Result<O> + Sync,
{
    let threshold = read_ahead_limit(opts);
    let mut prefix = Vec::new();
    while prefix.len() < threshold {
        if run_ctx.is_cancelled() {
            break;
        }
        match cursor.advance() {
            Some(item) => prefix.push(item),
            None => break,
        }
    }

    if prefix.len() < threshold {
        return run_small(cursor, prefix, transform, opts, run_ctx, errors, on_progress);
    }
    run_pooled(scope, cursor, prefix, transform, opts, run_ctx, errors, on_progress)
}

/// Items read before the queue exists count against its capacity.
fn read_ahead_limit(opts: &PipelineOpts) -> usize {
    opts.sequential_threshold.min(opts.queue_capacity.max(1))
}

/// Everything fit in the read-ahead (or the scan stopped early): no pool, one execution context.
fn run_small<C, O, F>(
    mut cursor: CursorAdapter<C>,
    prefix: Vec<C::Item>,
    transform: &F,
    opts: &PipelineOpts,
    run_ctx: &Context,
    errors: &FirstError,
    on_progress: &mut dyn FnMut(usize),
) -> StageResult<O>
where
    C: SourceCursor,
    F: Fn(C::Item) -> anyhow::Result<O>,
{
    if let Some(err) = cursor.take_error() {
        let recorded = match run_ctx.err() {
            Some(reason) => PipelineError::Cancelled(reason),
            None => PipelineError::SourceScan(render(&err)),
        };
        errors.record(recorded);
    }
    if let Some(reason) = run_ctx.err() {
        errors.record(PipelineError::Cancelled(reason));
    }
    let report = ProducerReport {
        produced: prefix.len(),
        exhausted: cursor.is_exhausted(),
        peak_queue_depth: 0,
    };
    cursor.close();
    debug!("small input ({} items): transforming sequentially", prefix.len());

    let results = run_sequential(prefix, transform, opts.failure_policy, run_ctx, errors);
    let mut collector = Collector::with_capacity(results.len());
    collector.extend_sequential(results);
    let stats = PipelineStats {
        collected: collector.received(),
        workers: 1,
        sequential: true,
        ..PipelineStats::default()
    };
    (collector.finish(opts.failure_policy, on_progress), report, stats)
}

#[allow(clippy::too_many_arguments)]
fn run_pooled<'scope, 'env, C, O, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    cursor: CursorAdapter<C>,
    prefix: Vec<C::Item>,
    transform: &'env F,
    opts: &PipelineOpts,
    run_ctx: &Context,
    errors: &'env FirstError,
    on_progress: &mut dyn FnMut(usize),
) -> StageResult<O>
where
    C: SourceCursor + 'scope,
    O: Send + 'scope,
    F: Fn(C::Item) -> anyhow::Result<O> + Sync,
{
    let capacity = opts.queue_capacity.max(1);
    let num_workers = resolve_worker_count(opts);
    debug!(
        "pooled path: {} workers, queue capacity {}",
        num_workers, capacity
    );

    let (job_tx, job_rx) = bounded::<IndexedJob<C::Item>>(capacity);
    let (result_tx, result_rx) = bounded::<IndexedResult<O>>(capacity);

    let producer_signal = run_ctx.signal();
    let producer = thread::Builder::new()
        .name(format!("{}-producer", env!("CARGO_PKG_NAME")))
        .spawn_scoped(scope, move || {
            run_producer(cursor, prefix, job_tx, producer_signal, errors)
        });
    let producer = match producer {
        Ok(handle) => handle,
        Err(e) => {
            errors.record(PipelineError::Spawn(e.to_string()));
            return (Vec::new(), ProducerReport::default(), PipelineStats::default());
        }
    };

    let workers = spawn_workers(scope, num_workers, &job_rx, &result_tx, transform, run_ctx);
    // Only workers may hold these now: the queue closes when the producer is done, the sink
    // when the last worker exits.
    drop(job_rx);
    drop(result_tx);
    if workers.is_empty() {
        errors.record(PipelineError::Spawn("no worker could be started".to_string()));
        run_ctx.cancel_with(CancelReason::Aborted);
    }
    let spawned = workers.len();

    let mut collector = Collector::with_capacity(capacity);
    collector.collect(&result_rx, run_ctx, opts.failure_policy, errors, on_progress);
    let transformed = join_workers(workers);
    if collector.stopped().is_some() {
        collector.drain(&result_rx);
    }
    let report = match producer.join() {
        Ok(report) => report,
        Err(_) => {
            errors.record(PipelineError::SourceScan(
                "producer thread panicked".to_string(),
            ));
            ProducerReport::default()
        }
    };
    if collector.stopped().is_none() && collector.received() != report.produced {
        warn!(
            "collector received {} results for {} jobs",
            collector.received(),
            report.produced
        );
    }
    debug!(
        "pool done: {} transformed, {} collected, {} failures",
        transformed,
        collector.received(),
        collector.failures()
    );

    let stats = PipelineStats {
        collected: collector.received(),
        workers: spawned,
        sequential: false,
        peak_queue_depth: report.peak_queue_depth,
        ..PipelineStats::default()
    };
    (collector.finish(opts.failure_policy, on_progress), report, stats)
}
