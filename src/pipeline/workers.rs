use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, Scope, ScopedJoinHandle};

use super::context::{Context, Wait};
use crate::error::{FirstError, PipelineError, render};
use crate::types::{
    FailurePolicy, IndexedJob, IndexedResult, ItemResult, PipelineOpts, TransformFailure,
};

/// Pool size: explicit override, else available threads times the multiplier; always within
/// `1..=max_workers`.
pub fn resolve_worker_count(opts: &PipelineOpts) -> usize {
    let cap = opts.max_workers.max(1);
    let wanted = match opts.num_workers {
        Some(n) => n,
        None => rayon::current_num_threads().saturating_mul(opts.worker_multiplier.max(1)),
    };
    wanted.clamp(1, cap)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("transform panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("transform panicked: {}", s)
    } else {
        "transform panicked".to_string()
    }
}

/// Run the transform on one item. Errors and panics become a tagged failure for `ordinal`.
pub fn apply_transform<T, O, F>(transform: &F, ordinal: usize, item: T) -> ItemResult<O>
where
    F: Fn(T) -> anyhow::Result<O>,
{
    match catch_unwind(AssertUnwindSafe(|| transform(item))) {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(err)) => Err(TransformFailure {
            ordinal,
            message: render(&err),
        }),
        Err(payload) => Err(TransformFailure {
            ordinal,
            message: panic_message(payload),
        }),
    }
}

/// Single worker: take jobs until the queue is closed and drained or the context is cancelled.
/// Returns how many jobs it transformed.
fn worker_loop<T, O, F>(
    job_rx: Receiver<IndexedJob<T>>,
    result_tx: Sender<IndexedResult<O>>,
    transform: &F,
    ctx: Context,
) -> usize
where
    F: Fn(T) -> anyhow::Result<O>,
{
    let signal = ctx.signal();
    let mut done = 0_usize;
    while let Wait::Ready(job) = signal.recv(&job_rx) {
        let result = IndexedResult {
            ordinal: job.ordinal,
            result: apply_transform(transform, job.ordinal, job.item),
        };
        done += 1;
        if signal.is_cancelled() {
            // Leave it for the collector's final drain if there is room; never block here.
            let _ = result_tx.try_send(result);
            break;
        }
        if signal.send(&result_tx, result) != Wait::Ready(()) {
            break;
        }
    }
    done
}

/// Spawn `num_workers` scoped workers. Each holds a clone of `result_tx`; the caller must drop
/// its own sender so the sink closes when the last worker exits.
pub fn spawn_workers<'scope, 'env, T, O, F>(
    scope: &'scope Scope<'scope, 'env>,
    num_workers: usize,
    job_rx: &Receiver<IndexedJob<T>>,
    result_tx: &Sender<IndexedResult<O>>,
    transform: &'env F,
    ctx: &Context,
) -> Vec<ScopedJoinHandle<'scope, usize>>
where
    T: Send + 'scope,
    O: Send + 'scope,
    F: Fn(T) -> anyhow::Result<O> + Sync,
{
    let mut handles = Vec::with_capacity(num_workers);
    for worker_idx in 0..num_workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-worker-{}", env!("CARGO_PKG_NAME"), worker_idx))
            .spawn_scoped(scope, move || worker_loop(job_rx, result_tx, transform, ctx));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(
                    "started {} of {} workers: {}",
                    handles.len(),
                    num_workers,
                    e
                );
                break;
            }
        }
    }
    debug!("worker pool: {} workers", handles.len());
    handles
}

/// Join workers; returns total jobs transformed. A panicked worker counts as zero.
pub fn join_workers(handles: Vec<ScopedJoinHandle<'_, usize>>) -> usize {
    handles
        .into_iter()
        .map(|h| match h.join() {
            Ok(n) => n,
            Err(_) => {
                warn!("worker thread panicked");
                0
            }
        })
        .sum()
}

/// Small-input path: transform `items` in order on the calling thread.
/// Stops early on cancellation, or on the first failure under [`FailurePolicy::AbortAll`].
pub fn run_sequential<T, O, F>(
    items: Vec<T>,
    transform: &F,
    policy: FailurePolicy,
    ctx: &Context,
    errors: &FirstError,
) -> Vec<ItemResult<O>>
where
    F: Fn(T) -> anyhow::Result<O>,
{
    let mut out = Vec::with_capacity(items.len());
    for (ordinal, item) in items.into_iter().enumerate() {
        if let Some(reason) = ctx.err() {
            errors.record(PipelineError::Cancelled(reason));
            break;
        }
        let result = apply_transform(transform, ordinal, item);
        if let Err(ref failure) = result
            && policy == FailurePolicy::AbortAll
        {
            errors.record(PipelineError::Transform {
                ordinal,
                message: failure.message.clone(),
            });
            break;
        }
        out.push(result);
    }
    out
}
