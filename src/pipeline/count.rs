//! Count estimator: the total is queried on its own thread, racing the scan, and only awaited
//! when the outcome is assembled.

use crossbeam_channel::{Receiver, bounded};
use log::{debug, warn};
use std::thread::{self, Scope};

use super::context::{Context, Wait};
use crate::error::{PipelineError, render};
use crate::source::DataSource;

pub type CountResult = std::result::Result<i64, PipelineError>;

/// Start the count query. The receiver yields exactly one result.
pub fn spawn_count_estimator<'scope, 'env, S>(
    scope: &'scope Scope<'scope, 'env>,
    source: &'env S,
    query: &'env S::Query,
    ctx: &Context,
) -> Receiver<CountResult>
where
    S: DataSource,
{
    let (count_tx, count_rx) = bounded::<CountResult>(1);
    let thread_ctx = ctx.clone();
    let thread_tx = count_tx.clone();
    let spawned = thread::Builder::new()
        .name(format!("{}-count", env!("CARGO_PKG_NAME")))
        .spawn_scoped(scope, move || {
            let res = source
                .count(query, &thread_ctx)
                .map_err(|e| match thread_ctx.err() {
                    Some(reason) => PipelineError::Cancelled(reason),
                    None => PipelineError::SourceCount(render(&e)),
                });
            debug!("count estimator finished: {:?}", res);
            let _ = thread_tx.send(res);
        });
    if let Err(e) = spawned {
        warn!("count estimator not started: {}", e);
        let _ = count_tx.send(Err(PipelineError::SourceCount(format!(
            "spawn count thread: {}",
            e
        ))));
    }
    count_rx
}

/// Wait for the count, giving up when `ctx` is cancelled.
pub fn await_count(count_rx: &Receiver<CountResult>, ctx: &Context) -> CountResult {
    match ctx.signal().recv(count_rx) {
        Wait::Ready(res) => res,
        Wait::Closed => Err(PipelineError::SourceCount(
            "count thread exited without a result".to_string(),
        )),
        Wait::Cancelled(reason) => {
            // A finished count still counts.
            count_rx
                .try_recv()
                .unwrap_or(Err(PipelineError::Cancelled(reason)))
        }
    }
}
