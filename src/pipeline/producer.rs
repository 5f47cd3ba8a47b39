//! Streaming producer: drains the cursor into the bounded job queue, assigning ordinals.
//! A full queue blocks the producer; that is the pipeline's backpressure.

use crossbeam_channel::Sender;
use log::{debug, warn};

use super::context::{Signal, Wait};
use super::cursor::CursorAdapter;
use crate::error::{FirstError, PipelineError, render};
use crate::source::SourceCursor;
use crate::types::IndexedJob;

/// What the producer did before it closed the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Ordinals handed out: `0..produced`.
    pub produced: usize,
    /// Cursor reached its end (no error, no cancellation).
    pub exhausted: bool,
    /// Highest queue depth observed right after an offer.
    pub peak_queue_depth: usize,
}

/// Drive the cursor on the current thread. `prefix` holds items already read ahead; they get
/// the first ordinals. Closes the cursor and drops `job_tx` on return.
pub fn run_producer<C>(
    mut cursor: CursorAdapter<C>,
    prefix: Vec<C::Item>,
    job_tx: Sender<IndexedJob<C::Item>>,
    signal: Signal,
    errors: &FirstError,
) -> ProducerReport
where
    C: SourceCursor,
{
    let mut report = ProducerReport::default();

    let offer = |item: C::Item, report: &mut ProducerReport| -> bool {
        let job = IndexedJob {
            ordinal: report.produced,
            item,
        };
        match signal.send(&job_tx, job) {
            Wait::Ready(()) => {
                report.produced += 1;
                report.peak_queue_depth = report.peak_queue_depth.max(job_tx.len());
                true
            }
            Wait::Closed => {
                debug!("producer: job queue closed by workers");
                false
            }
            Wait::Cancelled(reason) => {
                errors.record(PipelineError::Cancelled(reason));
                false
            }
        }
    };

    let mut stopped = false;
    for item in prefix {
        if !offer(item, &mut report) {
            stopped = true;
            break;
        }
    }

    while !stopped {
        if let Some(reason) = signal.context().err() {
            errors.record(PipelineError::Cancelled(reason));
            break;
        }
        match cursor.advance() {
            Some(item) => stopped = !offer(item, &mut report),
            None => break,
        }
    }

    if let Some(err) = cursor.take_error() {
        // An interrupted read is the cancellation showing up as an I/O error.
        let recorded = match signal.context().err() {
            Some(reason) => PipelineError::Cancelled(reason),
            None => {
                warn!("scan stopped after {} items: {:#}", report.produced, err);
                PipelineError::SourceScan(render(&err))
            }
        };
        errors.record(recorded);
    }
    report.exhausted = cursor.is_exhausted() && !stopped;
    cursor.close();
    drop(job_tx);
    debug!(
        "producer: done, {} jobs (exhausted: {}, peak queue depth {})",
        report.produced, report.exhausted, report.peak_queue_depth
    );
    report
}
