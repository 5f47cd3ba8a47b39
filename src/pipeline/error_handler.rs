use log::{debug, warn};

use super::count::CountResult;
use super::producer::ProducerReport;
use crate::error::{FirstError, PipelineError};
use crate::types::{CountPolicy, ItemResult, PipelineOutcome, PipelineStats};

/// Build the outcome once every pipeline thread has been joined.
///
/// `scan_complete` is true when the producer hit end-of-cursor and every produced job has a
/// result in `items`; a cancellation that arrived after that point does not make the run partial.
pub fn finalize_outcome<O>(
    items: Vec<ItemResult<O>>,
    report: ProducerReport,
    errors: &FirstError,
    count: CountResult,
    count_policy: CountPolicy,
    mut stats: PipelineStats,
) -> PipelineOutcome<O> {
    let scan_complete = report.exhausted && items.len() == report.produced;
    let mut error = errors.take();
    if scan_complete && error.as_ref().is_some_and(PipelineError::is_cancellation) {
        debug!("cancellation arrived after the scan completed; keeping full result");
        error = None;
    }
    let mut partial = error.is_some() || !scan_complete;

    let (total, count_error) = match count {
        Ok(n) => (Some(n), None),
        Err(e) => match count_policy {
            CountPolicy::Degrade => {
                warn!("total unavailable: {}", e);
                (None, Some(e))
            }
            CountPolicy::Mandatory => {
                partial = true;
                if error.is_none() {
                    error = Some(e.clone());
                }
                (None, Some(e))
            }
        },
    };

    stats.produced = report.produced;
    stats.peak_queue_depth = stats.peak_queue_depth.max(report.peak_queue_depth);
    stats.transform_failures = items.iter().filter(|r| r.is_err()).count();
    if stats.transform_failures > 0 {
        warn!("{} items failed to transform", stats.transform_failures);
    }
    if partial {
        warn!(
            "partial outcome: {} of {} produced items returned ({})",
            items.len(),
            report.produced,
            error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "incomplete scan".to_string())
        );
    }

    PipelineOutcome {
        items,
        total,
        error,
        count_error,
        partial,
        stats,
    }
}
