//! Public and internal types for the bulkpipe API and pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::utils::config::{DB_SCAN_BATCH_SIZE, PipelineDefaults};

/// A raw item paired with its scan position. Moves through the job queue to exactly one worker.
#[derive(Debug)]
pub struct IndexedJob<T> {
    pub ordinal: usize,
    pub item: T,
}

/// A transformed item (or its failure) paired with the ordinal of the job it came from.
#[derive(Debug)]
pub struct IndexedResult<O> {
    pub ordinal: usize,
    pub result: ItemResult<O>,
}

/// Per-item transform failure, kept in the output sequence at its ordinal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("item {ordinal}: {message}")]
pub struct TransformFailure {
    pub ordinal: usize,
    pub message: String,
}

pub type ItemResult<O> = std::result::Result<O, TransformFailure>;

/// What a transform failure does to the whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// First failure stops the pipeline; the outcome keeps the successful prefix and is partial.
    AbortAll,
    /// Failures stay in place as tagged entries; the rest of the run continues.
    #[default]
    CollectPartial,
}

/// What a failed count query does to the outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountPolicy {
    /// Total becomes `None` and the error is reported as metadata; items are unaffected.
    #[default]
    Degrade,
    /// Count failure is terminal: the outcome is marked partial.
    Mandatory,
}

/// Pipeline tunables. `Default` uses [`PipelineDefaults`].
#[derive(Clone, Debug)]
pub struct PipelineOpts {
    /// Job queue and result sink capacity. Bounds producer read-ahead (memory vs throughput).
    pub queue_capacity: usize,
    /// Explicit worker count. When None, derived from available parallelism.
    pub num_workers: Option<usize>,
    /// Workers per available thread when `num_workers` is None.
    pub worker_multiplier: usize,
    /// Upper bound on workers regardless of input size or hardware.
    pub max_workers: usize,
    /// Inputs shorter than this are transformed sequentially on the calling thread. Capped at
    /// `queue_capacity`, since those items are read before the queue exists.
    pub sequential_threshold: usize,
    pub failure_policy: FailurePolicy,
    pub count_policy: CountPolicy,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            queue_capacity: PipelineDefaults::QUEUE_CAPACITY,
            num_workers: None,
            worker_multiplier: PipelineDefaults::WORKER_MULTIPLIER,
            max_workers: PipelineDefaults::MAX_WORKERS,
            sequential_threshold: PipelineDefaults::SEQUENTIAL_THRESHOLD,
            failure_policy: FailurePolicy::default(),
            count_policy: CountPolicy::default(),
        }
    }
}

/// Instrumentation for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Jobs handed out (ordinals assigned).
    pub produced: usize,
    /// Results received by the collector.
    pub collected: usize,
    /// Execution contexts that ran transforms (1 on the sequential path).
    pub workers: usize,
    /// True when the small-input path ran without a pool.
    pub sequential: bool,
    /// Highest job-queue depth seen by the producer. Never above the queue capacity.
    pub peak_queue_depth: usize,
    pub transform_failures: usize,
    pub elapsed: Duration,
}

/// Final artifact of a run: ordered items, independently obtained total, terminal state.
#[derive(Debug)]
pub struct PipelineOutcome<O> {
    /// `items[k]` is the result for the k-th item read from the source.
    pub items: Vec<ItemResult<O>>,
    /// Total from the count query. `None` when the count failed or was cancelled.
    pub total: Option<i64>,
    /// Terminal error: scan failure, cancellation, abort-all failure, mandatory count failure.
    pub error: Option<PipelineError>,
    /// Count failure under [`CountPolicy::Degrade`].
    pub count_error: Option<PipelineError>,
    /// Items is a prefix/subset of the scan, not the whole of it.
    pub partial: bool,
    pub stats: PipelineStats,
}

impl<O> PipelineOutcome<O> {
    pub(crate) fn empty(error: PipelineError, stats: PipelineStats) -> Self {
        Self {
            items: Vec::new(),
            total: None,
            error: Some(error),
            count_error: None,
            partial: true,
            stats,
        }
    }

    /// Whole scan, every transform succeeded, total known.
    pub fn is_complete(&self) -> bool {
        !self.partial
            && self.error.is_none()
            && self.count_error.is_none()
            && self.stats.transform_failures == 0
    }

    pub fn successes(&self) -> impl Iterator<Item = &O> {
        self.items.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TransformFailure> {
        self.items.iter().filter_map(|r| r.as_ref().err())
    }

    /// All-or-nothing view: the outputs when the run was not partial and no item failed.
    pub fn into_outputs(self) -> std::result::Result<Vec<O>, PipelineError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.items
            .into_iter()
            .map(|r| {
                r.map_err(|f| PipelineError::Transform {
                    ordinal: f.ordinal,
                    message: f.message,
                })
            })
            .collect()
    }
}

/// Full options for the CLI. Library callers use [`PipelineOpts`] directly.
#[derive(Clone, Debug)]
pub struct Opts {
    /// Users database path. When None, `BULKPIPE_DB` or the package default filename.
    pub db_path: Option<PathBuf>,
    /// Insert this many generated users before exporting.
    pub seed: Option<usize>,
    /// Deadline for the export, in seconds.
    pub timeout_secs: Option<u64>,
    /// Write JSON here instead of stdout.
    pub out: Option<PathBuf>,
    /// Show progress counter and debug logging.
    pub verbose: bool,
    /// Open (or create) the database with SQLCipher.
    pub encrypt: bool,
    /// Rows fetched per SQLite batch.
    pub batch_size: usize,
    pub pipeline: PipelineOpts,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            db_path: None,
            seed: None,
            timeout_secs: None,
            out: None,
            verbose: false,
            encrypt: false,
            batch_size: DB_SCAN_BATCH_SIZE,
            pipeline: PipelineOpts::default(),
        }
    }
}
