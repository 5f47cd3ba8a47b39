//! Error taxonomy for a pipeline run.
//!
//! Errors are stored as rendered messages so they can live in the first-wins
//! cell, be cloned into the outcome, and be compared in tests.

use std::fmt;
use std::sync::Mutex;

/// Why a context was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// Caller called [`Context::cancel`](crate::pipeline::Context::cancel).
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
    /// The pipeline stopped itself after a fatal transform failure (abort-all policy).
    Aborted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "cancelled by caller"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
            CancelReason::Aborted => write!(f, "aborted after transform failure"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// The cursor could not be opened; nothing was scanned.
    #[error("open source cursor: {0}")]
    Open(String),
    /// Fatal: the scan stopped at this point.
    #[error("source scan: {0}")]
    SourceScan(String),
    /// Degraded unless the count is mandatory.
    #[error("source count: {0}")]
    SourceCount(String),
    #[error("transform failed at ordinal {ordinal}: {message}")]
    Transform { ordinal: usize, message: String },
    #[error("pipeline {0}")]
    Cancelled(CancelReason),
    /// A pipeline thread could not be started.
    #[error("spawn pipeline thread: {0}")]
    Spawn(String),
}

impl PipelineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }
}

/// Render an `anyhow` chain on one line (`outer: inner: root`).
pub(crate) fn render(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

/// First-wins error cell shared by producer, workers, and collector.
#[derive(Debug, Default)]
pub struct FirstError {
    slot: Mutex<Option<PipelineError>>,
}

impl FirstError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` unless an error is already recorded. Returns true when `err` won.
    pub fn record(&self, err: PipelineError) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub fn get(&self) -> Option<PipelineError> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn take(&self) -> Option<PipelineError> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}
