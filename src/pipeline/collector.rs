//! Order-preserving collector: the only writer of the final sequence. Results arrive in
//! completion order and are placed by ordinal.

use crossbeam_channel::Receiver;
use log::warn;

use super::context::{Context, Wait};
use crate::error::{CancelReason, FirstError, PipelineError};
use crate::types::{FailurePolicy, IndexedResult, ItemResult};
use crate::utils::config::ProgressConsts;

/// Slots indexed by ordinal plus bookkeeping for completion checks.
pub struct Collector<O> {
    slots: Vec<Option<ItemResult<O>>>,
    received: usize,
    failures: usize,
    /// Set when collection stopped before the sink closed.
    stopped: Option<CancelReason>,
    unreported: usize,
}

impl<O> Default for Collector<O> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            received: 0,
            failures: 0,
            stopped: None,
            unreported: 0,
        }
    }
}

impl<O> Collector<O> {
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            slots: Vec::with_capacity(expected),
            ..Self::default()
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn stopped(&self) -> Option<CancelReason> {
        self.stopped
    }

    /// Put one result in its slot. Returns the failure if the result is one.
    fn place(&mut self, res: IndexedResult<O>) -> Option<(usize, String)> {
        let ordinal = res.ordinal;
        if ordinal >= self.slots.len() {
            self.slots.resize_with(ordinal + 1, || None);
        }
        if self.slots[ordinal].is_some() {
            warn!("duplicate result for ordinal {}; keeping the first", ordinal);
            return None;
        }
        let failure = res.result.as_ref().err().map(|f| (ordinal, f.message.clone()));
        if failure.is_some() {
            self.failures += 1;
        }
        self.slots[ordinal] = Some(res.result);
        self.received += 1;
        self.unreported += 1;
        failure
    }

    fn report(&mut self, on_progress: &mut dyn FnMut(usize)) {
        if self.unreported >= ProgressConsts::PROGRESS_UPDATE_BATCH_SIZE {
            on_progress(self.unreported);
            self.unreported = 0;
        }
    }

    /// Receive until the sink closes (every worker exited) or `ctx` is cancelled. Under
    /// [`FailurePolicy::AbortAll`] the first failure is recorded and `ctx` is cancelled.
    pub fn collect(
        &mut self,
        result_rx: &Receiver<IndexedResult<O>>,
        ctx: &Context,
        policy: FailurePolicy,
        errors: &FirstError,
        on_progress: &mut dyn FnMut(usize),
    ) {
        let signal = ctx.signal();
        loop {
            match signal.recv(result_rx) {
                Wait::Ready(res) => {
                    let failure = self.place(res);
                    self.report(on_progress);
                    if let Some((ordinal, message)) = failure
                        && policy == FailurePolicy::AbortAll
                    {
                        errors.record(PipelineError::Transform { ordinal, message });
                        ctx.cancel_with(CancelReason::Aborted);
                        self.stopped = Some(CancelReason::Aborted);
                        break;
                    }
                }
                Wait::Closed => break,
                Wait::Cancelled(reason) => {
                    self.stopped = Some(reason);
                    break;
                }
            }
        }
    }

    /// Take results still buffered in the sink after the pool has been joined.
    pub fn drain(&mut self, result_rx: &Receiver<IndexedResult<O>>) {
        for res in result_rx.try_iter() {
            self.place(res);
        }
    }

    /// Flush the progress remainder and return the contiguous filled prefix, in ordinal order.
    /// Under [`FailurePolicy::AbortAll`] the prefix ends before the first failure.
    pub fn finish(
        mut self,
        policy: FailurePolicy,
        on_progress: &mut dyn FnMut(usize),
    ) -> Vec<ItemResult<O>> {
        if self.unreported > 0 {
            on_progress(self.unreported);
            self.unreported = 0;
        }
        let prefix = self.slots.into_iter().map_while(|slot| slot);
        match policy {
            FailurePolicy::CollectPartial => prefix.collect(),
            FailurePolicy::AbortAll => prefix.take_while(|r| r.is_ok()).collect(),
        }
    }

    /// Add results produced outside the pool (in order, starting at ordinal 0).
    pub fn extend_sequential(&mut self, results: Vec<ItemResult<O>>) {
        for (ordinal, result) in results.into_iter().enumerate() {
            self.place(IndexedResult { ordinal, result });
        }
    }
}
