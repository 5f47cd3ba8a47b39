//! `Vec`-backed source. Used by library callers that already hold their records, and by tests
//! (failure injection, slow scans, read-ahead instrumentation).

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{DataSource, Interrupter, SourceCursor};
use crate::pipeline::Context;

#[derive(Clone, Debug)]
pub struct MemorySource<T> {
    items: Arc<Vec<T>>,
    fail_open: Option<String>,
    fail_scan_at: Option<usize>,
    fail_count: Option<String>,
    scan_delay: Option<(usize, Duration)>,
    count_delay: Option<Duration>,
    advanced: Arc<AtomicUsize>,
}

impl<T> MemorySource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(items),
            fail_open: None,
            fail_scan_at: None,
            fail_count: None,
            scan_delay: None,
            count_delay: None,
            advanced: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opening a cursor fails with `msg`.
    pub fn fail_open(mut self, msg: impl Into<String>) -> Self {
        self.fail_open = Some(msg.into());
        self
    }

    /// Scan fails when it reaches position `at` (items before it are delivered).
    pub fn fail_scan_at(mut self, at: usize) -> Self {
        self.fail_scan_at = Some(at);
        self
    }

    /// Count query fails with `msg`.
    pub fn fail_count(mut self, msg: impl Into<String>) -> Self {
        self.fail_count = Some(msg.into());
        self
    }

    /// Sleep `pause` after every `every` items (simulates batched I/O).
    pub fn scan_delay(mut self, every: usize, pause: Duration) -> Self {
        self.scan_delay = Some((every.max(1), pause));
        self
    }

    /// Count query takes at least `delay` (cut short by cancellation).
    pub fn count_delay(mut self, delay: Duration) -> Self {
        self.count_delay = Some(delay);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items handed out by all cursors of this source so far.
    pub fn advanced(&self) -> usize {
        self.advanced.load(Ordering::SeqCst)
    }
}

pub struct MemoryCursor<T> {
    items: Arc<Vec<T>>,
    pos: usize,
    fail_at: Option<usize>,
    delay: Option<(usize, Duration)>,
    advanced: Arc<AtomicUsize>,
    interrupted: Arc<AtomicBool>,
    closed: bool,
}

impl<T: Clone + Send + Sync> SourceCursor for MemoryCursor<T> {
    type Item = T;

    fn advance(&mut self) -> Result<Option<T>> {
        if self.closed {
            return Err(anyhow!("cursor closed"));
        }
        if self.interrupted.load(Ordering::Relaxed) {
            return Err(anyhow!("interrupted"));
        }
        if self.fail_at == Some(self.pos) {
            return Err(anyhow!("decode error at position {}", self.pos));
        }
        let Some(item) = self.items.get(self.pos).cloned() else {
            return Ok(None);
        };
        self.pos += 1;
        self.advanced.fetch_add(1, Ordering::SeqCst);
        if let Some((every, pause)) = self.delay
            && self.pos.is_multiple_of(every)
        {
            std::thread::sleep(pause);
        }
        Ok(Some(item))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let flag = Arc::clone(&self.interrupted);
        Some(Box::new(move || flag.store(true, Ordering::Relaxed)))
    }
}

impl<T: Clone + Send + Sync> DataSource for MemorySource<T> {
    type Item = T;
    type Query = ();
    type Cursor = MemoryCursor<T>;

    fn open(&self, _query: &()) -> Result<MemoryCursor<T>> {
        if let Some(ref msg) = self.fail_open {
            return Err(anyhow!("{}", msg));
        }
        Ok(MemoryCursor {
            items: Arc::clone(&self.items),
            pos: 0,
            fail_at: self.fail_scan_at,
            delay: self.scan_delay,
            advanced: Arc::clone(&self.advanced),
            interrupted: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    fn count(&self, _query: &(), ctx: &Context) -> Result<i64> {
        if let Some(delay) = self.count_delay
            && let Some(reason) = ctx.signal().sleep(delay)
        {
            return Err(anyhow!("count interrupted: {}", reason));
        }
        if let Some(ref msg) = self.fail_count {
            return Err(anyhow!("{}", msg));
        }
        Ok(self.items.len() as i64)
    }
}
