//! Cancellation context shared by every pipeline thread.
//!
//! A [`Context`] carries one cancellation signal (set once, first reason wins) and an optional
//! deadline. Blocking points never poll it: each thread takes a [`Signal`] and selects over its
//! channel operation, the "done" receiver (disconnected on cancel), and a deadline timer.

use crossbeam_channel::{Receiver, Sender, after, at, bounded, never, select};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use crate::error::CancelReason;

/// Hook run once when the context is cancelled (e.g. interrupt a blocking SQLite step).
pub type CancelHook = Box<dyn FnOnce() + Send>;

struct Inner {
    reason: OnceLock<CancelReason>,
    /// Never sends; dropping it disconnects `done_rx` and wakes every select.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    deadline: Option<Instant>,
    hooks: Mutex<Vec<(u64, CancelHook)>>,
    next_hook: AtomicU64,
    /// A child's registration on its parent; dropping the child deregisters it.
    parent_hook: OnceLock<HookGuard>,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reason", &self.inner.reason.get())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    fn build(deadline: Option<Instant>) -> Self {
        let (done_tx, done_rx) = bounded::<()>(0);
        Context {
            inner: Arc::new(Inner {
                reason: OnceLock::new(),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                deadline,
                hooks: Mutex::new(Vec::new()),
                next_hook: AtomicU64::new(0),
                parent_hook: OnceLock::new(),
            }),
        }
    }

    /// Context with no deadline; only [`Context::cancel`] ends it.
    pub fn background() -> Self {
        Self::build(None)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Cancelled);
    }

    /// Set the signal with `reason`. Returns false if the context was already cancelled.
    pub(crate) fn cancel_with(&self, reason: CancelReason) -> bool {
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        drop(lock(&self.inner.done_tx).take());
        let hooks = std::mem::take(&mut *lock(&self.inner.hooks));
        for (_, hook) in hooks {
            hook();
        }
        true
    }

    /// Cancellation reason, if any. A passed deadline is promoted to `DeadlineExceeded` here.
    pub fn err(&self) -> Option<CancelReason> {
        if let Some(reason) = self.inner.reason.get() {
            return Some(*reason);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(self.expire()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Mark the deadline as reached and return the winning reason.
    fn expire(&self) -> CancelReason {
        self.cancel_with(CancelReason::DeadlineExceeded);
        self.current_reason()
    }

    fn current_reason(&self) -> CancelReason {
        self.inner
            .reason
            .get()
            .copied()
            .unwrap_or(CancelReason::Cancelled)
    }

    /// Register `hook` to run on cancellation. Runs immediately if already cancelled.
    /// The hook stays registered until the returned guard is dropped.
    #[must_use = "dropping the guard deregisters the hook"]
    pub fn on_cancel<F>(&self, hook: F) -> HookGuard
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = lock(&self.inner.hooks);
        if self.inner.reason.get().is_some() {
            drop(hooks);
            hook();
            return HookGuard::default();
        }
        let id = self.inner.next_hook.fetch_add(1, Ordering::Relaxed);
        hooks.push((id, Box::new(hook)));
        HookGuard {
            owner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Hooks registered and not yet run or deregistered.
    pub fn pending_hooks(&self) -> usize {
        lock(&self.inner.hooks).len()
    }

    /// Derive a context that is cancelled with its parent but can also be cancelled on its own
    /// without affecting the parent. Inherits the parent deadline.
    pub fn child(&self) -> Context {
        let child = Context::build(self.inner.deadline);
        let parent: Weak<Inner> = Arc::downgrade(&self.inner);
        let weak_child: Weak<Inner> = Arc::downgrade(&child.inner);
        let guard = self.on_cancel(move || {
            let reason = parent
                .upgrade()
                .and_then(|p| p.reason.get().copied())
                .unwrap_or(CancelReason::Cancelled);
            if let Some(inner) = weak_child.upgrade() {
                Context { inner }.cancel_with(reason);
            }
        });
        let _ = child.inner.parent_hook.set(guard);
        child
    }

    /// Per-thread view for blocking operations. Each thread must take its own (the deadline
    /// timer delivers once per receiver).
    pub fn signal(&self) -> Signal {
        Signal {
            ctx: self.clone(),
            done: self.inner.done_rx.clone(),
            deadline: match self.inner.deadline {
                Some(deadline) => at(deadline),
                None => never(),
            },
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Deregisters a cancel hook on drop. Inert when the hook already ran.
#[derive(Default)]
pub struct HookGuard {
    owner: Weak<Inner>,
    id: u64,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            lock(&inner.hooks).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Result of a blocking channel operation raced against cancellation.
#[derive(Debug, PartialEq, Eq)]
pub enum Wait<T> {
    Ready(T),
    /// The other side of the channel is gone.
    Closed,
    Cancelled(CancelReason),
}

pub struct Signal {
    ctx: Context,
    done: Receiver<()>,
    deadline: Receiver<Instant>,
}

impl Signal {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Receive from `rx`, or stop on cancellation/deadline.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Wait<T> {
        if let Some(reason) = self.ctx.err() {
            return Wait::Cancelled(reason);
        }
        select! {
            recv(rx) -> msg => match msg {
                Ok(v) => Wait::Ready(v),
                Err(_) => Wait::Closed,
            },
            recv(self.done) -> _ => Wait::Cancelled(self.ctx.current_reason()),
            recv(self.deadline) -> _ => Wait::Cancelled(self.ctx.expire()),
        }
    }

    /// Send `msg` on `tx`, blocking while the channel is full, or stop on cancellation/deadline.
    pub fn send<T>(&self, tx: &Sender<T>, msg: T) -> Wait<()> {
        if let Some(reason) = self.ctx.err() {
            return Wait::Cancelled(reason);
        }
        select! {
            send(tx, msg) -> res => match res {
                Ok(()) => Wait::Ready(()),
                Err(_) => Wait::Closed,
            },
            recv(self.done) -> _ => Wait::Cancelled(self.ctx.current_reason()),
            recv(self.deadline) -> _ => Wait::Cancelled(self.ctx.expire()),
        }
    }

    /// Sleep for `dur` unless cancelled first. Returns the reason when cancelled.
    pub fn sleep(&self, dur: Duration) -> Option<CancelReason> {
        if let Some(reason) = self.ctx.err() {
            return Some(reason);
        }
        let timer = after(dur);
        select! {
            recv(timer) -> _ => None,
            recv(self.done) -> _ => Some(self.ctx.current_reason()),
            recv(self.deadline) -> _ => Some(self.ctx.expire()),
        }
    }
}
