#![forbid(unsafe_code)]

//! Deferred subscriber delivery.
//!
//! Every write opens an implicit [`BatchScope`]. Derived values are
//! invalidated and re-evaluated inside the scope, but plain subscriber
//! callbacks are queued and run only when the outermost scope exits. A
//! callback therefore always reads a fully settled graph, even when the
//! write fans out through several cells.
//!
//! # Lanes
//!
//! Queued callbacks run in two lanes. [`Priority::High`] callbacks run
//! before any [`Priority::Normal`] one. A write made from inside a callback
//! also drains the high lane before it returns, so cells kept in sync by
//! high-priority callbacks are up to date by the time the writer reads
//! them back.
//!
//! # Invariants
//!
//! 1. No subscriber runs while a `BatchScope` is open on this thread.
//! 2. A subscriber receives the value its source holds when the callback
//!    runs, and only if that value differs from the last one it received.
//! 3. Within one lane, callbacks run in the order they were queued.
//!
//! # Failure Modes
//!
//! - **Callback panics**: the remaining queue is discarded so the next
//!   write starts clean. Subscribers that missed a delivery catch up on the
//!   next change of their source.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

type Job = Box<dyn FnOnce()>;

/// Lane a subscriber's deferred callback runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Runs ahead of every `Normal` callback. For callbacks that write
    /// other cells to keep them consistent with their source.
    High,
    /// Observers and side effects.
    #[default]
    Normal,
}

#[derive(Default)]
struct Queue {
    depth: usize,
    flushing: bool,
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
}

thread_local! {
    static QUEUE: RefCell<Queue> = RefCell::new(Queue::default());
}

/// RAII guard that defers subscriber callbacks until the outermost scope
/// on this thread exits.
///
/// Values update immediately; only notification is postponed. Use it to
/// make several writes appear as one change:
///
/// ```
/// use formkit_reactive::{BatchScope, Observable};
///
/// let status = Observable::new(0);
/// let errors = Observable::new(Vec::<String>::new());
/// let reader = status.clone();
/// let _sub = errors.subscribe(move |errors| {
///     assert_eq!(errors.is_empty(), reader.get() == 0);
/// });
///
/// let batch = BatchScope::new();
/// errors.set(vec!["required".into()]);
/// status.set(1);
/// drop(batch);
/// ```
#[must_use = "dropping a BatchScope immediately flushes"]
pub struct BatchScope {
    _not_send: PhantomData<*const ()>,
}

impl BatchScope {
    pub fn new() -> Self {
        QUEUE.with(|queue| queue.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }

    /// Whether a scope is open on this thread.
    #[must_use]
    pub fn is_active() -> bool {
        QUEUE.with(|queue| queue.borrow().depth > 0)
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let outermost = QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            queue.depth = queue.depth.saturating_sub(1);
            queue.depth == 0
        });
        if !outermost {
            return;
        }
        if std::thread::panicking() {
            discard();
            return;
        }
        flush();
    }
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (depth, queued) =
            QUEUE.with(|queue| {
                let queue = queue.borrow();
                (queue.depth, queue.high.len() + queue.normal.len())
            });
        f.debug_struct("BatchScope")
            .field("depth", &depth)
            .field("queued", &queued)
            .finish()
    }
}

/// Queue `job`, or run it now when no scope is open and nothing is
/// flushing.
pub(crate) fn defer(priority: Priority, job: Job) {
    let idle = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if queue.depth == 0 && !queue.flushing {
            return Some(job);
        }
        match priority {
            Priority::High => queue.high.push_back(job),
            Priority::Normal => queue.normal.push_back(job),
        }
        None
    });
    if let Some(job) = idle {
        job();
    }
}

fn next(include_normal: bool) -> Option<Job> {
    QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.high.pop_front() {
            Some(job) => Some(job),
            None if include_normal => queue.normal.pop_front(),
            None => None,
        }
    })
}

fn discard() {
    let dropped = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.flushing = false;
        (
            std::mem::take(&mut queue.high),
            std::mem::take(&mut queue.normal),
        )
    });
    drop(dropped);
}

/// Resets the flushing flag, and drops the queue if a callback panicked.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            discard();
        } else {
            QUEUE.with(|queue| queue.borrow_mut().flushing = false);
        }
    }
}

fn flush() {
    let nested = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        let nested = queue.flushing;
        queue.flushing = true;
        nested
    });
    if nested {
        // A write from inside a callback: settle the high lane only; the
        // outer loop picks up the rest.
        while let Some(job) = next(false) {
            job();
        }
        return;
    }

    let _guard = FlushGuard;
    #[cfg(feature = "tracing")]
    tracing::trace!(message = "batch.flush");
    while let Some(job) = next(true) {
        job();
    }
}
