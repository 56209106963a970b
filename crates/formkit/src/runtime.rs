//! The explicit context object shared by every node of one form.
//!
//! A [`FormRuntime`] carries what would otherwise be ambient global state:
//! the [`FormConfig`], the [`Executor`] that drives asynchronous validation
//! and debounced watchers, and a weak link to the root group so validation
//! and behavior contexts can read across the tree.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};

use crate::config::FormConfig;
use crate::node::{GroupNode, WeakGroup};

/// Host event loop used for the only suspension points of the engine:
/// asynchronous validators and debounced behaviors.
pub trait Executor {
    /// Run `task` to completion in the background on the current thread.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    /// A future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    /// Whether `spawn` and `sleep` can be called on this thread right now.
    fn is_available(&self) -> bool {
        true
    }
}

/// [`Executor`] backed by tokio's current-thread primitives.
///
/// Spawning uses `tokio::task::spawn_local`, so inside a tokio runtime it
/// must be used from a `tokio::task::LocalSet`. Outside any runtime the
/// executor reports itself unavailable and [`FormRuntime`] falls back to
/// finishing only work that needs no reactor. Forms that never start
/// asynchronous work (no async validators, no debounced watchers) never
/// touch the executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(task));
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn is_available(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }
}

pub struct FormRuntime {
    config: FormConfig,
    executor: Rc<dyn Executor>,
    root: RefCell<Option<WeakGroup>>,
}

impl FormRuntime {
    #[must_use]
    pub fn new(config: FormConfig) -> Rc<Self> {
        Self::with_executor(config, Rc::new(TokioExecutor))
    }

    #[must_use]
    pub fn with_executor(config: FormConfig, executor: Rc<dyn Executor>) -> Rc<Self> {
        Rc::new(Self {
            config,
            executor,
            root: RefCell::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// The root group, if the form is still alive.
    #[must_use]
    pub fn root(&self) -> Option<GroupNode> {
        self.root.borrow().as_ref().and_then(WeakGroup::upgrade)
    }

    pub(crate) fn attach_root(&self, root: &GroupNode) {
        *self.root.borrow_mut() = Some(root.downgrade());
    }

    pub(crate) fn has_root(&self) -> bool {
        self.root().is_some()
    }

    /// Hand `task` to the executor. Without one, poll it once: work that
    /// can finish without a reactor completes, anything else is dropped and
    /// its node keeps its current status (e.g. `Pending`).
    pub(crate) fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if self.executor.is_available() {
            self.executor.spawn(task);
            return;
        }
        if task.now_or_never().is_none() {
            self.warn_no_executor("spawn", "no async runtime on this thread; task dropped");
        }
    }

    /// Without an executor the delay is skipped, so a debounced watcher
    /// fires on every change.
    pub(crate) fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        if self.executor.is_available() {
            return self.executor.sleep(duration);
        }
        self.warn_no_executor("sleep", "no async runtime on this thread; delay skipped");
        future::ready(()).boxed_local()
    }

    fn warn_no_executor(&self, op: &'static str, detail: &str) {
        if self.config.dev_warnings {
            tracing::warn!(target: "formkit::usage", op, "{detail}");
        }
    }

    /// Report a usage mistake. Advisory only: never panics, never fails the
    /// operation beyond the caller's own `None`/`false`.
    pub(crate) fn warn_usage(&self, op: &'static str, path: &dyn fmt::Display, detail: &str) {
        if self.config.dev_warnings {
            tracing::warn!(target: "formkit::usage", op, path = %path, "{detail}");
        }
    }
}

impl fmt::Debug for FormRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormRuntime")
            .field("config", &self.config)
            .field("has_root", &self.has_root())
            .finish_non_exhaustive()
    }
}
