#![forbid(unsafe_code)]

//! Shared, version-tracked values with synchronous change notification.
//!
//! Subscriber callbacks are delivered through the [`batch`](crate::batch)
//! queue: a write returns only after every callback it caused has run,
//! unless it was made inside an open [`BatchScope`](crate::BatchScope).
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the panic propagates out of `set()`. The value
//!   has already been stored and the version bumped.
//! - **Subscriber writes back to its own source**: the nested write is
//!   queued behind the current callback; subscribers only ever receive the
//!   latest value. Two high-priority callbacks writing each other's source
//!   recurse until the stack overflows, so callers must not wire
//!   bidirectional writes without a guard.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::batch::{self, BatchScope, Priority};

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a callback registration.
///
/// The subscription owns the only strong reference to its callback; the
/// source keeps a `Weak`. Dropping the subscription (or calling
/// [`dispose`](Self::dispose)) disconnects it.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    keepalive: Vec<Box<dyn Any>>,
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// A subscription that holds nothing.
    pub fn empty() -> Self {
        Self {
            keepalive: Vec::new(),
            teardown: None,
        }
    }

    /// A subscription that runs `teardown` when disposed.
    pub fn on_dispose(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            keepalive: Vec::new(),
            teardown: Some(Box::new(teardown)),
        }
    }

    fn holding(value: impl Any) -> Self {
        Self {
            keepalive: vec![Box::new(value)],
            teardown: None,
        }
    }

    /// Keep `value` alive for as long as this subscription is.
    ///
    /// Used to tie a private [`Computed`](crate::Computed) to the
    /// subscription observing it.
    pub fn retain(mut self, value: impl Any) -> Self {
        self.keepalive.push(Box::new(value));
        self
    }

    /// Merge another subscription into this one.
    pub fn join(mut self, mut other: Self) -> Self {
        self.keepalive.append(&mut other.keepalive);
        match (self.teardown.take(), other.teardown.take()) {
            (Some(a), Some(b)) => {
                self.teardown = Some(Box::new(move || {
                    a();
                    b();
                }));
            }
            (a, b) => self.teardown = a.or(b),
        }
        self
    }

    /// Disconnect now. Equivalent to dropping.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("held", &self.keepalive.len())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Derived hooks / Dependency
// ---------------------------------------------------------------------------

/// The pair of callbacks a derived value registers with each source.
///
/// `invalidate` runs in the first propagation phase and must only mark
/// state dirty. `notify` runs in the second phase and may re-evaluate.
pub struct DerivedHooks {
    invalidate: Box<dyn Fn()>,
    notify: Box<dyn Fn()>,
}

impl DerivedHooks {
    pub(crate) fn new(invalidate: impl Fn() + 'static, notify: impl Fn() + 'static) -> Self {
        Self {
            invalidate: Box::new(invalidate),
            notify: Box::new(notify),
        }
    }

    pub(crate) fn invalidate(&self) {
        (self.invalidate)();
    }

    pub(crate) fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for DerivedHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedHooks").finish_non_exhaustive()
    }
}

/// A source a [`Computed`](crate::Computed) can depend on.
///
/// Implementors keep a weak reference to `hooks` and drive both
/// propagation phases on every change.
pub trait Dependency {
    /// Register derived hooks with this source.
    fn attach(&self, hooks: &Rc<DerivedHooks>);
}

pub(crate) struct Listener<T> {
    callback: Box<dyn Fn(&T)>,
    priority: Priority,
    /// Last value handed to `callback`.
    last: RefCell<Option<T>>,
}

/// Subscribers plus derived hooks of one source.
pub(crate) struct ListenerSet<T> {
    derived: Vec<Weak<DerivedHooks>>,
    subscribers: Vec<Weak<Listener<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            derived: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn subscribe(
        &mut self,
        priority: Priority,
        current: T,
        callback: impl Fn(&T) + 'static,
    ) -> Subscription {
        let listener: Rc<Listener<T>> = Rc::new(Listener {
            callback: Box::new(callback),
            priority,
            last: RefCell::new(Some(current)),
        });
        self.subscribers.push(Rc::downgrade(&listener));
        Subscription::holding(listener)
    }

    pub(crate) fn attach(&mut self, hooks: &Rc<DerivedHooks>) {
        self.derived.push(Rc::downgrade(hooks));
    }

    /// Drop dead entries and return strong handles to the live ones.
    pub(crate) fn snapshot(&mut self) -> (Vec<Rc<DerivedHooks>>, Vec<Rc<Listener<T>>>) {
        self.derived.retain(|w| w.strong_count() > 0);
        self.subscribers.retain(|w| w.strong_count() > 0);
        (
            self.derived.iter().filter_map(Weak::upgrade).collect(),
            self.subscribers.iter().filter_map(Weak::upgrade).collect(),
        )
    }

    pub(crate) fn live_derived(&mut self) -> Vec<Rc<DerivedHooks>> {
        self.derived.retain(|w| w.strong_count() > 0);
        self.derived.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn derived_count(&self) -> usize {
        self.derived.iter().filter(|w| w.strong_count() > 0).count()
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.subscriber_count() > 0 || self.derived_count() > 0
    }
}

impl<T: Clone + PartialEq + 'static> Listener<T> {
    /// Queue a delivery of whatever `read` returns once the batch flushes.
    /// A listener dropped in the meantime is skipped.
    pub(crate) fn schedule(self: &Rc<Self>, read: impl Fn() -> Option<T> + 'static) {
        let target = Rc::downgrade(self);
        batch::defer(
            self.priority,
            Box::new(move || {
                if let (Some(listener), Some(value)) = (target.upgrade(), read()) {
                    listener.deliver(value);
                }
            }),
        );
    }

    fn deliver(&self, value: T) {
        if self.last.borrow().as_ref() == Some(&value) {
            return;
        }
        *self.last.borrow_mut() = Some(value.clone());
        (self.callback)(&value);
    }
}

// ---------------------------------------------------------------------------
// Observable
// ---------------------------------------------------------------------------

struct ObservableInner<T> {
    value: T,
    version: u64,
    listeners: ListenerSet<T>,
}

/// A shared, version-tracked mutable value.
///
/// Cloning an `Observable` creates a new handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                listeners: ListenerSet::new(),
            })),
        }
    }

    /// Current value (cloned).
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value.
    ///
    /// The closure must not write to this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Store `value` and notify, unless it equals the current value.
    pub fn set(&self, value: T) {
        let _batch = BatchScope::new();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Mutate a copy of the value in place, then [`set`](Self::set) it.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Register a callback invoked after every change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_with(Priority::Normal, callback)
    }

    /// Register a callback in the given delivery lane.
    pub fn subscribe_with(
        &self,
        priority: Priority,
        callback: impl Fn(&T) + 'static,
    ) -> Subscription {
        let current = self.get();
        self.inner
            .borrow_mut()
            .listeners
            .subscribe(priority, current, callback)
    }

    /// Number of mutations that changed the value.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live plain subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().listeners.subscriber_count()
    }

    /// Number of live derived values depending on this observable.
    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.inner.borrow().listeners.derived_count()
    }

    /// Whether two handles point at the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self) {
        let (version, derived, subscribers) = {
            let mut inner = self.inner.borrow_mut();
            let (derived, subscribers) = inner.listeners.snapshot();
            (inner.version, derived, subscribers)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            message = "observable.notify",
            version,
            derived = derived.len(),
            subscribers = subscribers.len()
        );

        for hooks in &derived {
            hooks.invalidate();
        }
        for hooks in &derived {
            if self.version() != version {
                break;
            }
            hooks.notify();
        }
        for listener in &subscribers {
            let source = Rc::downgrade(&self.inner);
            listener.schedule(move || source.upgrade().map(|inner| inner.borrow().value.clone()));
        }
    }
}

impl<T: Clone + PartialEq + 'static> Dependency for Observable<T> {
    fn attach(&self, hooks: &Rc<DerivedHooks>) {
        self.inner.borrow_mut().listeners.attach(hooks);
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
