#![forbid(unsafe_code)]

//! Memoized values derived from explicit [`Dependency`] sources.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. When any dependency changes, the cached value
//! is invalidated (marked dirty) during the first propagation phase. During
//! the second phase a computed that is itself observed re-evaluates, and
//! emits to its own subscribers and dependents only if the value changed.
//! An unobserved computed stays lazy until the next [`get()`](Computed::get).
//!
//! # Invariants
//!
//! 1. `get()` always returns a value consistent with the current state of all
//!    dependencies (no stale reads after a dependency mutation completes).
//! 2. The compute function is called at most once per dependency change cycle
//!    (memoization).
//! 3. Subscribers observe each distinct value at most once, and never a value
//!    computed from a partially updated set of dependencies. Delivery is
//!    deferred to the end of the outermost write (see [`crate::batch`]).
//! 4. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the dirty flag stays set so the next
//!   `get()` will retry.
//! - **Dependency dropped**: the computed retains its last cached result and
//!   never becomes dirty again from that source.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::batch::{BatchScope, Priority};
use super::observable::{Dependency, DerivedHooks, ListenerSet, Observable, Subscription};

/// Shared interior for [`Computed<T>`].
struct ComputedInner<T> {
    /// The computation function.
    compute: Rc<dyn Fn() -> T>,
    /// Cached result (None only before first computation).
    cached: Option<T>,
    /// Whether the cached value is stale.
    dirty: bool,
    /// Monotonically increasing version, bumped on each recomputation.
    version: u64,
    /// Last value delivered to subscribers and dependents.
    emitted: Option<T>,
    /// Bumped on every emission; lets an outer pass detect a nested one.
    emit_seq: u64,
    listeners: ListenerSet<T>,
    /// Hooks registered with the current dependencies. Replacing them
    /// detaches from the previous dependency set.
    hooks: Option<Rc<DerivedHooks>>,
}

/// A memoized value derived from one or more dependencies.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
pub struct Computed<T> {
    inner: Rc<RefCell<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Computed")
            .field("cached", &inner.cached)
            .field("dirty", &inner.dirty)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed value from a compute function and the sources it
    /// reads.
    ///
    /// `compute` must only read; every source it reads should appear in
    /// `deps`, otherwise changes to the missing source go unnoticed.
    pub fn new(compute: impl Fn() -> T + 'static, deps: &[&dyn Dependency]) -> Self {
        let this = Self {
            inner: Rc::new(RefCell::new(ComputedInner {
                compute: Rc::new(compute),
                cached: None,
                dirty: true,
                version: 0,
                emitted: None,
                emit_seq: 0,
                listeners: ListenerSet::new(),
                hooks: None,
            })),
        };
        this.attach_hooks(deps);
        this
    }

    /// Create a computed value derived from a single observable.
    pub fn from_observable<S: Clone + PartialEq + 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let src = source.clone();
        Self::new(move || src.with(|v| map(v)), &[source])
    }

    /// Create a computed value derived from two observables.
    pub fn from2<S1, S2>(
        s1: &Observable<S1>,
        s2: &Observable<S2>,
        map: impl Fn(&S1, &S2) -> T + 'static,
    ) -> Self
    where
        S1: Clone + PartialEq + 'static,
        S2: Clone + PartialEq + 'static,
    {
        let a = s1.clone();
        let b = s2.clone();
        Self::new(move || a.with(|v1| b.with(|v2| map(v1, v2))), &[s1, s2])
    }

    /// Replace the dependency set.
    ///
    /// Subscriptions to the previous dependencies are released. The value is
    /// invalidated and, if observed, re-emitted when it changed.
    pub fn rebind(&self, deps: &[&dyn Dependency]) {
        let _batch = BatchScope::new();
        self.attach_hooks(deps);
        Self::mark_dirty(&self.inner);
        self.emit();
    }

    fn attach_hooks(&self, deps: &[&dyn Dependency]) {
        let for_invalidate = Rc::downgrade(&self.inner);
        let for_notify = Rc::downgrade(&self.inner);
        let hooks = Rc::new(DerivedHooks::new(
            move || {
                if let Some(inner) = for_invalidate.upgrade() {
                    Self::mark_dirty(&inner);
                }
            },
            move || Self::emit_weak(&for_notify),
        ));
        for dep in deps {
            dep.attach(&hooks);
        }
        self.inner.borrow_mut().hooks = Some(hooks);
    }

    fn mark_dirty(inner: &Rc<RefCell<ComputedInner<T>>>) {
        let derived = {
            let mut inner = inner.borrow_mut();
            inner.dirty = true;
            inner.listeners.live_derived()
        };
        for hooks in &derived {
            hooks.invalidate();
        }
    }

    fn emit_weak(weak: &Weak<RefCell<ComputedInner<T>>>) {
        if let Some(inner) = weak.upgrade() {
            Self { inner }.emit();
        }
    }

    fn emit(&self) {
        if !self.inner.borrow().listeners.is_observed() {
            return;
        }
        let value = self.get();
        let (seq, derived, subscribers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.emitted.as_ref() == Some(&value) {
                return;
            }
            inner.emitted = Some(value);
            inner.emit_seq += 1;
            let (derived, subscribers) = inner.listeners.snapshot();
            (inner.emit_seq, derived, subscribers)
        };

        for hooks in &derived {
            if self.inner.borrow().emit_seq != seq {
                break;
            }
            hooks.notify();
        }
        for listener in &subscribers {
            let source = Rc::downgrade(&self.inner);
            listener.schedule(move || source.upgrade().map(|inner| Self { inner }.get()));
        }
    }

    /// Record the current value as already delivered, so the first change
    /// notification compares against it. A computed that went unobserved
    /// may hold a stale `emitted`, so it is refreshed too.
    fn prime(&self) {
        let observed = self.inner.borrow().listeners.is_observed();
        if !observed {
            let value = self.get();
            self.inner.borrow_mut().emitted = Some(value);
        }
    }

    /// Get the current value, recomputing if any dependency has changed.
    #[must_use]
    pub fn get(&self) -> T {
        let compute = {
            let inner = self.inner.borrow();
            if !inner.dirty {
                if let Some(value) = &inner.cached {
                    return value.clone();
                }
            }
            Rc::clone(&inner.compute)
        };
        let value = compute();
        let mut inner = self.inner.borrow_mut();
        inner.cached = Some(value.clone());
        inner.dirty = false;
        inner.version += 1;
        value
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get())
    }

    /// Register a callback invoked whenever the computed value changes.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_with(Priority::Normal, callback)
    }

    /// Register a callback in the given delivery lane.
    pub fn subscribe_with(
        &self,
        priority: Priority,
        callback: impl Fn(&T) + 'static,
    ) -> Subscription {
        self.prime();
        let current = self.get();
        self.inner
            .borrow_mut()
            .listeners
            .subscribe(priority, current, callback)
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty
    }

    /// Force invalidation of the cached value. The next `get()` will
    /// recompute.
    pub fn invalidate(&self) {
        Self::mark_dirty(&self.inner);
    }

    /// Current version number. Increments by 1 on each recomputation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live plain subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().listeners.subscriber_count()
    }
}

impl<T: Clone + PartialEq + 'static> Dependency for Computed<T> {
    fn attach(&self, hooks: &Rc<DerivedHooks>) {
        self.prime();
        self.inner.borrow_mut().listeners.attach(hooks);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
