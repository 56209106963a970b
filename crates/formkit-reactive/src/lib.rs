#![forbid(unsafe_code)]

//! Reactive cells for formkit.
//!
//! This crate provides the change-tracking primitives the form engine is
//! built on:
//!
//! - [`Observable`]: A shared, version-tracked value wrapper with change
//!   notification via subscriber callbacks.
//! - [`Subscription`]: RAII guard that automatically unsubscribes on drop.
//!   This is the disposer handed out by every `subscribe` call.
//! - [`Computed`]: A memoized value derived from an explicit list of
//!   [`Dependency`] sources. Dependencies can be re-bound when the set of
//!   sources changes (e.g. a collection grows).
//! - [`BindingScope`]: A bag of subscriptions released together.
//! - [`BatchScope`]: RAII guard that defers subscriber callbacks until the
//!   outermost scope exits, so several writes read as one change.
//!
//! # Architecture
//!
//! `Observable<T>` and `Computed<T>` use `Rc<RefCell<..>>` for single-threaded
//! shared ownership. Subscribers are stored as `Weak` pointers; the strong
//! side lives in the [`Subscription`], so dropping it is all that is needed
//! to disconnect. Dead entries are cleaned up lazily during notification.
//!
//! There is no ambient tracking context. A `Computed` is told its
//! dependencies when it is created (or re-bound), and each dependency keeps
//! a weak pointer to the computed's hooks.
//!
//! # Propagation
//!
//! A write runs in two phases:
//!
//! 1. **Invalidate**: every transitively derived `Computed` is marked dirty.
//! 2. **Notify**: derived values re-evaluate and emit if (and only if) their
//!    value changed. Plain subscribers are queued, not called.
//! 3. **Flush**: when the outermost write (or [`BatchScope`]) ends, queued
//!    callbacks run: [`Priority::High`] first, then the rest in registration
//!    order. Each receives its source's value at that moment.
//!
//! Because phase 1 completes before any computed re-evaluates, a computed
//! pulled during phase 2 always sees fully settled inputs. Because
//! callbacks wait for phase 3, a callback that reads several cells sees all
//! of them after the write, including cells kept in sync by high-priority
//! callbacks.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op (no version bump,
//!    no notifications).
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. `Computed::get()` never returns a stale value.
//! 6. A re-entrant write during notification supersedes the outer pass: no
//!    subscriber receives an older value after a newer one.
//! 7. No subscriber runs while a [`BatchScope`] is open on its thread.

pub mod batch;
pub mod computed;
pub mod observable;
pub mod scope;

pub use batch::{BatchScope, Priority};
pub use computed::Computed;
pub use observable::{Dependency, DerivedHooks, Observable, Subscription};
pub use scope::BindingScope;
