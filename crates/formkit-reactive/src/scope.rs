#![forbid(unsafe_code)]

//! Lifecycle management for groups of subscriptions.

use std::fmt;

use super::computed::Computed;
use super::observable::{Observable, Subscription};

/// Collects subscriptions for a logical scope (a form node, a behavior
/// binding).
///
/// When the scope is cleared or dropped, all held subscriptions are
/// released, cleanly disconnecting every reactive binding associated with
/// that scope.
///
/// # Invariants
///
/// 1. Subscriptions are released in reverse registration order.
/// 2. After `clear()` or drop, no callbacks from this scope will fire.
/// 3. `clear()` leaves the scope empty but reusable.
/// 4. Binding count is always accurate.
pub struct BindingScope {
    subscriptions: Vec<Subscription>,
}

impl BindingScope {
    /// Create an empty binding scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Add a subscription to this scope. It is held alive until the scope is
    /// dropped or `clear()` is called.
    pub fn hold(&mut self, sub: Subscription) {
        self.subscriptions.push(sub);
    }

    /// Subscribe to an observable within this scope.
    pub fn subscribe<T: Clone + PartialEq + 'static>(
        &mut self,
        source: &Observable<T>,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = source.subscribe(callback);
        self.subscriptions.push(sub);
        self
    }

    /// Subscribe to a computed value within this scope.
    pub fn subscribe_computed<T: Clone + PartialEq + 'static>(
        &mut self,
        source: &Computed<T>,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = source.subscribe(callback);
        self.subscriptions.push(sub);
        self
    }

    /// Number of active subscriptions in this scope.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release all subscriptions immediately.
    pub fn clear(&mut self) {
        while let Some(sub) = self.subscriptions.pop() {
            drop(sub);
        }
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.subscriptions.len())
            .finish()
    }
}
