//! Composite nodes keyed by name.
//!
//! A group's value, touched, dirty and status are derived from its
//! children through [`Computed`] cells, so a read after any child write is
//! already consistent. Group-level validators add errors of their own on
//! top of the children's status.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use formkit_reactive::{Computed, Dependency, Observable};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};
use serde_json::Value;

use super::{
    ArrayNode, FieldNode, FieldRegistry, FieldStatus, FormNode, NodeId, access, fold_status,
};
use crate::behavior::{self, BehaviorBinding, BehaviorRule, BindingInfo};
use crate::config::FormConfig;
use crate::error::Result;
use crate::path::{Path, Segment};
use crate::runtime::FormRuntime;
use crate::schema::{GroupSchema, NodeSchema};
use crate::validation::{ValidationContext, ValidationError, Validator};

pub(crate) struct GroupInner {
    id: NodeId,
    runtime: Rc<FormRuntime>,
    path: RefCell<Path>,
    registry: FieldRegistry,
    validators: Vec<Validator>,
    rules: Vec<BehaviorRule>,
    errors: Observable<Vec<ValidationError>>,
    value: Computed<Value>,
    touched: Computed<bool>,
    dirty: Computed<bool>,
    status: Computed<FieldStatus>,
    valid: Computed<bool>,
    submitting: Observable<bool>,
    bound: Cell<bool>,
    bindings: RefCell<Vec<BehaviorBinding>>,
    properties: RefCell<AHashMap<String, Value>>,
}

/// A keyed composite of fields, groups and arrays.
#[derive(Clone)]
pub struct GroupNode {
    inner: Rc<GroupInner>,
}

/// Non-owning handle to a [`GroupNode`].
#[derive(Clone, Debug)]
pub struct WeakGroup(Weak<GroupInner>);

impl WeakGroup {
    #[must_use]
    pub fn upgrade(&self) -> Option<GroupNode> {
        self.0.upgrade().map(|inner| GroupNode { inner })
    }
}

impl GroupNode {
    /// Build a form from `schema` with a fresh runtime.
    ///
    /// # Errors
    ///
    /// [`FormError::Cycle`](crate::FormError::Cycle) when value-writing
    /// behaviors form a cycle and `config.reject_cycles` is set.
    pub fn create(schema: &GroupSchema, config: FormConfig) -> Result<Self> {
        Self::create_with_runtime(schema, FormRuntime::new(config))
    }

    /// Build a form sharing `runtime` (and its executor).
    ///
    /// The runtime tracks a single root; use one runtime per form.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn create_with_runtime(schema: &GroupSchema, runtime: Rc<FormRuntime>) -> Result<Self> {
        if runtime.config().reject_cycles {
            schema.check_cycles()?;
        }
        let root = Self::build(schema, &runtime, Path::root());
        runtime.attach_root(&root);
        root.bind_behaviors();
        tracing::debug!(
            message = "form.create",
            id = root.id().get(),
            children = root.inner.registry.len(),
            bindings = root.inner.bindings.borrow().len()
        );
        Ok(root)
    }

    pub(crate) fn build(schema: &GroupSchema, runtime: &Rc<FormRuntime>, path: Path) -> Self {
        let mut registry = FieldRegistry::new();
        for (key, child) in schema.children() {
            let child_path = path.clone().key(key.clone());
            if access::is_reserved(key) {
                runtime.warn_usage(
                    "schema",
                    &child_path,
                    "key collides with a built-in member; member access resolves to the built-in",
                );
            }
            let node = match child {
                NodeSchema::Field(field) => {
                    FormNode::Field(FieldNode::build(field, runtime, child_path))
                }
                NodeSchema::Group(group) => {
                    FormNode::Group(GroupNode::build(group, runtime, child_path))
                }
                NodeSchema::Array(array) => {
                    FormNode::Array(ArrayNode::build(array, runtime, child_path))
                }
            };
            registry.insert(key.clone(), node);
        }

        let errors = Observable::new(Vec::new());

        let value = {
            let children = registry.clone();
            let deps: Vec<&dyn Dependency> =
                registry.values().map(FormNode::value_dependency).collect();
            Computed::new(move || children.to_value(), &deps)
        };
        let touched = {
            let children = registry.clone();
            let deps: Vec<&dyn Dependency> =
                registry.values().map(FormNode::touched_dependency).collect();
            Computed::new(move || children.values().any(FormNode::touched), &deps)
        };
        let dirty = {
            let children = registry.clone();
            let deps: Vec<&dyn Dependency> =
                registry.values().map(FormNode::dirty_dependency).collect();
            Computed::new(move || children.values().any(FormNode::dirty), &deps)
        };
        let status = {
            let children = registry.clone();
            let own = errors.clone();
            let mut deps: Vec<&dyn Dependency> =
                registry.values().map(FormNode::status_dependency).collect();
            deps.push(&errors);
            Computed::new(
                move || {
                    fold_status(
                        children.values().map(FormNode::status),
                        own.with(|errors| !errors.is_empty()),
                    )
                },
                &deps,
            )
        };
        let valid = {
            let s = status.clone();
            Computed::new(
                move || matches!(s.get(), FieldStatus::Valid | FieldStatus::Disabled),
                &[&status],
            )
        };

        Self {
            inner: Rc::new(GroupInner {
                id: NodeId::next(),
                runtime: Rc::clone(runtime),
                path: RefCell::new(path),
                registry,
                validators: schema.validators().to_vec(),
                rules: schema.rules().to_vec(),
                errors,
                value,
                touched,
                dirty,
                status,
                valid,
                submitting: Observable::new(false),
                bound: Cell::new(false),
                bindings: RefCell::new(Vec::new()),
                properties: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Stable identity, independent of the group's position.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    #[must_use]
    pub fn path(&self) -> Path {
        self.inner.path.borrow().clone()
    }

    pub(crate) fn rebase_path(&self, path: Path) {
        for (key, child) in self.inner.registry.iter() {
            child.rebase_path(path.clone().key(key));
        }
        *self.inner.path.borrow_mut() = path;
    }

    #[must_use]
    pub fn runtime(&self) -> &Rc<FormRuntime> {
        &self.inner.runtime
    }

    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.inner.registry
    }

    pub(crate) fn properties(&self) -> &RefCell<AHashMap<String, Value>> {
        &self.inner.properties
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Resolve `path` against this group (or the form root for `$.` paths).
    /// Warns when nothing is found.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<FormNode> {
        let found = self.lookup(path);
        if found.is_none() {
            let shown = if path.is_root_anchored() {
                path.clone()
            } else {
                self.path().join(path)
            };
            self.inner
                .runtime
                .warn_usage("resolve", &shown, "path does not resolve to a node");
        }
        found
    }

    /// [`resolve`](Self::resolve) without the warning.
    pub(crate) fn lookup(&self, path: &Path) -> Option<FormNode> {
        let start = if path.is_root_anchored() {
            self.inner.runtime.root().unwrap_or_else(|| self.clone())
        } else {
            self.clone()
        };
        path.segments()
            .iter()
            .try_fold(FormNode::Group(start), |node, segment| match (node, segment) {
                (FormNode::Group(group), Segment::Key(key)) => {
                    group.inner.registry.get(key).cloned()
                }
                (FormNode::Array(array), Segment::Index(index)) => {
                    array.item(*index).map(FormNode::Group)
                }
                _ => None,
            })
    }

    #[must_use]
    pub fn field(&self, path: impl Into<Path>) -> Option<FieldNode> {
        self.resolve_kind(path.into(), "field", |node| node.as_field().cloned())
    }

    #[must_use]
    pub fn group(&self, path: impl Into<Path>) -> Option<GroupNode> {
        self.resolve_kind(path.into(), "group", |node| node.as_group().cloned())
    }

    #[must_use]
    pub fn array(&self, path: impl Into<Path>) -> Option<ArrayNode> {
        self.resolve_kind(path.into(), "array", |node| node.as_array().cloned())
    }

    fn resolve_kind<T>(
        &self,
        path: Path,
        expected: &'static str,
        pick: impl FnOnce(&FormNode) -> Option<T>,
    ) -> Option<T> {
        let node = self.resolve(&path)?;
        let picked = pick(&node);
        if picked.is_none() {
            self.inner.runtime.warn_usage(
                "resolve",
                &node.path(),
                &format!("node is a {:?}, not a {expected}", node.kind()),
            );
        }
        picked
    }

    // ---------------------------------------------------------------------
    // Value
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.get()
    }

    #[must_use]
    pub fn value_cell(&self) -> &Computed<Value> {
        &self.inner.value
    }

    /// Write every child. Keys absent from `value` return to their initial
    /// value; keys naming no child are ignored with a warning.
    ///
    /// The write is programmatic: nothing becomes dirty.
    pub fn set_value(&self, value: Value) {
        let Value::Object(mut incoming) = value else {
            self.inner
                .runtime
                .warn_usage("set_value", &self.path(), "group values must be objects");
            return;
        };
        for (key, child) in self.inner.registry.iter() {
            match incoming.remove(key) {
                Some(value) => child.set_value(value),
                None => child.restore_initial_value(),
            }
        }
        self.warn_unknown_keys("set_value", incoming.keys());
    }

    /// Write only the keys present in `value`.
    pub fn patch_value(&self, value: Value) {
        let Value::Object(incoming) = value else {
            self.inner
                .runtime
                .warn_usage("patch_value", &self.path(), "group values must be objects");
            return;
        };
        let mut unknown = Vec::new();
        for (key, value) in incoming {
            match self.inner.registry.get(&key) {
                Some(child) => child.patch_value(value),
                None => unknown.push(key),
            }
        }
        self.warn_unknown_keys("patch_value", unknown.iter());
    }

    fn warn_unknown_keys<'a>(&self, op: &'static str, keys: impl Iterator<Item = &'a String>) {
        for key in keys {
            self.inner
                .runtime
                .warn_usage(op, &self.path().key(key.clone()), "no child with this key");
        }
    }

    /// Reset every descendant. `Some(value)` supplies new initial values
    /// per key; missing keys reset to their current initial value.
    pub fn reset(&self, value: Option<Value>) {
        for (key, child) in self.inner.registry.iter() {
            child.reset(value.as_ref().and_then(|v| v.get(key)).cloned());
        }
        self.inner.errors.set(Vec::new());
        tracing::debug!(message = "group.reset", path = %self.path());
    }

    pub fn reset_to_initial(&self) {
        for child in self.inner.registry.values() {
            child.reset_to_initial();
        }
        self.inner.errors.set(Vec::new());
    }

    // ---------------------------------------------------------------------
    // Flags and status
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn touched(&self) -> bool {
        self.inner.touched.get()
    }

    #[must_use]
    pub fn touched_cell(&self) -> &Computed<bool> {
        &self.inner.touched
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    #[must_use]
    pub fn dirty_cell(&self) -> &Computed<bool> {
        &self.inner.dirty
    }

    #[must_use]
    pub fn status(&self) -> FieldStatus {
        self.inner.status.get()
    }

    #[must_use]
    pub fn status_cell(&self) -> &Computed<FieldStatus> {
        &self.inner.status
    }

    /// No enabled descendant is invalid or pending and no group-level
    /// validator failed.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.inner.valid.get()
    }

    #[must_use]
    pub fn valid_cell(&self) -> &Computed<bool> {
        &self.inner.valid
    }

    #[must_use]
    pub fn invalid(&self) -> bool {
        self.status() == FieldStatus::Invalid
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.status() == FieldStatus::Pending
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.status() == FieldStatus::Disabled
    }

    #[must_use]
    pub fn submitting(&self) -> bool {
        self.inner.submitting.get()
    }

    #[must_use]
    pub fn submitting_cell(&self) -> &Observable<bool> {
        &self.inner.submitting
    }

    /// Errors from group-level validators only.
    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        self.inner.errors.get()
    }

    #[must_use]
    pub fn errors_cell(&self) -> &Observable<Vec<ValidationError>> {
        &self.inner.errors
    }

    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        self.inner.errors.set(errors);
    }

    pub fn mark_as_touched(&self) {
        for child in self.inner.registry.values() {
            child.mark_as_touched();
        }
    }

    pub(crate) fn touch_without_validation(&self) {
        for child in self.inner.registry.values() {
            child.touch_without_validation();
        }
    }

    pub fn mark_as_untouched(&self) {
        for child in self.inner.registry.values() {
            child.mark_as_untouched();
        }
    }

    pub fn mark_as_dirty(&self) {
        for child in self.inner.registry.values() {
            child.mark_as_dirty();
        }
    }

    pub fn mark_as_pristine(&self) {
        for child in self.inner.registry.values() {
            child.mark_as_pristine();
        }
    }

    pub fn enable(&self) {
        for child in self.inner.registry.values() {
            child.enable();
        }
    }

    pub fn disable(&self) {
        for child in self.inner.registry.values() {
            child.disable();
        }
        self.inner.errors.set(Vec::new());
    }

    // ---------------------------------------------------------------------
    // Validation and submit
    // ---------------------------------------------------------------------

    /// Validate every descendant plus this group's own validators. Resolves
    /// to `true` when all of them pass.
    pub fn validate(&self) -> LocalBoxFuture<'static, bool> {
        let runs: Vec<_> = self.inner.registry.values().map(FormNode::validate).collect();
        let own = self.run_own_validators();
        async move { join_all(runs).await.into_iter().fold(own, |all, ok| all && ok) }
            .boxed_local()
    }

    pub fn validate_in_background(&self) {
        let mut run = self.validate();
        if (&mut run).now_or_never().is_none() {
            self.inner.runtime.spawn(run.map(drop).boxed_local());
        }
    }

    fn run_own_validators(&self) -> bool {
        if self.inner.validators.is_empty() {
            return true;
        }
        if self.is_disabled() {
            self.inner.errors.set(Vec::new());
            return true;
        }
        let value = self.value();
        let ctx = ValidationContext::new(Rc::clone(&self.inner.runtime), self.path());
        let errors: Vec<ValidationError> = self
            .inner
            .validators
            .iter()
            .filter_map(|validator| validator(&value, &ctx))
            .collect();
        let valid = errors.is_empty();
        self.inner.errors.set(errors);
        valid
    }

    /// Touch everything, validate, and hand the value to `handler` when
    /// valid.
    ///
    /// Returns `Ok(None)` without calling `handler` when validation fails.
    /// `submitting` is `true` while the handler runs and reset afterwards,
    /// including when the handler fails.
    ///
    /// # Errors
    ///
    /// Whatever `handler` returns.
    pub async fn submit<F, Fut, T, E>(&self, handler: F) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.touch_without_validation();
        if !self.validate().await {
            tracing::debug!(message = "form.submit.invalid", path = %self.path());
            return Ok(None);
        }
        let _guard = SubmittingGuard::engage(&self.inner.submitting);
        tracing::debug!(message = "form.submit", path = %self.path());
        handler(self.value()).await.map(Some)
    }

    // ---------------------------------------------------------------------
    // Behaviors and lifecycle
    // ---------------------------------------------------------------------

    pub(crate) fn bind_behaviors(&self) {
        if self.inner.bound.replace(true) {
            return;
        }
        for child in self.inner.registry.values() {
            child.bind_behaviors();
        }
        let bound: Vec<BehaviorBinding> = self
            .inner
            .rules
            .iter()
            .filter_map(|rule| behavior::bind(self, rule))
            .collect();
        self.inner.bindings.borrow_mut().extend(bound);
    }

    /// Live behavior bindings attached to this group.
    #[must_use]
    pub fn bindings(&self) -> Vec<BindingInfo> {
        self.inner
            .bindings
            .borrow()
            .iter()
            .map(|binding| binding.info().clone())
            .collect()
    }

    /// Release every behavior binding of this group and its descendants.
    pub fn dispose(&self) {
        let bindings = std::mem::take(&mut *self.inner.bindings.borrow_mut());
        let released = bindings.len();
        drop(bindings);
        for child in self.inner.registry.values() {
            child.dispose();
        }
        tracing::debug!(message = "group.dispose", path = %self.path(), released);
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakGroup {
        WeakGroup(Rc::downgrade(&self.inner))
    }
}

/// Holds `submitting` at `true` for its lifetime.
struct SubmittingGuard(Observable<bool>);

impl SubmittingGuard {
    fn engage(cell: &Observable<bool>) -> Self {
        cell.set(true);
        Self(cell.clone())
    }
}

impl Drop for SubmittingGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl PartialEq for GroupNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("id", &self.inner.id)
            .field("path", &self.path().to_string())
            .field("keys", &self.inner.registry.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
