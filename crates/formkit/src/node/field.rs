//! Leaf nodes holding one editable value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use formkit_reactive::{BatchScope, BindingScope, Computed, Observable, Subscription};
use futures::FutureExt;
use futures::future::{self, LocalBoxFuture, join_all};
use serde_json::Value;

use super::{FieldStatus, FormNode, UpdateOn};
use crate::path::Path;
use crate::runtime::FormRuntime;
use crate::schema::FieldSchema;
use crate::validation::{AsyncValidator, ValidationContext, ValidationError, Validator};

/// How a write through [`FieldNode::set_value_with`] is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetValueOptions {
    /// Mark the field dirty when the new value differs from the initial one.
    pub mark_dirty: bool,
    /// Re-validate when the field updates on change.
    pub validate: bool,
}

impl SetValueOptions {
    /// A user edit: marks dirty and validates.
    #[must_use]
    pub const fn user() -> Self {
        Self {
            mark_dirty: true,
            validate: true,
        }
    }

    /// A write by code (behaviors, `set_value` on a group): validates, never
    /// marks dirty.
    #[must_use]
    pub const fn programmatic() -> Self {
        Self {
            mark_dirty: false,
            validate: true,
        }
    }

    /// Store the value and nothing else.
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            mark_dirty: false,
            validate: false,
        }
    }
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self::user()
    }
}

pub(crate) struct FieldInner {
    runtime: Rc<FormRuntime>,
    path: RefCell<Path>,
    value: Observable<Value>,
    initial: RefCell<Value>,
    /// Construction-time value; target of `reset_to_initial`.
    original: Value,
    touched: Observable<bool>,
    dirty: Observable<bool>,
    status: Observable<FieldStatus>,
    errors: Observable<Vec<ValidationError>>,
    component_props: Observable<Value>,
    show_error: Computed<bool>,
    update_on: UpdateOn,
    validators: Vec<Validator>,
    async_validators: Vec<AsyncValidator>,
    /// Bumped by every validation run, `disable` and `reset`; an async
    /// result is applied only when its run is still the latest.
    run_seq: Cell<u64>,
    scope: RefCell<BindingScope>,
}

/// A leaf node: one value plus its validation and interaction state.
#[derive(Clone)]
pub struct FieldNode {
    inner: Rc<FieldInner>,
}

/// Non-owning handle to a [`FieldNode`].
#[derive(Clone, Debug)]
pub struct WeakField(Weak<FieldInner>);

impl WeakField {
    #[must_use]
    pub fn upgrade(&self) -> Option<FieldNode> {
        self.0.upgrade().map(|inner| FieldNode { inner })
    }
}

impl FieldNode {
    /// A standalone field outside any form tree.
    #[must_use]
    pub fn new(schema: &FieldSchema, runtime: &Rc<FormRuntime>) -> Self {
        Self::build(schema, runtime, Path::root())
    }

    pub(crate) fn build(schema: &FieldSchema, runtime: &Rc<FormRuntime>, path: Path) -> Self {
        let touched = Observable::new(false);
        let status = Observable::new(if schema.disabled {
            FieldStatus::Disabled
        } else {
            FieldStatus::Valid
        });
        let show_error = Computed::from2(&touched, &status, |touched, status| {
            *touched && *status == FieldStatus::Invalid
        });
        Self {
            inner: Rc::new(FieldInner {
                runtime: Rc::clone(runtime),
                path: RefCell::new(path),
                value: Observable::new(schema.value.clone()),
                initial: RefCell::new(schema.value.clone()),
                original: schema.value.clone(),
                touched,
                dirty: Observable::new(false),
                status,
                errors: Observable::new(Vec::new()),
                component_props: Observable::new(schema.component_props.clone()),
                show_error,
                update_on: schema
                    .update_on
                    .unwrap_or(runtime.config().default_update_on),
                validators: schema.validators.clone(),
                async_validators: schema.async_validators.clone(),
                run_seq: Cell::new(0),
                scope: RefCell::new(BindingScope::new()),
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> Path {
        self.inner.path.borrow().clone()
    }

    pub(crate) fn rebase_path(&self, path: Path) {
        *self.inner.path.borrow_mut() = path;
    }

    #[must_use]
    pub fn runtime(&self) -> &Rc<FormRuntime> {
        &self.inner.runtime
    }

    #[must_use]
    pub fn update_on(&self) -> UpdateOn {
        self.inner.update_on
    }

    // ---------------------------------------------------------------------
    // Value
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.get()
    }

    #[must_use]
    pub fn value_cell(&self) -> &Observable<Value> {
        &self.inner.value
    }

    /// The value `reset(None)` returns to.
    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.inner.initial.borrow().clone()
    }

    /// User edit: marks dirty and validates when updating on change.
    pub fn set_value(&self, value: Value) {
        self.set_value_with(value, SetValueOptions::user());
    }

    pub fn set_value_with(&self, value: Value, options: SetValueOptions) {
        let changed = self.inner.value.with(|current| *current != value);
        if !changed {
            return;
        }
        tracing::debug!(message = "field.set_value", path = %self.path(), dirty = options.mark_dirty);
        self.inner.value.set(value);
        if options.mark_dirty && !self.inner.dirty.get() {
            let differs = self
                .inner
                .value
                .with(|current| *current != *self.inner.initial.borrow());
            if differs {
                self.inner.dirty.set(true);
            }
        }
        if options.validate && self.inner.update_on == UpdateOn::Change {
            self.validate_in_background();
        }
    }

    /// Subscribe to value changes.
    pub fn watch(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.value.subscribe(callback)
    }

    /// Keep this field equal to `f` over the values of `sources`.
    ///
    /// The derivation lives until the field is disposed.
    pub fn compute_from(&self, sources: &[FormNode], f: impl Fn(&[Value]) -> Value + 'static) {
        let sub = crate::behavior::derive_into(&FormNode::Field(self.clone()), sources, Rc::new(f));
        self.inner.scope.borrow_mut().hold(sub);
    }

    // ---------------------------------------------------------------------
    // Flags
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn touched(&self) -> bool {
        self.inner.touched.get()
    }

    #[must_use]
    pub fn touched_cell(&self) -> &Observable<bool> {
        &self.inner.touched
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    #[must_use]
    pub fn dirty_cell(&self) -> &Observable<bool> {
        &self.inner.dirty
    }

    pub fn mark_as_touched(&self) {
        self.inner.touched.set(true);
        if self.inner.update_on == UpdateOn::Blur {
            self.validate_in_background();
        }
    }

    pub(crate) fn touch_without_validation(&self) {
        self.inner.touched.set(true);
    }

    pub fn mark_as_untouched(&self) {
        self.inner.touched.set(false);
    }

    pub fn mark_as_dirty(&self) {
        self.inner.dirty.set(true);
    }

    pub fn mark_as_pristine(&self) {
        self.inner.dirty.set(false);
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn status(&self) -> FieldStatus {
        self.inner.status.get()
    }

    #[must_use]
    pub fn status_cell(&self) -> &Observable<FieldStatus> {
        &self.inner.status
    }

    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        self.inner.errors.get()
    }

    #[must_use]
    pub fn errors_cell(&self) -> &Observable<Vec<ValidationError>> {
        &self.inner.errors
    }

    /// `Valid` and `Disabled` both count as valid: a disabled field never
    /// blocks its form.
    #[must_use]
    pub fn valid(&self) -> bool {
        matches!(self.status(), FieldStatus::Valid | FieldStatus::Disabled)
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

    /// Touched and invalid.
    #[must_use]
    pub fn should_show_error(&self) -> bool {
        self.inner.show_error.get()
    }

    #[must_use]
    pub fn should_show_error_cell(&self) -> &Computed<bool> {
        &self.inner.show_error
    }

    /// Replace the errors from outside (e.g. a server response). Ignored on
    /// a disabled field.
    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        if self.is_disabled() {
            self.inner
                .runtime
                .warn_usage("set_errors", &self.path(), "field is disabled; errors ignored");
            return;
        }
        self.bump_seq();
        self.apply_errors(errors);
    }

    pub fn clear_errors(&self) {
        self.set_errors(Vec::new());
    }

    pub fn disable(&self) {
        if self.is_disabled() {
            return;
        }
        self.bump_seq();
        let _batch = BatchScope::new();
        self.inner.errors.set(Vec::new());
        self.inner.status.set(FieldStatus::Disabled);
    }

    /// Leave the disabled state as `Valid` with no errors. Does not
    /// re-validate.
    pub fn enable(&self) {
        if self.is_disabled() {
            self.inner.status.set(FieldStatus::Valid);
        }
    }

    // ---------------------------------------------------------------------
    // Component props
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn component_props(&self) -> Value {
        self.inner.component_props.get()
    }

    #[must_use]
    pub fn component_props_cell(&self) -> &Observable<Value> {
        &self.inner.component_props
    }

    pub fn set_component_props(&self, props: Value) {
        self.inner.component_props.set(props);
    }

    // ---------------------------------------------------------------------
    // Reset
    // ---------------------------------------------------------------------

    /// Return to the initial value and clear touched, dirty and errors.
    ///
    /// `Some(value)` first makes `value` the new initial value. A disabled
    /// field stays disabled.
    pub fn reset(&self, value: Option<Value>) {
        if let Some(value) = value {
            *self.inner.initial.borrow_mut() = value;
        }
        let initial = self.initial_value();
        self.bump_seq();
        let _batch = BatchScope::new();
        self.inner.value.set(initial);
        self.inner.touched.set(false);
        self.inner.dirty.set(false);
        self.inner.errors.set(Vec::new());
        if !self.is_disabled() {
            self.inner.status.set(FieldStatus::Valid);
        }
    }

    /// Reset to the construction-time value, discarding any initial value
    /// installed by `reset(Some(..))`.
    pub fn reset_to_initial(&self) {
        self.reset(Some(self.inner.original.clone()));
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    fn bump_seq(&self) -> u64 {
        let seq = self.inner.run_seq.get() + 1;
        self.inner.run_seq.set(seq);
        seq
    }

    fn context(&self) -> ValidationContext {
        ValidationContext::new(Rc::clone(&self.inner.runtime), self.path())
    }

    fn apply_errors(&self, errors: Vec<ValidationError>) {
        if self.is_disabled() {
            return;
        }
        let status = if errors.is_empty() {
            FieldStatus::Valid
        } else {
            FieldStatus::Invalid
        };
        // Subscribers of either cell must see the pair agree.
        let _batch = BatchScope::new();
        self.inner.errors.set(errors);
        self.inner.status.set(status);
    }

    /// Run all validators.
    ///
    /// Synchronous validators run before this returns and all of them
    /// report. Only when none failed do the async validators start; the
    /// field is `Pending` until they settle. A result from a run superseded
    /// by a later `validate`, `disable` or `reset` is dropped.
    pub fn validate(&self) -> LocalBoxFuture<'static, bool> {
        let seq = self.bump_seq();
        if self.is_disabled() {
            return future::ready(true).boxed_local();
        }
        let value = self.value();
        let ctx = self.context();
        let errors: Vec<ValidationError> = self
            .inner
            .validators
            .iter()
            .filter_map(|validator| validator(&value, &ctx))
            .collect();

        if !errors.is_empty() || self.inner.async_validators.is_empty() {
            let valid = errors.is_empty();
            tracing::debug!(message = "field.validate", path = %ctx.path(), seq, errors = errors.len());
            self.apply_errors(errors);
            return future::ready(valid).boxed_local();
        }

        {
            let _batch = BatchScope::new();
            self.inner.errors.set(Vec::new());
            self.inner.status.set(FieldStatus::Pending);
        }
        let runs: Vec<_> = self
            .inner
            .async_validators
            .iter()
            .map(|validator| validator(value.clone(), ctx.clone()))
            .collect();
        tracing::debug!(message = "field.validate.pending", path = %ctx.path(), seq, validators = runs.len());

        let weak = Rc::downgrade(&self.inner);
        async move {
            let verdicts = join_all(runs).await;
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let field = FieldNode { inner };
            let current = field.inner.run_seq.get();
            if current != seq {
                tracing::debug!(message = "field.validate.stale", path = %field.path(), seq, current);
                return field.valid();
            }
            let errors: Vec<ValidationError> = verdicts.into_iter().flatten().collect();
            let valid = errors.is_empty();
            field.apply_errors(errors);
            valid
        }
        .boxed_local()
    }

    /// Validate now; any asynchronous remainder runs on the executor.
    pub fn validate_in_background(&self) {
        let mut run = self.validate();
        if (&mut run).now_or_never().is_none() {
            self.inner.runtime.spawn(run.map(drop).boxed_local());
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Drop derivations attached through [`compute_from`](Self::compute_from)
    /// and discard any in-flight validation.
    pub fn dispose(&self) {
        self.bump_seq();
        let held = std::mem::take(&mut *self.inner.scope.borrow_mut());
        drop(held);
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakField {
        WeakField(Rc::downgrade(&self.inner))
    }
}

impl PartialEq for FieldNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldNode")
            .field("path", &self.path().to_string())
            .field("value", &self.value())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use futures::channel::oneshot;
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::config::FormConfig;
    use crate::validation::{self, ValidationError};

    fn runtime() -> Rc<FormRuntime> {
        FormRuntime::new(FormConfig::default())
    }

    fn field(schema: FieldSchema) -> FieldNode {
        FieldNode::new(&schema, &runtime())
    }

    #[test]
    fn starts_valid_and_pristine() {
        let f = field(FieldSchema::new(json!("")).validator(validation::required()));
        assert_eq!(f.status(), FieldStatus::Valid);
        assert!(f.errors().is_empty());
        assert!(!f.touched());
        assert!(!f.dirty());
    }

    #[test]
    fn user_write_marks_dirty_and_validates() {
        let f = field(FieldSchema::new(json!("x")).validator(validation::required()));
        f.set_value(json!(""));
        assert!(f.dirty());
        assert_eq!(f.status(), FieldStatus::Invalid);
        assert_eq!(f.errors()[0].code, "required");

        f.set_value(json!("y"));
        assert_eq!(f.status(), FieldStatus::Valid);
        assert!(f.errors().is_empty());
    }

    #[test]
    fn errors_subscribers_see_matching_status() {
        let f = field(FieldSchema::new(json!("x")).validator(validation::required()));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (sink, reader) = (Rc::clone(&seen), f.clone());
        let _sub = f
            .errors_cell()
            .subscribe(move |errors| sink.borrow_mut().push((errors.len(), reader.status())));

        f.set_value(json!(""));
        f.set_value(json!("y"));
        assert_eq!(
            *seen.borrow(),
            vec![(1, FieldStatus::Invalid), (0, FieldStatus::Valid)]
        );
    }

    #[test]
    fn programmatic_write_keeps_pristine() {
        let f = field(FieldSchema::new(json!(1)));
        f.set_value_with(json!(2), SetValueOptions::programmatic());
        assert_eq!(f.value(), json!(2));
        assert!(!f.dirty());
    }

    #[test]
    fn all_sync_errors_are_reported() {
        let f = field(
            FieldSchema::new(json!("ab"))
                .validator(validation::min_length(3))
                .validator(validation::email()),
        );
        let valid = block_on(f.validate());
        assert!(!valid);
        let codes: Vec<_> = f.errors().into_iter().map(|e| e.code).collect();
        assert_eq!(codes, vec!["minLength", "email"]);
    }

    #[test]
    fn async_runs_only_when_sync_passes() {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let f = field(
            FieldSchema::new(json!(""))
                .validator(validation::required())
                .async_validator(validation::async_validator(move |_, _| {
                    c.set(c.get() + 1);
                    async { None }
                })),
        );
        assert!(!block_on(f.validate()));
        assert_eq!(calls.get(), 0);

        f.set_value_with(json!("ok"), SetValueOptions::silent());
        assert!(block_on(f.validate()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn stale_async_result_is_dropped() {
        let (tx_slow, rx_slow) = oneshot::channel::<Option<ValidationError>>();
        let (tx_fast, rx_fast) = oneshot::channel::<Option<ValidationError>>();
        let channels = Rc::new(RefCell::new(vec![rx_fast, rx_slow]));
        let f = field(FieldSchema::new(json!("a")).async_validator(
            validation::async_validator(move |_, _| {
                let rx = channels.borrow_mut().pop();
                async move {
                    match rx {
                        Some(rx) => rx.await.ok().flatten(),
                        None => None,
                    }
                }
            }),
        ));

        let first = f.validate();
        assert_eq!(f.status(), FieldStatus::Pending);
        let second = f.validate();

        tx_fast.send(None).unwrap();
        assert!(block_on(second));
        assert_eq!(f.status(), FieldStatus::Valid);

        tx_slow
            .send(Some(ValidationError::new("taken", "Already taken")))
            .unwrap();
        block_on(first);
        assert_eq!(f.status(), FieldStatus::Valid);
        assert!(f.errors().is_empty());
    }

    #[test]
    fn disable_clears_errors_and_skips_validation() {
        let f = field(FieldSchema::new(json!("")).validator(validation::required()));
        assert!(!block_on(f.validate()));
        f.disable();
        assert_eq!(f.status(), FieldStatus::Disabled);
        assert!(f.errors().is_empty());
        assert!(block_on(f.validate()));
        assert_eq!(f.status(), FieldStatus::Disabled);

        f.enable();
        assert_eq!(f.status(), FieldStatus::Valid);
    }

    #[test]
    fn blur_fields_validate_on_touch() {
        let f = field(
            FieldSchema::new(json!(""))
                .validator(validation::required())
                .update_on(UpdateOn::Blur),
        );
        f.set_value(json!("x"));
        f.set_value(json!(""));
        assert_eq!(f.status(), FieldStatus::Valid);
        f.mark_as_touched();
        assert_eq!(f.status(), FieldStatus::Invalid);
        assert!(f.should_show_error());
    }

    #[test]
    fn submit_fields_wait_for_validate() {
        let f = field(
            FieldSchema::new(json!("x"))
                .validator(validation::required())
                .update_on(UpdateOn::Submit),
        );
        f.set_value(json!(""));
        f.mark_as_touched();
        assert_eq!(f.status(), FieldStatus::Valid);
        assert!(!block_on(f.validate()));
    }

    #[test]
    fn reset_restores_initial_state() {
        let f = field(FieldSchema::new(json!("a")).validator(validation::required()));
        f.set_value(json!(""));
        f.mark_as_touched();
        f.reset(None);
        assert_eq!(f.value(), json!("a"));
        assert!(!f.touched() && !f.dirty());
        assert_eq!(f.status(), FieldStatus::Valid);
        assert!(f.errors().is_empty());

        f.reset(Some(json!("b")));
        assert_eq!(f.initial_value(), json!("b"));
        f.set_value(json!("c"));
        f.reset(None);
        assert_eq!(f.value(), json!("b"));

        f.reset_to_initial();
        assert_eq!(f.value(), json!("a"));
    }

    #[test]
    fn reset_keeps_disabled() {
        let f = field(FieldSchema::new(json!(1)).disabled(true));
        f.reset(None);
        assert!(f.is_disabled());
    }

    #[test]
    fn external_errors() {
        let f = field(FieldSchema::new(json!("x")));
        f.set_errors(vec![ValidationError::new("server", "Rejected")]);
        assert_eq!(f.status(), FieldStatus::Invalid);
        f.clear_errors();
        assert_eq!(f.status(), FieldStatus::Valid);
    }

    #[test]
    fn compute_from_follows_sources_until_dispose() {
        let rt = runtime();
        let a = FieldNode::new(&FieldSchema::new(json!(1)), &rt);
        let b = FieldNode::new(&FieldSchema::new(json!(2)), &rt);
        let sum = FieldNode::new(&FieldSchema::new(json!(0)), &rt);
        sum.compute_from(&[a.clone().into(), b.clone().into()], |values| {
            json!(values.iter().filter_map(Value::as_i64).sum::<i64>())
        });
        assert_eq!(sum.value(), json!(3));
        a.set_value(json!(10));
        assert_eq!(sum.value(), json!(12));

        sum.dispose();
        b.set_value(json!(100));
        assert_eq!(sum.value(), json!(12));
    }
}
