//! Ordered, growable lists of groups built from one item template.
//!
//! Items are held in an `Observable<Vec<GroupNode>>`. Structural edits
//! (push, insert, remove, move, clear) replace the list and then re-point
//! the aggregate cells at the new item set, so aggregates never read a
//! removed item and always cover a new one. Items keep their [`NodeId`]
//! across re-indexing; only their paths change.
//!
//! [`NodeId`]: super::NodeId

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use formkit_reactive::{Computed, Dependency, Observable};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};
use serde_json::Value;

use super::{FieldStatus, GroupNode, fold_status};
use crate::path::Path;
use crate::runtime::FormRuntime;
use crate::schema::{ArraySchema, GroupSchema};

pub(crate) struct ArrayInner {
    runtime: Rc<FormRuntime>,
    path: RefCell<Path>,
    template: GroupSchema,
    initial_items: RefCell<Vec<Value>>,
    original_items: Vec<Value>,
    items: Observable<Vec<GroupNode>>,
    length: Computed<usize>,
    value: Computed<Value>,
    touched: Computed<bool>,
    dirty: Computed<bool>,
    status: Computed<FieldStatus>,
    /// Feeds `status`, so an empty disabled array still reports `Disabled`.
    disabled: Observable<bool>,
    properties: RefCell<AHashMap<String, Value>>,
}

/// An ordered list of groups sharing one schema.
#[derive(Clone)]
pub struct ArrayNode {
    inner: Rc<ArrayInner>,
}

/// Non-owning handle to an [`ArrayNode`].
#[derive(Clone, Debug)]
pub struct WeakArray(Weak<ArrayInner>);

impl WeakArray {
    #[must_use]
    pub fn upgrade(&self) -> Option<ArrayNode> {
        self.0.upgrade().map(|inner| ArrayNode { inner })
    }
}

impl ArrayNode {
    pub(crate) fn build(schema: &ArraySchema, runtime: &Rc<FormRuntime>, path: Path) -> Self {
        let items: Vec<GroupNode> = schema
            .items()
            .iter()
            .enumerate()
            .map(|(index, values)| {
                GroupNode::build(
                    &schema.item().with_values(values),
                    runtime,
                    path.clone().index(index),
                )
            })
            .collect();
        let items = Observable::new(items);

        let length = Computed::from_observable(&items, Vec::len);
        let value = {
            let list = items.clone();
            Computed::new(
                move || list.with(|items| Value::Array(items.iter().map(GroupNode::value).collect())),
                &[],
            )
        };
        let touched = {
            let list = items.clone();
            Computed::new(move || list.with(|items| items.iter().any(GroupNode::touched)), &[])
        };
        let dirty = {
            let list = items.clone();
            Computed::new(move || list.with(|items| items.iter().any(GroupNode::dirty)), &[])
        };
        let disabled = Observable::new(false);
        let status = {
            let (list, off) = (items.clone(), disabled.clone());
            Computed::new(
                move || {
                    list.with(|items| {
                        if items.is_empty() && off.get() {
                            FieldStatus::Disabled
                        } else {
                            fold_status(items.iter().map(GroupNode::status), false)
                        }
                    })
                },
                &[],
            )
        };

        let array = Self {
            inner: Rc::new(ArrayInner {
                runtime: Rc::clone(runtime),
                path: RefCell::new(path),
                template: schema.item().clone(),
                initial_items: RefCell::new(schema.items().to_vec()),
                original_items: schema.items().to_vec(),
                items,
                length,
                value,
                touched,
                dirty,
                status,
                disabled,
                properties: RefCell::new(AHashMap::new()),
            }),
        };
        array.rewire();
        array
    }

    /// Point every aggregate at the list cell plus the current items.
    fn rewire(&self) {
        let items = self.inner.items.get();
        let list: &dyn Dependency = &self.inner.items;

        let deps: Vec<&dyn Dependency> = std::iter::once(list)
            .chain(items.iter().map(|item| item.value_cell() as &dyn Dependency))
            .collect();
        self.inner.value.rebind(&deps);

        let deps: Vec<&dyn Dependency> = std::iter::once(list)
            .chain(items.iter().map(|item| item.touched_cell() as &dyn Dependency))
            .collect();
        self.inner.touched.rebind(&deps);

        let deps: Vec<&dyn Dependency> = std::iter::once(list)
            .chain(items.iter().map(|item| item.dirty_cell() as &dyn Dependency))
            .collect();
        self.inner.dirty.rebind(&deps);

        let off: &dyn Dependency = &self.inner.disabled;
        let deps: Vec<&dyn Dependency> = [list, off]
            .into_iter()
            .chain(items.iter().map(|item| item.status_cell() as &dyn Dependency))
            .collect();
        self.inner.status.rebind(&deps);
    }

    fn build_item(&self, values: Option<&Value>, index: usize) -> GroupNode {
        let schema = match values {
            Some(values) => self.inner.template.with_values(values),
            None => self.inner.template.clone(),
        };
        let item = GroupNode::build(&schema, &self.inner.runtime, self.path().index(index));
        if self.inner.disabled.get() {
            item.disable();
        }
        item
    }

    /// Replace the item list, re-index paths from `from` on and re-point the
    /// aggregates.
    fn commit(&self, items: Vec<GroupNode>, from: usize) {
        let path = self.path();
        for (index, item) in items.iter().enumerate().skip(from) {
            item.rebase_path(path.clone().index(index));
        }
        self.inner.items.set(items);
        self.rewire();
    }

    #[must_use]
    pub fn path(&self) -> Path {
        self.inner.path.borrow().clone()
    }

    pub(crate) fn rebase_path(&self, path: Path) {
        for (index, item) in self.inner.items.get().iter().enumerate() {
            item.rebase_path(path.clone().index(index));
        }
        *self.inner.path.borrow_mut() = path;
    }

    #[must_use]
    pub fn runtime(&self) -> &Rc<FormRuntime> {
        &self.inner.runtime
    }

    pub(crate) fn properties(&self) -> &RefCell<AHashMap<String, Value>> {
        &self.inner.properties
    }

    // ---------------------------------------------------------------------
    // Items
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.with(Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn length_cell(&self) -> &Computed<usize> {
        &self.inner.length
    }

    #[must_use]
    pub fn items_cell(&self) -> &Observable<Vec<GroupNode>> {
        &self.inner.items
    }

    /// Item at `index`, if any.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<GroupNode> {
        self.inner.items.with(|items| items.get(index).cloned())
    }

    #[must_use]
    pub fn items(&self) -> Vec<GroupNode> {
        self.inner.items.get()
    }

    pub fn map<R>(&self, mut f: impl FnMut(usize, &GroupNode) -> R) -> Vec<R> {
        self.items()
            .iter()
            .enumerate()
            .map(|(index, item)| f(index, item))
            .collect()
    }

    /// Append an item built from the template, overlaid with `values`.
    pub fn push(&self, values: Option<Value>) -> GroupNode {
        self.insert(self.len(), values)
    }

    /// Insert an item at `index` (clamped to the length).
    pub fn insert(&self, index: usize, values: Option<Value>) -> GroupNode {
        let mut items = self.items();
        let index = index.min(items.len());
        let item = self.build_item(values.as_ref(), index);
        items.insert(index, item.clone());
        self.commit(items, index + 1);
        if self.inner.runtime.has_root() {
            item.bind_behaviors();
        }
        tracing::debug!(message = "array.insert", path = %self.path(), index, id = item.id().get());
        item
    }

    /// Remove and dispose the item at `index`. Out of range warns and
    /// returns `None`.
    pub fn remove_at(&self, index: usize) -> Option<GroupNode> {
        let mut items = self.items();
        if index >= items.len() {
            self.inner.runtime.warn_usage(
                "remove_at",
                &self.path().index(index),
                &format!("index out of range for length {}", items.len()),
            );
            return None;
        }
        let removed = items.remove(index);
        removed.dispose();
        self.commit(items, index);
        tracing::debug!(message = "array.remove", path = %self.path(), index, id = removed.id().get());
        Some(removed)
    }

    /// Move the item at `from` to `to`. Nothing is disposed. Returns
    /// `false` when either index is out of range.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let mut items = self.items();
        if from >= items.len() || to >= items.len() {
            self.inner.runtime.warn_usage(
                "move_item",
                &self.path(),
                &format!("cannot move {from} to {to} in length {}", items.len()),
            );
            return false;
        }
        if from == to {
            return true;
        }
        let item = items.remove(from);
        items.insert(to, item);
        self.commit(items, from.min(to));
        true
    }

    /// Remove and dispose every item.
    pub fn clear(&self) {
        let items = self.items();
        for item in &items {
            item.dispose();
        }
        self.commit(Vec::new(), 0);
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

    pub(crate) fn initial_items(&self) -> Vec<Value> {
        self.inner.initial_items.borrow().clone()
    }

    /// Write item values position by position, growing or shrinking the
    /// list to match.
    pub fn set_value(&self, value: Value) {
        let Value::Array(values) = value else {
            self.inner
                .runtime
                .warn_usage("set_value", &self.path(), "array values must be arrays");
            return;
        };
        let existing = self.items();
        for (item, values) in existing.iter().zip(&values) {
            item.set_value(values.clone());
        }
        for values in values.iter().skip(existing.len()) {
            self.push(Some(values.clone()));
        }
        while self.len() > values.len() {
            self.remove_at(self.len() - 1);
        }
    }

    /// Patch existing items position by position. Never adds or removes.
    pub fn patch_value(&self, value: Value) {
        let Value::Array(values) = value else {
            self.inner
                .runtime
                .warn_usage("patch_value", &self.path(), "array values must be arrays");
            return;
        };
        for (item, values) in self.items().iter().zip(values) {
            item.patch_value(values);
        }
    }

    /// Dispose every item and rebuild from the initial items. `Some(array)`
    /// replaces the initial items first.
    pub fn reset(&self, value: Option<Value>) {
        match value {
            Some(Value::Array(values)) => *self.inner.initial_items.borrow_mut() = values,
            Some(_) => self
                .inner
                .runtime
                .warn_usage("reset", &self.path(), "array values must be arrays"),
            None => {}
        }
        self.clear();
        for values in self.initial_items() {
            self.push(Some(values));
        }
    }

    pub fn reset_to_initial(&self) {
        self.reset(Some(Value::Array(self.inner.original_items.clone())));
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

    #[must_use]
    pub fn valid(&self) -> bool {
        matches!(self.status(), FieldStatus::Valid | FieldStatus::Disabled)
    }

    pub fn mark_as_touched(&self) {
        for item in self.items() {
            item.mark_as_touched();
        }
    }

    pub(crate) fn touch_without_validation(&self) {
        for item in self.items() {
            item.touch_without_validation();
        }
    }

    pub fn mark_as_untouched(&self) {
        for item in self.items() {
            item.mark_as_untouched();
        }
    }

    pub fn mark_as_dirty(&self) {
        for item in self.items() {
            item.mark_as_dirty();
        }
    }

    pub fn mark_as_pristine(&self) {
        for item in self.items() {
            item.mark_as_pristine();
        }
    }

    /// Enable every item; items pushed later start enabled.
    pub fn enable(&self) {
        self.inner.disabled.set(false);
        for item in self.items() {
            item.enable();
        }
    }

    /// Disable every item; items pushed later start disabled.
    pub fn disable(&self) {
        self.inner.disabled.set(true);
        for item in self.items() {
            item.disable();
        }
    }

    pub fn validate(&self) -> LocalBoxFuture<'static, bool> {
        let runs: Vec<_> = self.items().iter().map(GroupNode::validate).collect();
        async move { join_all(runs).await.into_iter().all(|ok| ok) }.boxed_local()
    }

    pub fn validate_in_background(&self) {
        let mut run = self.validate();
        if (&mut run).now_or_never().is_none() {
            self.inner.runtime.spawn(run.map(drop).boxed_local());
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub(crate) fn bind_behaviors(&self) {
        for item in self.items() {
            item.bind_behaviors();
        }
    }

    pub fn dispose(&self) {
        for item in self.items() {
            item.dispose();
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakArray {
        WeakArray(Rc::downgrade(&self.inner))
    }
}

impl PartialEq for ArrayNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ArrayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayNode")
            .field("path", &self.path().to_string())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::config::FormConfig;
    use crate::schema::FieldSchema;

    fn line() -> GroupSchema {
        GroupSchema::new()
            .field("sku", FieldSchema::new(json!("")))
            .field("qty", FieldSchema::new(json!(1)))
    }

    fn order(items: Vec<Value>) -> GroupNode {
        let schema = GroupSchema::new().array("lines", ArraySchema::new(line()).with_items(items));
        GroupNode::create(&schema, FormConfig::default()).unwrap()
    }

    #[test]
    fn initial_items_overlay_template() {
        let form = order(vec![json!({ "sku": "A" }), json!({ "sku": "B", "qty": 3 })]);
        let lines = form.array("lines").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines.value(),
            json!([{ "sku": "A", "qty": 1 }, { "sku": "B", "qty": 3 }])
        );
    }

    #[test]
    fn push_and_insert_update_value_and_paths() {
        let form = order(vec![json!({ "sku": "A" })]);
        let lines = form.array("lines").unwrap();
        lines.push(Some(json!({ "sku": "C" })));
        let inserted = lines.insert(1, Some(json!({ "sku": "B" })));
        assert_eq!(inserted.path().to_string(), "$.lines[1]");
        assert_eq!(lines.item(2).unwrap().path().to_string(), "$.lines[2]");
        let skus: Vec<Value> = lines.map(|_, item| item.value()["sku"].clone());
        assert_eq!(skus, vec![json!("A"), json!("B"), json!("C")]);
        assert_eq!(form.value()["lines"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn remove_keeps_identity_of_remaining_items() {
        let form = order(vec![json!({ "sku": "A" }), json!({ "sku": "B" })]);
        let lines = form.array("lines").unwrap();
        let second = lines.item(1).unwrap();
        let removed = lines.remove_at(0).unwrap();
        assert_eq!(removed.value()["sku"], json!("A"));
        let first = lines.item(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id(), second.id());
        assert_eq!(first.path().to_string(), "$.lines[0]");
        assert_eq!(
            first.field("qty").unwrap().path().to_string(),
            "$.lines[0].qty"
        );
        assert!(lines.remove_at(5).is_none());
    }

    #[test]
    fn aggregates_follow_membership() {
        let form = order(vec![json!({ "sku": "A" })]);
        let lines = form.array("lines").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = lines.length_cell().subscribe(move |len| s.borrow_mut().push(*len));

        let added = lines.push(None);
        added.field("qty").unwrap().set_value(json!(7));
        assert!(lines.dirty());
        assert_eq!(lines.value()[1]["qty"], json!(7));

        lines.remove_at(1);
        assert!(!lines.dirty());
        // The removed item no longer reaches the aggregate.
        added.field("qty").unwrap().set_value(json!(8));
        assert_eq!(lines.value(), json!([{ "sku": "A", "qty": 1 }]));
        assert_eq!(*seen.borrow(), vec![2, 1]);
    }

    #[test]
    fn move_item_reorders() {
        let form = order(vec![json!({ "sku": "A" }), json!({ "sku": "B" }), json!({ "sku": "C" })]);
        let lines = form.array("lines").unwrap();
        let c = lines.item(2).unwrap();
        assert!(lines.move_item(2, 0));
        assert_eq!(lines.item(0).unwrap(), c);
        assert_eq!(c.path().to_string(), "$.lines[0]");
        assert_eq!(lines.value()[1]["sku"], json!("A"));
        assert!(!lines.move_item(0, 9));
    }

    #[test]
    fn set_value_resizes() {
        let form = order(vec![json!({ "sku": "A" })]);
        let lines = form.array("lines").unwrap();
        lines.set_value(json!([{ "sku": "X" }, { "sku": "Y", "qty": 2 }]));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.value()[1], json!({ "sku": "Y", "qty": 2 }));
        lines.set_value(json!([]));
        assert!(lines.is_empty());
    }

    #[test]
    fn reset_rebuilds_items() {
        let form = order(vec![json!({ "sku": "A" })]);
        let lines = form.array("lines").unwrap();
        let before = lines.item(0).unwrap();
        lines.push(None);
        lines.reset(None);
        assert_eq!(lines.len(), 1);
        assert_ne!(lines.item(0).unwrap(), before);
        assert_eq!(lines.value(), json!([{ "sku": "A", "qty": 1 }]));
    }

    #[test]
    fn empty_disabled_array_reports_disabled() {
        let form = order(vec![]);
        let lines = form.array("lines").unwrap();
        assert_eq!(lines.status(), FieldStatus::Valid);
        lines.disable();
        assert_eq!(lines.status(), FieldStatus::Disabled);
        assert!(lines.valid());
        lines.enable();
        assert_eq!(lines.status(), FieldStatus::Valid);
    }

    #[test]
    fn disabled_array_disables_new_items() {
        let form = order(vec![]);
        let lines = form.array("lines").unwrap();
        lines.disable();
        let item = lines.push(None);
        assert!(item.is_disabled());
        assert!(block_on(lines.validate()));
    }
}
