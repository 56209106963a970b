//! The node hierarchy: fields, groups and arrays.
//!
//! Every node owns its reactive cells exclusively. Nodes are cheap `Rc`
//! handles; cloning one never copies state. [`FormNode`] dispatches the API
//! shared by all three kinds.

pub mod access;
mod array;
mod field;
mod group;
mod registry;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use formkit_reactive::{Dependency, Priority, Subscription};
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;
use crate::validation::ValidationError;

pub use array::{ArrayNode, WeakArray};
pub use field::{FieldNode, SetValueOptions, WeakField};
pub use group::{GroupNode, WeakGroup};
pub use registry::FieldRegistry;

/// Validation and interaction state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    #[default]
    Valid,
    Invalid,
    Pending,
    Disabled,
}

impl FieldStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Pending => "pending",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a field re-validates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOn {
    /// On every value change.
    #[default]
    Change,
    /// On every `mark_as_touched`.
    Blur,
    /// Only when the owning tree is validated.
    Submit,
}

impl UpdateOn {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "change" => Some(Self::Change),
            "blur" => Some(Self::Blur),
            "submit" => Some(Self::Submit),
            _ => None,
        }
    }
}

/// Process-wide counter for node identities.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a group node, assigned at creation and independent of
/// position. Array items keep theirs across re-indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Field,
    Group,
    Array,
}

/// Fold child statuses into a composite status.
///
/// Disabled children are ignored; a composite whose children are all
/// disabled is itself `Disabled`. Otherwise pending wins over invalid, and
/// invalid over valid.
pub(crate) fn fold_status(
    statuses: impl IntoIterator<Item = FieldStatus>,
    own_invalid: bool,
) -> FieldStatus {
    let (mut seen, mut disabled) = (0usize, 0usize);
    let (mut pending, mut invalid) = (false, own_invalid);
    for status in statuses {
        seen += 1;
        match status {
            FieldStatus::Disabled => disabled += 1,
            FieldStatus::Pending => pending = true,
            FieldStatus::Invalid => invalid = true,
            FieldStatus::Valid => {}
        }
    }
    if seen > 0 && disabled == seen && !own_invalid {
        FieldStatus::Disabled
    } else if pending {
        FieldStatus::Pending
    } else if invalid {
        FieldStatus::Invalid
    } else {
        FieldStatus::Valid
    }
}

/// Any node of a form tree.
#[derive(Clone, Debug)]
pub enum FormNode {
    Field(FieldNode),
    Group(GroupNode),
    Array(ArrayNode),
}

impl FormNode {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Field(_) => NodeKind::Field,
            Self::Group(_) => NodeKind::Group,
            Self::Array(_) => NodeKind::Array,
        }
    }

    #[must_use]
    pub fn as_field(&self) -> Option<&FieldNode> {
        match self {
            Self::Field(field) => Some(field),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Self::Group(group) => Some(group),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayNode> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn path(&self) -> Path {
        match self {
            Self::Field(field) => field.path(),
            Self::Group(group) => group.path(),
            Self::Array(array) => array.path(),
        }
    }

    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Field(field) => field.value(),
            Self::Group(group) => group.value(),
            Self::Array(array) => array.value(),
        }
    }

    /// Programmatic write: validates per update trigger, never marks dirty.
    pub fn set_value(&self, value: Value) {
        match self {
            Self::Field(field) => field.set_value_with(value, SetValueOptions::programmatic()),
            Self::Group(group) => group.set_value(value),
            Self::Array(array) => array.set_value(value),
        }
    }

    pub fn patch_value(&self, value: Value) {
        match self {
            Self::Field(field) => field.set_value_with(value, SetValueOptions::programmatic()),
            Self::Group(group) => group.patch_value(value),
            Self::Array(array) => array.patch_value(value),
        }
    }

    /// Write the node's initial value back without touching flags.
    pub(crate) fn restore_initial_value(&self) {
        match self {
            Self::Field(field) => {
                field.set_value_with(field.initial_value(), SetValueOptions::programmatic());
            }
            Self::Group(group) => group.set_value(Value::Object(serde_json::Map::new())),
            Self::Array(array) => array.set_value(Value::Array(array.initial_items())),
        }
    }

    pub fn reset(&self, value: Option<Value>) {
        match self {
            Self::Field(field) => field.reset(value),
            Self::Group(group) => group.reset(value),
            Self::Array(array) => array.reset(value),
        }
    }

    pub fn reset_to_initial(&self) {
        match self {
            Self::Field(field) => field.reset_to_initial(),
            Self::Group(group) => group.reset_to_initial(),
            Self::Array(array) => array.reset_to_initial(),
        }
    }

    pub fn validate(&self) -> LocalBoxFuture<'static, bool> {
        match self {
            Self::Field(field) => field.validate(),
            Self::Group(group) => group.validate(),
            Self::Array(array) => array.validate(),
        }
    }

    /// Run validation now; hand any asynchronous remainder to the executor.
    pub fn validate_in_background(&self) {
        match self {
            Self::Field(field) => field.validate_in_background(),
            Self::Group(group) => group.validate_in_background(),
            Self::Array(array) => array.validate_in_background(),
        }
    }

    pub fn enable(&self) {
        match self {
            Self::Field(field) => field.enable(),
            Self::Group(group) => group.enable(),
            Self::Array(array) => array.enable(),
        }
    }

    pub fn disable(&self) {
        match self {
            Self::Field(field) => field.disable(),
            Self::Group(group) => group.disable(),
            Self::Array(array) => array.disable(),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.status() == FieldStatus::Disabled
    }

    pub fn mark_as_touched(&self) {
        match self {
            Self::Field(field) => field.mark_as_touched(),
            Self::Group(group) => group.mark_as_touched(),
            Self::Array(array) => array.mark_as_touched(),
        }
    }

    pub(crate) fn touch_without_validation(&self) {
        match self {
            Self::Field(field) => field.touch_without_validation(),
            Self::Group(group) => group.touch_without_validation(),
            Self::Array(array) => array.touch_without_validation(),
        }
    }

    pub fn mark_as_untouched(&self) {
        match self {
            Self::Field(field) => field.mark_as_untouched(),
            Self::Group(group) => group.mark_as_untouched(),
            Self::Array(array) => array.mark_as_untouched(),
        }
    }

    pub fn mark_as_dirty(&self) {
        match self {
            Self::Field(field) => field.mark_as_dirty(),
            Self::Group(group) => group.mark_as_dirty(),
            Self::Array(array) => array.mark_as_dirty(),
        }
    }

    pub fn mark_as_pristine(&self) {
        match self {
            Self::Field(field) => field.mark_as_pristine(),
            Self::Group(group) => group.mark_as_pristine(),
            Self::Array(array) => array.mark_as_pristine(),
        }
    }

    #[must_use]
    pub fn touched(&self) -> bool {
        match self {
            Self::Field(field) => field.touched(),
            Self::Group(group) => group.touched(),
            Self::Array(array) => array.touched(),
        }
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        match self {
            Self::Field(field) => field.dirty(),
            Self::Group(group) => group.dirty(),
            Self::Array(array) => array.dirty(),
        }
    }

    #[must_use]
    pub fn status(&self) -> FieldStatus {
        match self {
            Self::Field(field) => field.status(),
            Self::Group(group) => group.status(),
            Self::Array(array) => array.status(),
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        match self {
            Self::Field(field) => field.valid(),
            Self::Group(group) => group.valid(),
            Self::Array(array) => array.valid(),
        }
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.status() == FieldStatus::Pending
    }

    /// The node's own errors. Arrays carry none.
    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        match self {
            Self::Field(field) => field.errors(),
            Self::Group(group) => group.errors(),
            Self::Array(_) => Vec::new(),
        }
    }

    pub fn subscribe_value(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.subscribe_value_with(Priority::Normal, callback)
    }

    /// Subscribe in a given delivery lane. Rules that write other nodes use
    /// [`Priority::High`] so observers never see their target lag behind.
    pub fn subscribe_value_with(
        &self,
        priority: Priority,
        callback: impl Fn(&Value) + 'static,
    ) -> Subscription {
        match self {
            Self::Field(field) => field.value_cell().subscribe_with(priority, callback),
            Self::Group(group) => group.value_cell().subscribe_with(priority, callback),
            Self::Array(array) => array.value_cell().subscribe_with(priority, callback),
        }
    }

    pub(crate) fn value_dependency(&self) -> &dyn Dependency {
        match self {
            Self::Field(field) => field.value_cell(),
            Self::Group(group) => group.value_cell(),
            Self::Array(array) => array.value_cell(),
        }
    }

    pub(crate) fn touched_dependency(&self) -> &dyn Dependency {
        match self {
            Self::Field(field) => field.touched_cell(),
            Self::Group(group) => group.touched_cell(),
            Self::Array(array) => array.touched_cell(),
        }
    }

    pub(crate) fn dirty_dependency(&self) -> &dyn Dependency {
        match self {
            Self::Field(field) => field.dirty_cell(),
            Self::Group(group) => group.dirty_cell(),
            Self::Array(array) => array.dirty_cell(),
        }
    }

    pub(crate) fn status_dependency(&self) -> &dyn Dependency {
        match self {
            Self::Field(field) => field.status_cell(),
            Self::Group(group) => group.status_cell(),
            Self::Array(array) => array.status_cell(),
        }
    }

    /// Release every subscription held by this node and its descendants.
    pub fn dispose(&self) {
        match self {
            Self::Field(field) => field.dispose(),
            Self::Group(group) => group.dispose(),
            Self::Array(array) => array.dispose(),
        }
    }

    pub(crate) fn rebase_path(&self, path: Path) {
        match self {
            Self::Field(field) => field.rebase_path(path),
            Self::Group(group) => group.rebase_path(path),
            Self::Array(array) => array.rebase_path(path),
        }
    }

    pub(crate) fn bind_behaviors(&self) {
        match self {
            Self::Field(_) => {}
            Self::Group(group) => group.bind_behaviors(),
            Self::Array(array) => array.bind_behaviors(),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakNode {
        match self {
            Self::Field(field) => WeakNode::Field(field.downgrade()),
            Self::Group(group) => WeakNode::Group(group.downgrade()),
            Self::Array(array) => WeakNode::Array(array.downgrade()),
        }
    }

    /// Whether both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Field(a), Self::Field(b)) => a == b,
            (Self::Group(a), Self::Group(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl From<FieldNode> for FormNode {
    fn from(field: FieldNode) -> Self {
        Self::Field(field)
    }
}

impl From<GroupNode> for FormNode {
    fn from(group: GroupNode) -> Self {
        Self::Group(group)
    }
}

impl From<ArrayNode> for FormNode {
    fn from(array: ArrayNode) -> Self {
        Self::Array(array)
    }
}

/// Non-owning handle to a [`FormNode`], used by closures that must not keep
/// the tree alive.
#[derive(Clone, Debug)]
pub enum WeakNode {
    Field(WeakField),
    Group(WeakGroup),
    Array(WeakArray),
}

impl WeakNode {
    #[must_use]
    pub fn upgrade(&self) -> Option<FormNode> {
        match self {
            Self::Field(field) => field.upgrade().map(FormNode::Field),
            Self::Group(group) => group.upgrade().map(FormNode::Group),
            Self::Array(array) => array.upgrade().map(FormNode::Array),
        }
    }
}
