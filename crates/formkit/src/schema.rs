//! Declarative description of a form tree.
//!
//! A schema is consumed once, when the form is built. Validation and
//! behavior registration happen on the schema too, through explicit
//! [`Path`] descriptors resolved against its shape:
//!
//! ```
//! use formkit::{FieldSchema, GroupSchema};
//! use serde_json::json;
//!
//! let schema = GroupSchema::new()
//!     .field("email", FieldSchema::new(json!("")))
//!     .validation(|v| {
//!         v.required("email").email("email");
//!     });
//! assert_eq!(schema.initial_value(), json!({ "email": "" }));
//! ```

use std::fmt;

use serde_json::{Map, Value};

use crate::behavior::{BehaviorKind, BehaviorRule, BehaviorSchema};
use crate::error::{FormError, Result};
use crate::node::UpdateOn;
use crate::path::{Path, Segment};
use crate::validation::schema::Registration;
use crate::validation::{AsyncValidator, ValidationSchema, Validator};

/// Any node of a schema tree.
#[derive(Clone, Debug)]
pub enum NodeSchema {
    Field(FieldSchema),
    Group(GroupSchema),
    Array(ArraySchema),
}

impl NodeSchema {
    #[must_use]
    pub fn initial_value(&self) -> Value {
        match self {
            Self::Field(field) => field.value.clone(),
            Self::Group(group) => group.initial_value(),
            Self::Array(array) => Value::Array(array.items.clone()),
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::Group(GroupSchema::from_map(map)),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                let template = items
                    .first()
                    .and_then(Value::as_object)
                    .map(GroupSchema::from_map)
                    .unwrap_or_default();
                Self::Array(ArraySchema::new(template).with_items(items.clone()))
            }
            other => Self::Field(FieldSchema::new(other.clone())),
        }
    }

    fn locate_mut(&mut self, segments: &[Segment]) -> Option<Slot<'_>> {
        match self {
            Self::Field(field) => segments.is_empty().then_some(Slot::Field(field)),
            Self::Group(group) => group.locate_mut(segments),
            Self::Array(array) => match segments.split_first() {
                None => Some(Slot::Array(array)),
                Some((Segment::Each | Segment::Index(_), rest)) => array.item.locate_mut(rest),
                Some(_) => None,
            },
        }
    }
}

/// A schema node reached by a registration path.
enum Slot<'a> {
    Field(&'a mut FieldSchema),
    Group(&'a mut GroupSchema),
    Array(&'a mut ArraySchema),
}

// ---------------------------------------------------------------------------
// FieldSchema
// ---------------------------------------------------------------------------

/// A leaf: initial value plus validation and presentation settings.
#[derive(Clone)]
pub struct FieldSchema {
    pub(crate) value: Value,
    pub(crate) validators: Vec<Validator>,
    pub(crate) async_validators: Vec<AsyncValidator>,
    /// `None` falls back to the form's configured default.
    pub(crate) update_on: Option<UpdateOn>,
    pub(crate) disabled: bool,
    pub(crate) component_props: Value,
}

impl FieldSchema {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            validators: Vec::new(),
            async_validators: Vec::new(),
            update_on: None,
            disabled: false,
            component_props: Value::Object(Map::new()),
        }
    }

    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn async_validator(mut self, validator: AsyncValidator) -> Self {
        self.async_validators.push(validator);
        self
    }

    #[must_use]
    pub fn update_on(mut self, update_on: UpdateOn) -> Self {
        self.update_on = Some(update_on);
        self
    }

    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Opaque props handed to the rendering layer.
    #[must_use]
    pub fn component_props(mut self, props: Value) -> Self {
        self.component_props = props;
        self
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("value", &self.value)
            .field("validators", &self.validators.len())
            .field("async_validators", &self.async_validators.len())
            .field("update_on", &self.update_on)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GroupSchema
// ---------------------------------------------------------------------------

/// Named children in declaration order, plus group-level validators and
/// behavior rules scoped to this group.
#[derive(Clone, Default)]
pub struct GroupSchema {
    children: Vec<(String, NodeSchema)>,
    validators: Vec<Validator>,
    rules: Vec<BehaviorRule>,
}

impl GroupSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from a plain JSON object of initial values.
    ///
    /// Objects become groups, non-empty arrays of objects become arrays
    /// templated on their first element, everything else becomes a field.
    ///
    /// # Errors
    ///
    /// [`FormError::InvalidSchema`] when `value` is not an object.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(FormError::invalid_schema(format!(
                "form root must be an object, got {}",
                json_kind(other)
            ))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        map.iter().fold(Self::new(), |schema, (key, value)| {
            schema.child(key.clone(), NodeSchema::from_json(value))
        })
    }

    /// Add or replace the child under `key`.
    #[must_use]
    pub fn child(mut self, key: impl Into<String>, node: NodeSchema) -> Self {
        let key = key.into();
        match self.children.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = node,
            None => self.children.push((key, node)),
        }
        self
    }

    #[must_use]
    pub fn field(self, key: impl Into<String>, field: FieldSchema) -> Self {
        self.child(key, NodeSchema::Field(field))
    }

    #[must_use]
    pub fn group(self, key: impl Into<String>, group: GroupSchema) -> Self {
        self.child(key, NodeSchema::Group(group))
    }

    #[must_use]
    pub fn array(self, key: impl Into<String>, array: ArraySchema) -> Self {
        self.child(key, NodeSchema::Array(array))
    }

    /// Add a validator over this group's whole value.
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&NodeSchema> {
        self.children.iter().find(|(k, _)| k == key).map(|(_, node)| node)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(key, _)| key.as_str())
    }

    pub(crate) fn children(&self) -> &[(String, NodeSchema)] {
        &self.children
    }

    pub(crate) fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub(crate) fn rules(&self) -> &[BehaviorRule] {
        &self.rules
    }

    #[must_use]
    pub fn initial_value(&self) -> Value {
        Value::Object(
            self.children
                .iter()
                .map(|(key, node)| (key.clone(), node.initial_value()))
                .collect(),
        )
    }

    /// Copy of this schema whose initial values are overlaid with `values`.
    /// Keys missing from `values` keep the schema default.
    #[must_use]
    pub fn with_values(&self, values: &Value) -> Self {
        let mut schema = self.clone();
        let Value::Object(values) = values else {
            return schema;
        };
        for (key, node) in &mut schema.children {
            let Some(value) = values.get(key) else {
                continue;
            };
            match node {
                NodeSchema::Field(field) => field.value = value.clone(),
                NodeSchema::Group(group) => *group = group.with_values(value),
                NodeSchema::Array(array) => {
                    if let Value::Array(items) = value {
                        array.items = items.clone();
                    }
                }
            }
        }
        schema
    }

    fn locate_mut(&mut self, segments: &[Segment]) -> Option<Slot<'_>> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(Slot::Group(self));
        };
        let Segment::Key(key) = first else {
            return None;
        };
        self.children
            .iter_mut()
            .find(|(k, _)| k == key)
            .and_then(|(_, child)| child.locate_mut(rest))
    }

    /// Register validators through explicit paths.
    ///
    /// Paths that do not lead to a field or group are skipped with a
    /// warning. Asynchronous validators attach to fields only.
    #[must_use]
    pub fn validation(mut self, register: impl FnOnce(&mut ValidationSchema)) -> Self {
        let mut registry = ValidationSchema::new();
        register(&mut registry);
        for entry in registry.into_entries() {
            match entry {
                Registration::Sync(path, validator) => {
                    match self.locate_mut(path.segments()) {
                        Some(Slot::Field(field)) => field.validators.push(validator),
                        Some(Slot::Group(group)) => group.validators.push(validator),
                        Some(Slot::Array(_)) | None => {
                            warn_unplaced(&path, "path does not lead to a field or group");
                        }
                    }
                }
                Registration::Async(path, validator) => {
                    match self.locate_mut(path.segments()) {
                        Some(Slot::Field(field)) => field.async_validators.push(validator),
                        _ => warn_unplaced(&path, "async validators attach to fields only"),
                    }
                }
            }
        }
        self
    }

    /// Register behavior rules scoped to this group.
    ///
    /// A rule whose target lies under `array[*]` moves into the item
    /// template, so every item gets its own binding. Its sources under the
    /// same `array[*]` become item-relative; other sources become
    /// root-anchored. The empty path keeps naming the scope the rule lives
    /// in, which for a moved rule is the item.
    ///
    /// # Errors
    ///
    /// [`FormError::UnsupportedPath`] when a target walks through `[*]` of
    /// something that is not an array, or a moved rule reads from a
    /// different array's items.
    pub fn behaviors(mut self, register: impl FnOnce(&mut BehaviorSchema)) -> Result<Self> {
        let mut schema = BehaviorSchema::new();
        register(&mut schema);
        for rule in schema.into_rules() {
            self.install_rule(rule)?;
        }
        Ok(self)
    }

    fn install_rule(&mut self, rule: BehaviorRule) -> Result<()> {
        let Some((array_path, _)) = rule.target().split_each() else {
            self.rules.push(rule);
            return Ok(());
        };
        let item_prefix = array_path.clone().each();
        let Some(Slot::Array(array)) = self.locate_mut(array_path.segments()) else {
            return Err(FormError::unsupported_path(
                rule.target().clone(),
                "`[*]` must follow an array",
            ));
        };
        let rule = rule.relocate(|path| {
            if path.is_empty() && !path.is_root_anchored() {
                return Ok(path.clone());
            }
            if let Some(inner) = path.rebase(&item_prefix, &Path::scope()) {
                return Ok(inner);
            }
            if path.segments().contains(&Segment::Each) {
                return Err(FormError::unsupported_path(
                    path.clone(),
                    "a per-item rule cannot read every item of another array",
                ));
            }
            Ok(path.clone().anchored_at_root())
        })?;
        array.item.install_rule(rule)
    }

    /// Reject value-writing rules (`Compute`, `CopyTo`) whose target feeds
    /// back, directly or through other such rules, into one of their own
    /// sources. Checked per scope, recursively.
    ///
    /// # Errors
    ///
    /// [`FormError::Cycle`] naming the first offending target and source.
    pub fn check_cycles(&self) -> Result<()> {
        let writers: Vec<&BehaviorRule> = self
            .rules
            .iter()
            .filter(|rule| matches!(rule.kind(), BehaviorKind::Compute | BehaviorKind::CopyTo))
            .collect();
        for rule in &writers {
            let mut frontier = vec![rule.target().clone()];
            let mut visited = vec![false; writers.len()];
            while let Some(written) = frontier.pop() {
                if let Some(source) = rule.sources().iter().find(|s| s.overlaps(&written)) {
                    return Err(FormError::Cycle {
                        target: rule.target().clone(),
                        source_path: source.clone(),
                    });
                }
                for (at, next) in writers.iter().enumerate() {
                    if !visited[at] && next.sources().iter().any(|s| s.overlaps(&written)) {
                        visited[at] = true;
                        frontier.push(next.target().clone());
                    }
                }
            }
        }
        for (_, child) in &self.children {
            match child {
                NodeSchema::Group(group) => group.check_cycles()?,
                NodeSchema::Array(array) => array.item.check_cycles()?,
                NodeSchema::Field(_) => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GroupSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSchema")
            .field("children", &self.children)
            .field("validators", &self.validators.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn warn_unplaced(path: &Path, detail: &str) {
    tracing::warn!(target: "formkit::usage", op = "validation", path = %path, "{detail}");
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// ArraySchema
// ---------------------------------------------------------------------------

/// An item template plus the initial items.
#[derive(Clone, Debug)]
pub struct ArraySchema {
    item: GroupSchema,
    items: Vec<Value>,
}

impl ArraySchema {
    #[must_use]
    pub fn new(item: GroupSchema) -> Self {
        Self {
            item,
            items: Vec::new(),
        }
    }

    /// Initial items; each overlays the template's defaults.
    #[must_use]
    pub fn with_items(mut self, items: Vec<Value>) -> Self {
        self.items = items;
        self
    }

    #[must_use]
    pub fn item(&self) -> &GroupSchema {
        &self.item
    }

    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }
}
