//! Dynamic member access on groups and arrays.
//!
//! Lets a renderer or script layer address a node by string key the way it
//! would address an object property. Built-in members always win over a
//! field of the same name, and writes never replace a field: fields change
//! only through their own API.

use serde_json::{Value, json};

use super::{ArrayNode, FormNode, GroupNode};

/// Names reserved by groups.
pub const RESERVED_MEMBERS: &[&str] = &[
    "value",
    "touched",
    "dirty",
    "valid",
    "invalid",
    "pending",
    "status",
    "errors",
    "submitting",
    "disabled",
    "path",
    "id",
    "set_value",
    "patch_value",
    "reset",
    "reset_to_initial",
    "validate",
    "submit",
    "enable",
    "disable",
    "mark_as_touched",
    "mark_as_untouched",
    "mark_as_dirty",
    "mark_as_pristine",
    "dispose",
];

/// Extra names reserved by arrays.
pub const RESERVED_ARRAY_MEMBERS: &[&str] = &[
    "length", "items", "push", "insert", "remove_at", "move_item", "clear", "map",
];

pub(crate) fn is_reserved(key: &str) -> bool {
    RESERVED_MEMBERS.contains(&key)
}

fn is_reserved_for_array(key: &str) -> bool {
    is_reserved(key) || RESERVED_ARRAY_MEMBERS.contains(&key)
}

/// What a key resolves to.
#[derive(Debug, Clone)]
pub enum Member {
    /// A child node.
    Node(FormNode),
    /// A snapshot of built-in state, such as `value` or `status`.
    State(Value),
    /// A built-in operation; call it through the typed API.
    Method(&'static str),
    /// A free-form property stored through [`MemberAccess::set`].
    Property(Value),
}

impl Member {
    #[must_use]
    pub fn as_node(&self) -> Option<&FormNode> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// The value behind a state, property, or node member.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Node(node) => Some(node.value()),
            Self::State(value) | Self::Property(value) => Some(value.clone()),
            Self::Method(_) => None,
        }
    }
}

/// String-keyed access to a node's members.
pub trait MemberAccess {
    /// Resolve `key`. Unknown keys warn and return `None`.
    fn get(&self, key: &str) -> Option<Member>;

    /// Store a free-form property. Rejected (with a warning) for built-in
    /// names and for keys naming a child.
    fn set(&self, key: &str, value: Value) -> bool;

    fn has(&self, key: &str) -> bool;

    /// Child keys followed by property keys.
    fn keys(&self) -> Vec<String>;
}

fn shared_state(node: &FormNode, key: &str) -> Option<Member> {
    let state = match key {
        "value" => node.value(),
        "touched" => json!(node.touched()),
        "dirty" => json!(node.dirty()),
        "valid" => json!(node.valid()),
        "invalid" => json!(node.status() == super::FieldStatus::Invalid),
        "pending" => json!(node.pending()),
        "status" => json!(node.status().as_str()),
        "errors" => serde_json::to_value(node.errors()).unwrap_or(Value::Null),
        "disabled" => json!(node.is_disabled()),
        "path" => json!(node.path().to_string()),
        _ => return None,
    };
    Some(Member::State(state))
}

fn builtin_method(key: &str, reserved: impl Fn(&str) -> bool) -> Option<Member> {
    if !reserved(key) {
        return None;
    }
    RESERVED_MEMBERS
        .iter()
        .chain(RESERVED_ARRAY_MEMBERS)
        .find(|name| **name == key)
        .map(|name| Member::Method(*name))
}

fn sorted_properties(keys: impl Iterator<Item = String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.collect();
    keys.sort();
    keys
}

impl MemberAccess for GroupNode {
    fn get(&self, key: &str) -> Option<Member> {
        if is_reserved(key) {
            if self.registry().contains_key(key) {
                self.runtime().warn_usage(
                    "member.get",
                    &self.path().key(key),
                    "built-in member shadows a child of the same name",
                );
            }
            let node = FormNode::Group(self.clone());
            return match key {
                "submitting" => Some(Member::State(json!(self.submitting()))),
                "id" => Some(Member::State(json!(self.id().get()))),
                _ => shared_state(&node, key),
            }
            .or_else(|| builtin_method(key, is_reserved));
        }
        if let Some(child) = self.registry().get(key) {
            return Some(Member::Node(child.clone()));
        }
        if let Some(value) = self.properties().borrow().get(key) {
            return Some(Member::Property(value.clone()));
        }
        self.runtime()
            .warn_usage("member.get", &self.path().key(key), "no child or property with this name");
        None
    }

    fn set(&self, key: &str, value: Value) -> bool {
        if is_reserved(key) {
            self.runtime()
                .warn_usage("member.set", &self.path().key(key), "built-in members are read-only");
            return false;
        }
        if self.registry().contains_key(key) {
            self.runtime().warn_usage(
                "member.set",
                &self.path().key(key),
                "children cannot be replaced; write through set_value",
            );
            return false;
        }
        self.properties().borrow_mut().insert(key.to_string(), value);
        true
    }

    fn has(&self, key: &str) -> bool {
        is_reserved(key)
            || self.registry().contains_key(key)
            || self.properties().borrow().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.registry().keys().map(str::to_string).collect();
        let extra = sorted_properties(
            self.properties()
                .borrow()
                .keys()
                .filter(|key| !self.registry().contains_key(key))
                .cloned(),
        );
        keys.extend(extra);
        keys
    }
}

impl MemberAccess for ArrayNode {
    fn get(&self, key: &str) -> Option<Member> {
        if let Ok(index) = key.parse::<usize>() {
            let item = self.item(index).map(|item| Member::Node(FormNode::Group(item)));
            if item.is_none() {
                self.runtime().warn_usage(
                    "member.get",
                    &self.path().index(index),
                    &format!("index out of range for length {}", self.len()),
                );
            }
            return item;
        }
        if is_reserved_for_array(key) {
            let node = FormNode::Array(self.clone());
            return match key {
                "length" => Some(Member::State(json!(self.len()))),
                _ => shared_state(&node, key),
            }
            .or_else(|| builtin_method(key, is_reserved_for_array));
        }
        if let Some(value) = self.properties().borrow().get(key) {
            return Some(Member::Property(value.clone()));
        }
        self.runtime()
            .warn_usage("member.get", &self.path().key(key), "no item or property with this name");
        None
    }

    fn set(&self, key: &str, value: Value) -> bool {
        if key.parse::<usize>().is_ok() {
            self.runtime().warn_usage(
                "member.set",
                &self.path().key(key),
                "items cannot be replaced; use set_value, insert or remove_at",
            );
            return false;
        }
        if is_reserved_for_array(key) {
            self.runtime()
                .warn_usage("member.set", &self.path().key(key), "built-in members are read-only");
            return false;
        }
        self.properties().borrow_mut().insert(key.to_string(), value);
        true
    }

    fn has(&self, key: &str) -> bool {
        match key.parse::<usize>() {
            Ok(index) => index < self.len(),
            Err(_) => is_reserved_for_array(key) || self.properties().borrow().contains_key(key),
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = (0..self.len()).map(|index| index.to_string()).collect();
        keys.extend(sorted_properties(self.properties().borrow().keys().cloned()));
        keys
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::FormConfig;
    use crate::schema::{ArraySchema, FieldSchema, GroupSchema};

    fn form() -> GroupNode {
        let schema = GroupSchema::new()
            .field("email", FieldSchema::new(json!("a@b.io")))
            .field("status", FieldSchema::new(json!("draft")))
            .array(
                "tags",
                ArraySchema::new(GroupSchema::new().field("label", FieldSchema::new(json!(""))))
                    .with_items(vec![json!({ "label": "x" })]),
            );
        GroupNode::create(&schema, FormConfig::default()).unwrap()
    }

    #[test]
    fn child_lookup_and_state() {
        let form = form();
        let email = form.get("email").and_then(|m| m.as_node().cloned()).unwrap();
        assert_eq!(email.value(), json!("a@b.io"));
        assert_eq!(
            form.get("valid").and_then(|m| m.to_value()),
            Some(json!(true))
        );
        assert!(matches!(form.get("validate"), Some(Member::Method("validate"))));
        assert!(form.get("missing").is_none());
    }

    #[test]
    fn reserved_name_wins_over_field() {
        let form = form();
        // `status` is both a field and a built-in; the built-in wins.
        assert_eq!(
            form.get("status").and_then(|m| m.to_value()),
            Some(json!("valid"))
        );
        assert_eq!(form.field("status").unwrap().value(), json!("draft"));
    }

    #[test]
    fn writes_store_properties_but_never_replace_fields() {
        let form = form();
        assert!(!form.set("email", json!("evil")));
        assert_eq!(form.field("email").unwrap().value(), json!("a@b.io"));
        assert!(!form.set("value", json!(1)));

        assert!(form.set("theme", json!("dark")));
        assert!(form.has("theme"));
        assert_eq!(form.get("theme").and_then(|m| m.to_value()), Some(json!("dark")));
        assert_eq!(form.keys(), vec!["email", "status", "tags", "theme"]);
    }

    #[test]
    fn array_members() {
        let form = form();
        let tags = form.array("tags").unwrap();
        assert_eq!(tags.get("length").and_then(|m| m.to_value()), Some(json!(1)));
        assert!(tags.get("0").and_then(|m| m.as_node().cloned()).is_some());
        assert!(tags.get("3").is_none());
        assert!(!tags.set("0", json!({})));
        assert!(tags.set("sortable", json!(true)));
        assert_eq!(tags.keys(), vec!["0", "sortable"]);
        assert!(tags.has("push"));
        assert!(!tags.has("1"));
    }
}
