use ahash::AHashMap;
use serde_json::{Map, Value};

use super::FormNode;

/// Keyed children of a group, in declaration order.
///
/// Lookup goes through a hash index; iteration follows insertion order so
/// composite values and cascades are deterministic.
#[derive(Clone, Default, Debug)]
pub struct FieldRegistry {
    entries: Vec<(String, FormNode)>,
    index: AHashMap<String, usize>,
}

impl FieldRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the child under `key`. Returns the replaced child.
    pub fn insert(&mut self, key: impl Into<String>, node: FormNode) -> Option<FormNode> {
        let key = key.into();
        if let Some(&at) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[at].1, node));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, node));
        None
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FormNode> {
        self.index.get(key).map(|&at| &self.entries[at].1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &FormNode> {
        self.entries.iter().map(|(_, node)| node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormNode)> {
        self.entries.iter().map(|(key, node)| (key.as_str(), node))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object of every child's current value.
    pub(crate) fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(key, node)| (key.clone(), node.value()))
            .collect();
        Value::Object(map)
    }
}
