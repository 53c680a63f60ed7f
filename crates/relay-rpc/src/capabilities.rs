//! Nested capability map with dotted-path lookup.
//!
//! Filled from the language configuration and then from whatever the
//! server or adapter advertises during initialization. Lookups take a
//! caller default so a missing or mistyped key is never an error.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityMap {
    root: Map<String, Value>,
}

impl CapabilityMap {
    /// Build from a JSON object. Non-objects give an empty map.
    pub fn new(value: Value) -> Self {
        match value {
            Value::Object(root) => Self { root },
            _ => Self::default(),
        }
    }

    /// Store `value` at a dotted path, creating intermediate objects.
    pub fn insert(&mut self, path: &str, value: Value) {
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };
        let mut node = &mut self.root;
        for part in parts {
            let entry = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            node = next;
        }
        node.insert(last.to_string(), value);
    }

    /// Raw value at a dotted path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut node = self.root.get(parts.next()?)?;
        for part in parts {
            node = node.as_object()?.get(part)?;
        }
        Some(node)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.lookup(path).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_str<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        self.lookup(path).and_then(Value::as_str).unwrap_or(default)
    }

    /// String array at `path`, or `default` when absent or not a list
    /// of strings.
    pub fn get_strings(&self, path: &str, default: &[&str]) -> Vec<String> {
        let strings = self.lookup(path).and_then(Value::as_array).and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });
        strings.unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }
}
