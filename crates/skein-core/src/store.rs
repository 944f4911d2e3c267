//! The variable store interface.
//!
//! The store is an external collaborator: the engine reads variables for
//! text expansion, writes per-label visit counters, and hands a reference
//! to the expression evaluator. [`MemoryStore`] is a plain hash-map
//! implementation sufficient for tests and standalone play.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A mapping from string keys to dynamically-typed values.
pub trait VarStore {
    /// Read a value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value, creating or replacing the key.
    fn set(&mut self, key: &str, value: Value);

    /// Whether the key exists.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Read a value coerced to an integer; missing keys read as 0.
    fn get_int(&self, key: &str) -> i64 {
        self.get(key).map(|v| v.as_int()).unwrap_or(0)
    }

    /// Read a value coerced to a float; missing keys read as 0.0.
    fn get_float(&self, key: &str) -> f64 {
        self.get(key).map(|v| v.as_float()).unwrap_or(0.0)
    }

    /// Read a value rendered as text; missing keys read as empty text.
    fn get_text(&self, key: &str) -> String {
        self.get(key).map(|v| v.as_text()).unwrap_or_default()
    }

    /// Add one to the integer stored under `key` and return the new count.
    /// Used for knot and stitch visit counters.
    fn increment(&mut self, key: &str) -> i64 {
        let next = self.get_int(key) + 1;
        self.set(key, Value::Int(next));
        next
    }
}

/// A hash-map-backed variable store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl VarStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut store = MemoryStore::new();
        store.set("hp", Value::Int(10));
        assert_eq!(store.get("hp"), Some(Value::Int(10)));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn typed_reads_with_defaults() {
        let mut store = MemoryStore::new();
        store.set("count", Value::Int(3));
        store.set("name", Value::Str("Mara".into()));
        assert_eq!(store.get_int("count"), 3);
        assert_eq!(store.get_int("missing"), 0);
        assert_eq!(store.get_float("count"), 3.0);
        assert_eq!(store.get_text("name"), "Mara");
        assert_eq!(store.get_text("missing"), "");
    }

    #[test]
    fn increment_counts_visits() {
        let mut store = MemoryStore::new();
        assert_eq!(store.increment("intro"), 1);
        assert_eq!(store.increment("intro"), 2);
        assert_eq!(store.get_int("intro"), 2);
    }

    #[test]
    fn overwrite_changes_type() {
        let mut store = MemoryStore::new();
        store.set("x", Value::Float(1.5));
        store.set("x", Value::Str("text".into()));
        assert_eq!(store.get("x"), Some(Value::Str("text".into())));
    }
}
