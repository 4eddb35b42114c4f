//! Variable store.
//!
//! One `Store` is a single scope: the global scope of a session, the locals
//! of a call frame, or a module's export table.  Values are shared, so
//! inserting a value taken from another store aliases the same data.

use std::collections::HashMap;

use crate::script::value::Value;

/// Name → value mapping with unique names.
#[derive(Debug, Clone, Default)]
pub struct Store {
    vars: HashMap<String, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.vars.get_mut(name)
    }

    /// Remove a variable, returning its value if it existed.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Iterate over all bindings in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut vars = Store::new();
        vars.set("title", Value::from("Intro"));
        assert_eq!(vars.get("title"), Some(&Value::from("Intro")));
    }

    #[test]
    fn overwrite_returns_previous() {
        let mut vars = Store::new();
        vars.set("x", Value::from(1.0));
        let old = vars.set("x", Value::from(2.0));
        assert_eq!(old, Some(Value::from(1.0)));
        assert_eq!(vars.get("x"), Some(&Value::from(2.0)));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn remove() {
        let mut vars = Store::new();
        vars.set("gone", Value::from("bye"));
        assert!(vars.remove("gone").is_some());
        assert_eq!(vars.get("gone"), None);
        assert!(vars.remove("gone").is_none()); // already gone
    }

    #[test]
    fn names_sorted() {
        let mut vars = Store::new();
        vars.set("b", Value::Null);
        vars.set("a", Value::Null);
        vars.set("c", Value::Null);
        assert_eq!(vars.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn shared_values_alias() {
        let mut exports = Store::new();
        exports.set("list", Value::from(vec![Value::from(1.0)]));
        let mut scope = Store::new();
        scope.set("list", exports.get("list").cloned().unwrap_or_default());
        match (exports.get("list"), scope.get("list")) {
            (Some(Value::Array(a)), Some(Value::Array(b))) => {
                assert!(std::rc::Rc::ptr_eq(a, b))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
