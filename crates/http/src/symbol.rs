//! Name to tagged-value tables.
//!
//! Backs the per-request variables, session caches, users and roles. Keys are unique and
//! ordered, so iteration with [`SymbolTable::first`] and [`SymbolTable::next`] resumes after the
//! previous key and is unaffected by deleting other keys in between.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::ops::Bound;

/// A tagged symbol value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<S = ()> {
    String(String),
    Integer(i64),
    Symbol(S),
}

impl<S> Value<S> {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            Value::Symbol(_) => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&S> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol_mut(&mut self) -> Option<&mut S> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl<S> From<&str> for Value<S> {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl<S> From<String> for Value<S> {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<S> From<i64> for Value<S> {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl<S> fmt::Display for Value<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Symbol(_) => f.write_str("<symbol>"),
        }
    }
}

pub struct SymbolTable<S = ()> {
    entries: BTreeMap<String, Value<S>>,
}

impl<S> SymbolTable<S> {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or overwrites. The previous value, if any, is returned.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value<S>>) -> Option<Value<S>> {
        self.entries.insert(name.into(), value.into())
    }

    /// Inserts only when the name is not yet present.
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<Value<S>>) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_owned(), value.into());
        true
    }

    pub fn lookup<Q>(&self, name: &Q) -> Option<&Value<S>>
    where
        String: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(name)
    }

    pub fn lookup_mut<Q>(&mut self, name: &Q) -> Option<&mut Value<S>>
    where
        String: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get_mut(name)
    }

    /// String view of a value. Integers are not converted.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.lookup(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn delete(&mut self, name: &str) -> Option<Value<S>> {
        self.entries.remove(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The first entry in key order.
    pub fn first(&self) -> Option<(&str, &Value<S>)> {
        self.entries.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// The entry that follows `after` in key order, whether or not `after` still exists.
    pub fn next(&self, after: &str) -> Option<(&str, &Value<S>)> {
        self.entries
            .range::<str, _>((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value<S>> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, Value<S>> {
        self.entries.iter_mut()
    }

    /// Removes every entry for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &mut Value<S>) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }
}

impl<S> Default for SymbolTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: fmt::Debug> fmt::Debug for SymbolTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<S: Clone> Clone for SymbolTable<S> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overwrites() {
        let mut table: SymbolTable = SymbolTable::new();
        assert!(table.set("name", "a").is_none());
        assert_eq!(table.set("name", "b"), Some(Value::String("a".into())));
        assert_eq!(table.get_str("name"), Some("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_tagged_values() {
        let mut table: SymbolTable<Vec<u8>> = SymbolTable::new();
        table.set("count", 3i64);
        table.set("blob", Value::Symbol(vec![1, 2]));
        assert_eq!(table.lookup("count").and_then(Value::as_integer), Some(3));
        assert_eq!(table.lookup("blob").and_then(Value::as_symbol), Some(&vec![1, 2]));
        assert_eq!(table.get_str("count"), None);
    }

    #[test]
    fn test_iteration_survives_deleting_other_keys() {
        let mut table: SymbolTable = SymbolTable::new();
        for name in ["a", "b", "c", "d"] {
            table.set(name, name);
        }

        let mut seen = Vec::new();
        let mut cursor = table.first().map(|(k, _)| k.to_owned());
        while let Some(key) = cursor {
            if key == "a" {
                table.delete("c");
            }
            seen.push(key.clone());
            cursor = table.next(&key).map(|(k, _)| k.to_owned());
        }
        assert_eq!(seen, ["a", "b", "d"]);
    }

    #[test]
    fn test_next_after_deleted_key() {
        let mut table: SymbolTable = SymbolTable::new();
        table.set("a", 1i64);
        table.set("b", 2i64);
        table.set("c", 3i64);
        table.delete("b");
        assert_eq!(table.next("b").map(|(k, _)| k), Some("c"));
        assert!(table.next("c").is_none());
    }

    #[test]
    fn test_set_if_absent() {
        let mut table: SymbolTable = SymbolTable::new();
        assert!(table.set_if_absent("x", "1"));
        assert!(!table.set_if_absent("x", "2"));
        assert_eq!(table.get_str("x"), Some("1"));
    }
}
