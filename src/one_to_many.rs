// ===============================
// src/one_to_many.rs
// ===============================
//
// Bimap used for pending-request bookkeeping: every key (an order id)
// maps to a set of values (in-flight request ids) and every value maps
// back to its key. Removing a key cascades over all of its values;
// removing a value touches only that value.
//
use ahash::AHashMap as HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug, Clone, Default)]
pub struct OneToMany<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Eq + Hash + Clone + Debug,
{
    key_to_values: HashMap<K, HashSet<V>>,
    value_to_key: HashMap<V, K>,
}

impl<K, V> OneToMany<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self {
            key_to_values: HashMap::new(),
            value_to_key: HashMap::new(),
        }
    }

    /// Associate `value` with `key`. A value belongs to at most one key
    /// at a time; re-inserting a live value under a different key first
    /// detaches it from its old key.
    pub fn insert(&mut self, key: K, value: V) {
        if self.value_to_key.contains_key(&value) {
            self.remove_value(&value);
        }
        self.key_to_values
            .entry(key.clone())
            .or_default()
            .insert(value.clone());
        self.value_to_key.insert(value, key);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.key_to_values.contains_key(key)
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.value_to_key.contains_key(value)
    }

    pub fn key_of(&self, value: &V) -> Option<&K> {
        self.value_to_key.get(value)
    }

    pub fn values_of(&self, key: &K) -> Option<&HashSet<V>> {
        self.key_to_values.get(key)
    }

    /// Remove a single value, leaving any sibling values of the same key
    /// in place. Returns the key it belonged to, if any.
    pub fn remove_value(&mut self, value: &V) -> Option<K> {
        let key = self.value_to_key.remove(value)?;
        if let Some(set) = self.key_to_values.get_mut(&key) {
            set.remove(value);
            if set.is_empty() {
                self.key_to_values.remove(&key);
            }
        }
        Some(key)
    }

    /// Remove a key and all of its values, clearing the reverse entries
    /// too. Returns the removed value set, if the key was present.
    pub fn remove_key(&mut self, key: &K) -> Option<HashSet<V>> {
        let values = self.key_to_values.remove(key)?;
        for v in &values {
            self.value_to_key.remove(v);
        }
        Some(values)
    }

    pub fn is_empty(&self) -> bool {
        self.value_to_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.value_to_key.len()
    }

    pub fn dbg_string(&self) -> String {
        format!("k2v: {:?}, v2k: {:?}", self.key_to_values, self.value_to_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut m: OneToMany<u32, u32> = OneToMany::new();
        m.insert(1, 10);
        m.insert(1, 11);
        m.insert(2, 20);
        assert!(m.contains_key(&1));
        assert!(m.contains_value(&11));
        assert_eq!(m.key_of(&20), Some(&2));
        assert_eq!(m.values_of(&1).unwrap().len(), 2);
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn remove_value_leaves_siblings() {
        let mut m: OneToMany<u32, u32> = OneToMany::new();
        m.insert(1, 10);
        m.insert(1, 11);
        assert_eq!(m.remove_value(&10), Some(1));
        assert!(!m.contains_value(&10));
        assert!(m.contains_value(&11));
        assert!(m.contains_key(&1));
    }

    #[test]
    fn remove_key_cascades() {
        let mut m: OneToMany<u32, u32> = OneToMany::new();
        m.insert(1, 10);
        m.insert(1, 11);
        m.insert(2, 20);
        let removed = m.remove_key(&1).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!m.contains_value(&10));
        assert!(!m.contains_value(&11));
        assert!(m.contains_value(&20));
        assert!(!m.contains_key(&1));
    }

    #[test]
    fn removing_last_value_drops_key() {
        let mut m: OneToMany<u32, u32> = OneToMany::new();
        m.insert(1, 10);
        m.remove_value(&10);
        assert!(!m.contains_key(&1));
        assert!(m.is_empty());
    }

    #[test]
    fn reinsert_moves_value_between_keys() {
        let mut m: OneToMany<u32, u32> = OneToMany::new();
        m.insert(1, 10);
        m.insert(2, 10);
        assert_eq!(m.key_of(&10), Some(&2));
        assert!(!m.contains_key(&1));
        assert_eq!(m.len(), 1);
    }
}
