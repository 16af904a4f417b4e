//! Completion records.
//!
//! One boolean per `(slug, step)` plus one terminal flag per slug, written
//! through a string key-value backing (localStorage in the browser). Records
//! only ever move from absent to `true`.

use std::collections::HashMap;

use tracing::warn;

use crate::error::StoreError;

const TRUE: &str = "true";

/// Minimal string key-value medium.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Non-durable backing, used in tests and when localStorage is unavailable.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    items: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct CompletionStore<S> {
    namespace: String,
    backing: S,
}

impl<S: KeyValueStore> CompletionStore<S> {
    pub fn new(namespace: impl Into<String>, backing: S) -> Self {
        Self { namespace: namespace.into(), backing }
    }

    pub fn step_key(&self, slug: &str, index: usize) -> String {
        format!("{}:{}:step-{}", self.namespace, slug, index)
    }

    pub fn terminal_key(&self, slug: &str) -> String {
        format!("{}:{}:all-levels", self.namespace, slug)
    }

    /// Whether step `index` of `slug` is completed. Absent keys and backing
    /// failures both read as `false`.
    pub fn get(&self, slug: &str, index: usize) -> bool {
        self.read_flag(&self.step_key(slug, index))
    }

    pub fn set(&mut self, slug: &str, index: usize) -> Result<(), StoreError> {
        let key = self.step_key(slug, index);
        self.backing.set_item(&key, TRUE)
    }

    pub fn get_terminal(&self, slug: &str) -> bool {
        self.read_flag(&self.terminal_key(slug))
    }

    pub fn set_terminal(&mut self, slug: &str) -> Result<(), StoreError> {
        let key = self.terminal_key(slug);
        self.backing.set_item(&key, TRUE)
    }

    pub fn backing(&self) -> &S {
        &self.backing
    }

    fn read_flag(&self, key: &str) -> bool {
        match self.backing.get_item(key) {
            Ok(value) => value.as_deref() == Some(TRUE),
            Err(err) => {
                warn!(%key, error = %err, "completion read failed; treating as incomplete");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Read { key: key.to_string(), reason: "denied".into() })
        }
        fn set_item(&mut self, key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Write { key: key.to_string(), reason: "quota".into() })
        }
    }

    #[test]
    fn absent_step_reads_false() {
        let store = CompletionStore::new("ns", MemoryStore::new());
        assert!(!store.get("intro", 1));
        assert!(!store.get_terminal("intro"));
    }

    #[test]
    fn set_is_scoped_by_slug_and_index() {
        let mut store = CompletionStore::new("ns", MemoryStore::new());
        store.set("intro", 2).unwrap();
        assert!(store.get("intro", 2));
        assert!(!store.get("intro", 1));
        assert!(!store.get("other", 2));
        assert!(!store.get_terminal("intro"));
    }

    #[test]
    fn terminal_flag_is_separate() {
        let mut store = CompletionStore::new("ns", MemoryStore::new());
        store.set_terminal("intro").unwrap();
        assert!(store.get_terminal("intro"));
        assert!(!store.get("intro", 1));
    }

    #[test]
    fn keys_carry_namespace() {
        let mut store = CompletionStore::new("ns", MemoryStore::new());
        store.set("intro", 3).unwrap();
        assert_eq!(store.step_key("intro", 3), "ns:intro:step-3");
        assert_eq!(
            store.backing().get_item("ns:intro:step-3").unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn backing_failures_read_false_and_write_err() {
        let mut store = CompletionStore::new("ns", BrokenStore);
        assert!(!store.get("intro", 1));
        assert!(matches!(store.set("intro", 1), Err(StoreError::Write { .. })));
    }
}
