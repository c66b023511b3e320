//! Run-scoped variable store.
//!
//! Each run owns one store. It maps `sourceName.field` (and the reserved
//! `startinput` key) to the current value and keeps the snapshot it was
//! seeded from. Values are also tracked per identity triple, so canonical
//! tokens and short-id display tokens never read another variable's value
//! when two variables share a source name and field.

use crate::snapshot::{VariableLookup, VariableSnapshot};
use crate::variable::VariableKey;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// Reserved key holding the user-provided start input.
pub const START_INPUT_KEY: &str = "startinput";

/// Mutable key/value store owned by a single run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableStore {
    values: BTreeMap<String, String>,
    /// Run writes to store keys owned by exactly one snapshot variable.
    #[serde(skip)]
    identities: HashMap<VariableKey, String>,
    #[serde(skip)]
    snapshot: VariableSnapshot,
}

impl VariableStore {
    /// Seeds a store from persisted variables plus the start input.
    ///
    /// When several variables share a store key, the first in snapshot order
    /// owns the bare key.
    #[must_use]
    pub fn seed(snapshot: VariableSnapshot, start_input: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        for variable in snapshot.iter() {
            match values.entry(variable.store_key()) {
                Entry::Vacant(slot) => {
                    slot.insert(variable.value_or_empty().to_string());
                }
                Entry::Occupied(slot) => {
                    tracing::warn!(
                        key = %slot.key(),
                        variable = %variable.key(),
                        "store key is shared by several variables, the first one owns it"
                    );
                }
            }
        }
        values.insert(START_INPUT_KEY.to_string(), start_input.into());
        Self {
            values,
            identities: HashMap::new(),
            snapshot,
        }
    }

    /// Returns the current value of a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Writes a value, returning the previous one.
    ///
    /// If exactly one snapshot variable has this store key, its identity sees
    /// the write too. A shared key only changes the bare key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.sole_owner(&key) {
            Some(identity) => {
                self.identities.insert(identity, value.clone());
            }
            None if self.snapshot.iter().any(|v| v.store_key() == key) => {
                tracing::debug!(key = %key, "write to a shared store key is not bound to any identity");
            }
            None => {}
        }
        self.values.insert(key, value)
    }

    /// Returns the start input.
    #[must_use]
    pub fn start_input(&self) -> &str {
        self.get(START_INPUT_KEY).unwrap_or_default()
    }

    /// The snapshot this store was seeded from.
    #[must_use]
    pub fn snapshot(&self) -> &VariableSnapshot {
        &self.snapshot
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn sole_owner(&self, store_key: &str) -> Option<VariableKey> {
        let mut owners = self.snapshot.iter().filter(|v| v.store_key() == store_key);
        let owner = owners.next()?;
        owners.next().is_none().then(|| owner.key())
    }
}

impl VariableLookup for VariableStore {
    fn lookup_key(&self, key: &VariableKey) -> Option<String> {
        if let Some(value) = self.identities.get(key) {
            return Some(value.clone());
        }
        self.snapshot.lookup_key(key)
    }

    fn lookup_named(&self, source_name: &str, field: &str, short_id: Option<&str>) -> Option<String> {
        if let Some(short_id) = short_id
            && let Some(variable) = self.snapshot.find_by_short_id(source_name, field, short_id)
        {
            return self.lookup_key(&variable.key());
        }
        if let Some(value) = self.get(&format!("{source_name}.{field}")) {
            return Some(value.to_string());
        }
        self.snapshot.lookup_named(source_name, field, short_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use crate::variable::{SourceType, Variable};

    fn store() -> VariableStore {
        let snapshot = VariableSnapshot::new([
            Variable::new(SourceType::Custom, "abcd", "name", "Hero").with_value("World"),
            Variable::new(SourceType::Task, "t1", "output", "Summarize"),
        ]);
        VariableStore::seed(snapshot, "go")
    }

    #[test]
    fn seeds_store_keys_and_start_input() {
        let store = store();
        assert_eq!(store.get("Hero.name"), Some("World"));
        assert_eq!(store.get("Summarize.output"), Some(""));
        assert_eq!(store.start_input(), "go");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn canonical_lookup_sees_run_writes() {
        let mut store = store();
        let key = VariableKey::new(SourceType::Custom, "abcd", "name");
        assert_eq!(store.lookup_key(&key).as_deref(), Some("World"));

        let previous = store.set("Hero.name", "Moon");
        assert_eq!(previous.as_deref(), Some("World"));
        assert_eq!(store.lookup_key(&key).as_deref(), Some("Moon"));
    }

    #[test]
    fn named_lookup_uses_store_keys_first() {
        let mut store = store();
        store.set("Scratch.note", "remember");
        assert_eq!(store.lookup_named("Scratch", "note", None).as_deref(), Some("remember"));
        assert_eq!(store.lookup_named("Hero", "name", None).as_deref(), Some("World"));
        assert!(store.lookup_named("Nobody", "name", None).is_none());
    }

    fn namesakes() -> VariableStore {
        let snapshot = VariableSnapshot::new([
            Variable::new(SourceType::Npc, "aaaa1", "mood", "Alice").with_value("happy"),
            Variable::new(SourceType::Npc, "bbbb2", "mood", "Alice").with_value("grumpy"),
        ]);
        VariableStore::seed(snapshot, "")
    }

    #[test]
    fn shared_names_resolve_by_identity() {
        let store = namesakes();
        let resolver = Resolver::default();
        assert_eq!(resolver.resolve_text("@gv_npc_aaaa1_mood-=", &store), "happy");
        assert_eq!(resolver.resolve_text("@gv_npc_bbbb2_mood-=", &store), "grumpy");
        assert_eq!(resolver.resolve_text("@Alice.mood#aaaa", &store), "happy");
        assert_eq!(resolver.resolve_text("@Alice.mood#bbbb", &store), "grumpy");
        assert_eq!(store.get("Alice.mood"), Some("happy"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn write_to_shared_key_leaves_identities_alone() {
        let mut store = namesakes();
        store.set("Alice.mood", "sleepy");

        assert_eq!(store.lookup_named("Alice", "mood", None).as_deref(), Some("sleepy"));
        let first = VariableKey::new(SourceType::Npc, "aaaa1", "mood");
        let second = VariableKey::new(SourceType::Npc, "bbbb2", "mood");
        assert_eq!(store.lookup_key(&first).as_deref(), Some("happy"));
        assert_eq!(store.lookup_key(&second).as_deref(), Some("grumpy"));
    }

    #[test]
    fn write_to_owned_key_reaches_short_id_tokens() {
        let mut store = store();
        store.set("Hero.name", "Moon");
        assert_eq!(store.lookup_named("Hero", "name", Some("abcd")).as_deref(), Some("Moon"));
    }

    #[test]
    fn independent_stores_do_not_share_writes() {
        let mut first = store();
        let second = store();
        first.set("Hero.name", "Changed");
        assert_eq!(second.get("Hero.name"), Some("World"));
    }
}
