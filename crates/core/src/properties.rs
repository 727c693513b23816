//! Copy-on-write property container.
//!
//! A [`PropertyStore`] is never mutated in place: [`PropertyStore::update`]
//! returns a new store and leaves the receiver untouched, so readers holding
//! a clone always see a complete snapshot. Clones are cheap (`Arc`).

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::fingerprint::canonical_json;

#[derive(Clone, Default)]
pub struct PropertyStore {
    inner: Arc<IndexMap<String, Value>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    /// Return a new store with `delta` shallow-merged on top of this one.
    pub fn update<I>(&self, delta: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut copy = IndexMap::clone(&self.inner);
        copy.extend(delta);
        Self {
            inner: Arc::new(copy),
        }
    }

    /// Owned JSON object with the same entries.
    pub fn to_map(&self) -> Map<String, Value> {
        self.inner
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }
}

impl PartialEq for PropertyStore {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner
    }
}

impl Eq for PropertyStore {}

impl Hash for PropertyStore {
    /// Order-independent: XOR of per-entry hashes.
    fn hash<H: Hasher>(&self, state: &mut H) {
        let combined = self.inner.iter().fold(0u64, |acc, (key, value)| {
            let mut entry = DefaultHasher::new();
            key.hash(&mut entry);
            canonical_json(value).hash(&mut entry);
            acc ^ entry.finish()
        });
        state.write_u64(combined);
    }
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl Serialize for PropertyStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl From<Map<String, Value>> for PropertyStore {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl FromIterator<(String, Value)> for PropertyStore {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            inner: Arc::new(iter.into_iter().collect()),
        }
    }
}

impl<'a> IntoIterator for &'a PropertyStore {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
