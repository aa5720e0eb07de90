//! In-memory key-value map shared by the replayer and request handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::event::{Event, Mutation};

/// Thread-safe key-value store.
///
/// Reads share the lock; a put or delete holds it exclusively for a single
/// map operation. The store knows nothing about the transaction log: callers
/// mutate it first and record the mutation afterwards.
#[derive(Debug, Default)]
pub struct KvStore {
    data: RwLock<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a key-value pair, overwriting any existing value.
    pub fn put(&self, key: String, value: String) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Removes a key. Deleting an absent key is not an error; the return value
    /// only tells whether something was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Applies a replayed event.
    pub fn apply(&self, event: &Event) {
        match &event.mutation {
            Mutation::Put { key, value } => self.put(key.clone(), value.clone()),
            Mutation::Delete { key } => {
                self.delete(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of every pair; the lock is released before returning.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
