//! In-process document store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::trace;

use super::DocumentStore;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    failing: BTreeSet<String>,
    fail_after: Option<usize>,
    writes: usize,
    next_id: u64,
}

/// A document store kept in memory.
///
/// Writes can be made to fail per collection or after a number of
/// successful writes, which is how sync behaviour under outages is tested.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::internal("document store mutex poisoned"))
    }

    /// Reject every write to `collection` until [`Self::heal`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn fail_collection(&self, collection: &str) -> Result<()> {
        self.state()?.failing.insert(collection.to_string());
        Ok(())
    }

    /// Accept `n` more writes, then reject everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn fail_after(&self, n: usize) -> Result<()> {
        let mut state = self.state()?;
        state.fail_after = Some(state.writes + n);
        Ok(())
    }

    /// Clear all injected failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn heal(&self) -> Result<()> {
        let mut state = self.state()?;
        state.failing.clear();
        state.fail_after = None;
        Ok(())
    }

    /// Fetch one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    /// Every document in a collection, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn documents(&self, collection: &str) -> Result<Vec<Value>> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len))
    }

    /// Total acknowledged writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn write_count(&self) -> Result<usize> {
        Ok(self.state()?.writes)
    }

    fn write(&self, collection: &str, id: Option<&str>, document: &Value) -> Result<String> {
        let mut state = self.state()?;

        if state.failing.contains(collection)
            || state.fail_after.is_some_and(|limit| state.writes >= limit)
        {
            return Err(Error::remote(collection, "injected failure"));
        }

        let id = match id {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("doc-{:06}", state.next_id)
            }
        };

        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document.clone());
        state.writes += 1;
        trace!(collection, %id, "Stored document");
        Ok(id)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<()> {
        self.write(collection, Some(id), document).map(|_| ())
    }

    async fn add(&self, collection: &str, document: &Value) -> Result<String> {
        self.write(collection, None, document)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryDocumentStore::new();
        store.upsert("c", "1", &json!({"v": 1})).await.unwrap();
        store.upsert("c", "1", &json!({"v": 2})).await.unwrap();

        assert_eq!(store.count("c").unwrap(), 1);
        assert_eq!(store.document("c", "1").unwrap(), Some(json!({"v": 2})));
        assert_eq!(store.write_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_assigns_ids() {
        let store = MemoryDocumentStore::new();
        let a = store.add("c", &json!({"v": 1})).await.unwrap();
        let b = store.add("c", &json!({"v": 1})).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(store.documents("c").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_collection() {
        let store = MemoryDocumentStore::new();
        store.fail_collection("c").unwrap();

        let err = store.add("c", &json!({})).await.unwrap_err();
        assert!(err.is_remote_error());
        store.add("other", &json!({})).await.unwrap();

        store.heal().unwrap();
        store.add("c", &json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_after() {
        let store = MemoryDocumentStore::new();
        store.fail_after(2).unwrap();

        store.add("c", &json!({})).await.unwrap();
        store.add("c", &json!({})).await.unwrap();
        assert!(store.add("c", &json!({})).await.is_err());
        assert_eq!(store.count("c").unwrap(), 2);
    }
}
