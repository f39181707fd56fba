//! Generation-scoped cache storage.
//!
//! A store holds named generations; each generation is an independent
//! key/value namespace of cache entries. Exactly one generation is current at
//! any time (tracked by the lifecycle manager); the rest exist only until the
//! next activation deletes them.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use super::entry::{CacheEntry, EntryKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid generation name `{name}`")]
    InvalidGeneration { name: String },
    #[error("corrupt cache entry `{id}`: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistent, namespaced byte store consumed by the cache subsystem.
///
/// This is the explicit handle threaded through every orchestrator call: an
/// `Arc<dyn CacheStore>` plus a generation name. Writes are idempotent
/// overwrites; concurrent writers to the same key race and the last one wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the generation namespace if absent. Idempotent.
    async fn open(&self, generation: &str) -> Result<(), StoreError>;

    /// Overwrite any existing entry for the key.
    async fn put(
        &self,
        generation: &str,
        key: &EntryKey,
        entry: CacheEntry,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        generation: &str,
        key: &EntryKey,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// All known generation names, sorted.
    async fn list_generations(&self) -> Result<Vec<String>, StoreError>;

    /// Remove the generation and all its entries. Deleting an absent
    /// generation succeeds.
    async fn delete_generation(&self, name: &str) -> Result<(), StoreError>;
}

type GenerationMap = HashMap<String, HashMap<EntryKey, CacheEntry>>;

/// In-memory store for tests and embedders that do not need persistence.
#[derive(Default)]
pub struct MemoryStore {
    generations: RwLock<GenerationMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, op: &'static str) -> RwLockReadGuard<'_, GenerationMap> {
        self.generations.read().unwrap_or_else(|poisoned| {
            warn!(op, "recovered from poisoned store lock; state may be stale");
            poisoned.into_inner()
        })
    }

    fn write(&self, op: &'static str) -> RwLockWriteGuard<'_, GenerationMap> {
        self.generations.write().unwrap_or_else(|poisoned| {
            warn!(op, "recovered from poisoned store lock; state may be stale");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, generation: &str) -> Result<(), StoreError> {
        self.write("open").entry(generation.to_string()).or_default();
        Ok(())
    }

    async fn put(
        &self,
        generation: &str,
        key: &EntryKey,
        entry: CacheEntry,
    ) -> Result<(), StoreError> {
        self.write("put")
            .entry(generation.to_string())
            .or_default()
            .insert(key.clone(), entry);
        Ok(())
    }

    async fn get(
        &self,
        generation: &str,
        key: &EntryKey,
    ) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self
            .read("get")
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn list_generations(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.read("list_generations").keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_generation(&self, name: &str) -> Result<(), StoreError> {
        self.write("delete_generation").remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use bytes::Bytes;
    use time::OffsetDateTime;

    use super::*;

    fn entry(body: &'static [u8]) -> CacheEntry {
        CacheEntry {
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::from_static(body),
            cached_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let store = MemoryStore::new();
        let key = EntryKey::get("https://example.com/app.js");

        store.open("v1").await.expect("open");
        store.put("v1", &key, entry(b"first")).await.expect("put");
        store.put("v1", &key, entry(b"second")).await.expect("put");

        let cached = store.get("v1", &key).await.expect("get").expect("entry");
        assert_eq!(cached.body, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn generations_are_isolated() {
        let store = MemoryStore::new();
        let key = EntryKey::get("https://example.com/app.js");

        store.put("v1", &key, entry(b"one")).await.expect("put");

        assert!(store.get("v2", &key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn list_and_delete_generations() {
        let store = MemoryStore::new();

        store.open("v2").await.expect("open");
        store.open("v1").await.expect("open");

        assert_eq!(
            store.list_generations().await.expect("list"),
            vec!["v1".to_string(), "v2".to_string()]
        );

        store.delete_generation("v1").await.expect("delete");
        assert_eq!(
            store.list_generations().await.expect("list"),
            vec!["v2".to_string()]
        );

        // Idempotent: deleting again succeeds.
        store.delete_generation("v1").await.expect("delete absent");
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let store = MemoryStore::new();
        let key = EntryKey::get("https://example.com/app.js");

        store.open("v1").await.expect("open");
        store.put("v1", &key, entry(b"kept")).await.expect("put");
        store.open("v1").await.expect("re-open");

        assert!(store.get("v1", &key).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let store = MemoryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .generations
                .write()
                .expect("lock should be acquired before poisoning");
            panic!("poison store lock");
        }));

        let key = EntryKey::get("https://example.com/app.js");
        store.put("v1", &key, entry(b"ok")).await.expect("put");
        assert!(store.get("v1", &key).await.expect("get").is_some());
    }
}
