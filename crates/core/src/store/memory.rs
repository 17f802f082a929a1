//! In-memory store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};
use crate::Error;

/// Process-local store. Entries vanish when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, category: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(category.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, category: &str, key: &str, value: &str) -> Result<(), Error> {
        let entry = CacheEntry {
            category: category.to_string(),
            key: key.to_string(),
            contents: value.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.entries
            .write()
            .await
            .insert((category.to_string(), key.to_string()), entry);
        Ok(())
    }

    async fn remove(&self, category: &str, key: &str) -> Result<(), Error> {
        self.entries
            .write()
            .await
            .remove(&(category.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, category: Option<&str>) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        match category {
            Some(category) => entries.retain(|(c, _), _| c != category),
            None => entries.clear(),
        }
        Ok(())
    }
}
