use crate::app::ports::CacheTier;
use crate::error::{ProxyError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-process cache tier. Lost on restart.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ProxyError {
    ProxyError::Storage("memory cache lock poisoned".to_string())
}

#[async_trait]
impl CacheTier for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn put_if_newer(&self, entry: &CacheEntry) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        match entries.get(&entry.key) {
            Some(current) if current.written_at >= entry.written_at => Ok(false),
            _ => {
                entries.insert(entry.key.clone(), entry.clone());
                Ok(true)
            }
        }
    }
}
