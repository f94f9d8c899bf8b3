use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
}

/// Single-slot-per-key memo of upstream datasets with a fixed freshness window.
///
/// A failed load leaves the previous entry untouched. Concurrent cold callers
/// may each run their loader; the last one to finish wins the slot.
pub struct DatasetCache<V> {
    freshness: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> DatasetCache<V> {
    pub fn new(freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            freshness,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_load<F, Fut, E>(&self, key: &str, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let now = self.clock.now();
        {
            let guard = self.entries.read().await;
            if let Some(entry) = guard.get(key) {
                let age = (now - entry.fetched_at).to_std().unwrap_or_default();
                if age < self.freshness {
                    debug!(key, age_secs = age.as_secs(), "Dataset cache hit");
                    return Ok(entry.value.clone());
                }
                debug!(key, age_secs = age.as_secs(), "Dataset cache entry expired");
            } else {
                debug!(key, "Dataset cache miss");
            }
        }

        let value = loader().await?;
        let fetched_at = self.clock.now();
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                fetched_at,
            },
        );
        Ok(value)
    }

    #[cfg(test)]
    pub async fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.read().await.get(key).cloned()
    }
}
