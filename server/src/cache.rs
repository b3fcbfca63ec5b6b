use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::tensor::ImageTensor;

/// Live preview sources kept across all nodes.
pub const DEFAULT_CACHE_ENTRIES: usize = 10;

/// Key prefix shared by every entry a (workflow, node) pair has produced.
///
/// The trailing separator keeps node `1` from matching node `10`.
pub fn cache_prefix(workflow_id: &str, node_id: &str) -> String {
    format!("{}_{}_", workflow_id, node_id)
}

pub fn cache_key(workflow_id: &str, node_id: &str, version: &str) -> String {
    format!("{}{}", cache_prefix(workflow_id, node_id), version)
}

/// Most recent source image per node, bounded by insertion recency.
///
/// Store and evict happen under one lock, so a store is atomic with respect
/// to concurrent fetches and other stores.
pub struct PreviewCache {
    entries: Mutex<LruCache<String, Arc<ImageTensor>>>,
}

impl PreviewCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow!("preview cache capacity must be > 0"))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Keep a detached copy of `image` for this node and return its key.
    ///
    /// Every older entry of the same (workflow, node) is dropped first. If the
    /// cache is then over capacity, the least recently stored entry goes.
    pub fn store(
        &self,
        workflow_id: &str,
        node_id: &str,
        version: &str,
        image: &ImageTensor,
    ) -> String {
        let prefix = cache_prefix(workflow_id, node_id);
        let key = format!("{}{}", prefix, version);
        let value = Arc::new(image.clone());

        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            entries.pop(&k);
            debug!("preview cache pruned key={}", k);
        }
        if let Some((evicted, _)) = entries.push(key.clone(), value) {
            debug!("preview cache evicted key={}", evicted);
        }
        debug!("preview cache stored key={} entries={}", key, entries.len());
        key
    }

    /// Cached source image for `key`. Does not affect eviction order.
    pub fn fetch(&self, key: &str) -> Result<Arc<ImageTensor>> {
        self.entries.lock().peek(key).cloned().ok_or_else(|| {
            anyhow!(
                "No cached image available for key '{}'. Please run the node first.",
                key
            )
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    /// Keys from most to least recently stored.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }
}
