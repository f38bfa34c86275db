use chrono::{DateTime, Utc};
use lru::LruCache;
use queue_worker_core::WorkflowHandler;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A cached workflow run
#[derive(Clone)]
pub struct CachedRun {
    pub handler: Arc<dyn WorkflowHandler>,
    pub started_at: DateTime<Utc>,
}

/// Sticky cache of workflow runs keyed by run id, evicting the least recently used.
///
/// A capacity of 0 disables caching.
pub struct WorkflowCache {
    runs: Option<LruCache<String, CachedRun>>,
}

impl WorkflowCache {
    pub fn new(capacity: usize) -> Self {
        WorkflowCache {
            runs: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn get(&mut self, run_id: &str) -> Option<CachedRun> {
        self.runs.as_mut()?.get(run_id).cloned()
    }

    /// Insert a run, returning the id of the evicted run if any
    pub fn insert(&mut self, run_id: String, run: CachedRun) -> Option<String> {
        let runs = self.runs.as_mut()?;
        match runs.push(run_id.clone(), run) {
            // `push` hands back the old entry when the key was already cached
            Some((id, _)) if id != run_id => Some(id),
            _ => None,
        }
    }

    pub fn remove(&mut self, run_id: &str) -> Option<CachedRun> {
        self.runs.as_mut()?.pop(run_id)
    }

    pub fn len(&self) -> usize {
        self.runs.as_ref().map_or(0, |runs| runs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
