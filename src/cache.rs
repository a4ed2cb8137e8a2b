use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::debug;

use crate::grammar::Grammar;

/// Default number of grammars kept by a Dynamic schema
pub const DEFAULT_DYNAMIC_CAPACITY: u64 = 256;

/// Default idle period after which an unused grammar is evicted
pub const DEFAULT_DYNAMIC_IDLE: Duration = Duration::from_secs(600);

/// Grammar cache backing a Dynamic schema
///
/// Keys are absolute system ids. `moka` coalesces concurrent loads of the same
/// key, so a grammar is compiled once even when many sessions request it at
/// the same time, and no lock is held while a different key loads. Entries are
/// dropped after sitting idle or when the cache is over capacity.
#[derive(Clone)]
pub struct DynamicGrammarCache {
    cache: Cache<String, Arc<Grammar>>,
}

impl DynamicGrammarCache {
    pub fn new(max_capacity: u64, time_to_idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(time_to_idle)
            .build();

        Self { cache }
    }

    /// Get the grammar for `system_id`, or load it if missing.
    ///
    /// `loader` only runs when the key is absent; concurrent callers for the
    /// same key wait for the single leader and share its result. Failures are
    /// not cached.
    pub fn get_or_load<F, E>(&self, system_id: &str, loader: F) -> Result<Arc<Grammar>, Arc<E>>
    where
        F: FnOnce() -> Result<Arc<Grammar>, E>,
        E: Send + Sync + 'static,
    {
        self.cache.try_get_with(system_id.to_string(), || {
            debug!(system_id, "loading grammar into dynamic cache");
            loader()
        })
    }

    pub fn get(&self, system_id: &str) -> Option<Arc<Grammar>> {
        self.cache.get(system_id)
    }

    pub fn contains(&self, system_id: &str) -> bool {
        self.cache.contains_key(system_id)
    }

    /// Number of live entries after pending maintenance has run
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }
}

impl Default for DynamicGrammarCache {
    fn default() -> Self {
        Self::new(DEFAULT_DYNAMIC_CAPACITY, DEFAULT_DYNAMIC_IDLE)
    }
}

impl std::fmt::Debug for DynamicGrammarCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicGrammarCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
