//! Indirection cell exposing the pool being built to the grammar loader.

use std::sync::{Arc, RwLock};

use crate::grammar::{Grammar, GrammarDescription, GrammarKind, GrammarPool};

/// Holds the pool of the compilation in flight, if any.
///
/// Every pool operation delegates to the installed pool and degrades to a
/// no-op (or an empty answer) when nothing is installed, so a loader that
/// outlives its compilation cannot reach the pool any more.
#[derive(Debug, Default)]
pub struct GrammarPoolWrapper {
    current: RwLock<Option<Arc<dyn GrammarPool>>>,
}

impl GrammarPoolWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `pool` for the lifetime of the returned guard
    pub fn install(&self, pool: Arc<dyn GrammarPool>) -> InstalledPool<'_> {
        *self.slot_mut() = Some(pool);
        InstalledPool { wrapper: self }
    }

    /// Currently installed pool
    pub fn current(&self) -> Option<Arc<dyn GrammarPool>> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn has_active_pool(&self) -> bool {
        self.current().is_some()
    }

    fn slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<dyn GrammarPool>>> {
        self.current.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Clears the wrapper on drop, on success and failure paths alike
#[must_use = "the pool is uninstalled as soon as the guard is dropped"]
pub struct InstalledPool<'a> {
    wrapper: &'a GrammarPoolWrapper,
}

impl InstalledPool<'_> {
    pub fn wrapper(&self) -> &GrammarPoolWrapper {
        self.wrapper
    }
}

impl Drop for InstalledPool<'_> {
    fn drop(&mut self) {
        *self.wrapper.slot_mut() = None;
    }
}

impl GrammarPool for GrammarPoolWrapper {
    fn retrieve_initial_grammar_set(&self, kind: GrammarKind) -> Vec<Arc<Grammar>> {
        self.current()
            .map(|p| p.retrieve_initial_grammar_set(kind))
            .unwrap_or_default()
    }

    fn retrieve_grammar(&self, description: &GrammarDescription) -> Option<Arc<Grammar>> {
        self.current()?.retrieve_grammar(description)
    }

    fn cache_grammars(&self, kind: GrammarKind, grammars: Vec<Arc<Grammar>>) {
        if let Some(pool) = self.current() {
            pool.cache_grammars(kind, grammars);
        }
    }

    fn lock_pool(&self) {
        if let Some(pool) = self.current() {
            pool.lock_pool();
        }
    }

    fn unlock_pool(&self) {
        if let Some(pool) = self.current() {
            pool.unlock_pool();
        }
    }

    fn clear(&self) {
        if let Some(pool) = self.current() {
            pool.clear();
        }
    }

    fn is_locked(&self) -> bool {
        self.current().is_some_and(|p| p.is_locked())
    }
}
