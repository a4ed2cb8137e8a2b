//! Compiled grammars and the grammar pools that hold them.
//!
//! A pool is the capability `retrieve / cache / lock / clear`. While a factory
//! compiles, it owns an unlocked [`XmlGrammarPool`] exclusively; once a schema
//! is built the pool is locked and shared read-only between sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::Result;
use crate::error_handler::Diagnostic;

/// Kind of grammar held in a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarKind {
    XmlSchema,
    Dtd,
}

/// Identity of a grammar inside a pool: target namespace plus kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrammarDescription {
    pub namespace: Option<String>,
    pub kind: GrammarKind,
}

impl GrammarDescription {
    pub fn xml_schema(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            kind: GrammarKind::XmlSchema,
        }
    }
}

impl fmt::Display for GrammarDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{:?}({})", self.kind, ns),
            None => write!(f, "{:?}(no namespace)", self.kind),
        }
    }
}

/// Options handed to a schema model for one validation call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// System id of the instance, used for error locations and relative URIs
    pub system_id: Option<String>,
    pub allow_network: bool,
}

/// Opaque validation algorithm bound to a compiled grammar
pub trait SchemaModel: Send + Sync + fmt::Debug {
    /// Validate a serialized instance; every finding comes back as a diagnostic
    fn validate(&self, document: &[u8], options: &ValidateOptions) -> Result<Vec<Diagnostic>>;
}

/// One compiled schema document
#[derive(Debug)]
pub struct Grammar {
    pub description: GrammarDescription,
    pub system_id: Option<String>,
    pub model: Arc<dyn SchemaModel>,
}

impl Grammar {
    pub fn new(
        description: GrammarDescription,
        system_id: Option<String>,
        model: Arc<dyn SchemaModel>,
    ) -> Self {
        Self {
            description,
            system_id,
            model,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.description.namespace.as_deref()
    }
}

/// Cache of compiled grammars keyed by [`GrammarDescription`]
pub trait GrammarPool: Send + Sync + fmt::Debug {
    /// Every grammar of `kind` currently in the pool
    fn retrieve_initial_grammar_set(&self, kind: GrammarKind) -> Vec<Arc<Grammar>>;
    fn retrieve_grammar(&self, description: &GrammarDescription) -> Option<Arc<Grammar>>;
    /// Add grammars; ignored while the pool is locked
    fn cache_grammars(&self, kind: GrammarKind, grammars: Vec<Arc<Grammar>>);
    fn lock_pool(&self);
    fn unlock_pool(&self);
    fn clear(&self);
    fn is_locked(&self) -> bool;
}

/// Standard pool: a map guarded by a reader/writer lock, plus a lock flag
#[derive(Debug, Default)]
pub struct XmlGrammarPool {
    grammars: RwLock<HashMap<GrammarDescription, Arc<Grammar>>>,
    locked: AtomicBool,
}

impl XmlGrammarPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GrammarDescription, Arc<Grammar>>> {
        self.grammars.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<GrammarDescription, Arc<Grammar>>> {
        self.grammars.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl GrammarPool for XmlGrammarPool {
    fn retrieve_initial_grammar_set(&self, kind: GrammarKind) -> Vec<Arc<Grammar>> {
        self.read()
            .values()
            .filter(|g| g.description.kind == kind)
            .cloned()
            .collect()
    }

    fn retrieve_grammar(&self, description: &GrammarDescription) -> Option<Arc<Grammar>> {
        self.read().get(description).cloned()
    }

    fn cache_grammars(&self, kind: GrammarKind, grammars: Vec<Arc<Grammar>>) {
        if self.is_locked() {
            warn!(count = grammars.len(), "ignoring grammars cached into a locked pool");
            return;
        }
        let mut map = self.write();
        for grammar in grammars.into_iter().filter(|g| g.description.kind == kind) {
            debug!(grammar = %grammar.description, "caching grammar");
            map.insert(grammar.description.clone(), grammar);
        }
    }

    fn lock_pool(&self) {
        self.locked.store(true, Ordering::Release);
    }

    fn unlock_pool(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn clear(&self) {
        if self.is_locked() {
            warn!("ignoring clear of a locked pool");
            return;
        }
        self.write().clear();
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Read-only view over another pool; every mutation is a no-op
#[derive(Debug)]
pub struct ReadOnlyGrammarPool {
    inner: Arc<dyn GrammarPool>,
}

impl ReadOnlyGrammarPool {
    pub fn new(inner: Arc<dyn GrammarPool>) -> Self {
        Self { inner }
    }
}

impl GrammarPool for ReadOnlyGrammarPool {
    fn retrieve_initial_grammar_set(&self, kind: GrammarKind) -> Vec<Arc<Grammar>> {
        self.inner.retrieve_initial_grammar_set(kind)
    }

    fn retrieve_grammar(&self, description: &GrammarDescription) -> Option<Arc<Grammar>> {
        self.inner.retrieve_grammar(description)
    }

    fn cache_grammars(&self, _kind: GrammarKind, _grammars: Vec<Arc<Grammar>>) {}

    fn lock_pool(&self) {}

    fn unlock_pool(&self) {}

    fn clear(&self) {}

    fn is_locked(&self) -> bool {
        true
    }
}

/// Pool view holding exactly one grammar
#[derive(Debug)]
pub struct SingleGrammarPool {
    grammar: Arc<Grammar>,
}

impl SingleGrammarPool {
    pub fn new(grammar: Arc<Grammar>) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }
}

impl GrammarPool for SingleGrammarPool {
    fn retrieve_initial_grammar_set(&self, kind: GrammarKind) -> Vec<Arc<Grammar>> {
        if self.grammar.description.kind == kind {
            vec![self.grammar.clone()]
        } else {
            Vec::new()
        }
    }

    fn retrieve_grammar(&self, description: &GrammarDescription) -> Option<Arc<Grammar>> {
        (self.grammar.description == *description).then(|| self.grammar.clone())
    }

    fn cache_grammars(&self, _kind: GrammarKind, _grammars: Vec<Arc<Grammar>>) {}

    fn lock_pool(&self) {}

    fn unlock_pool(&self) {}

    fn clear(&self) {}

    fn is_locked(&self) -> bool {
        true
    }
}
