//! Compiled schema variants.
//!
//! A [`Schema`] is immutable and can be shared between threads; every
//! session it spawns gets its own [`ComponentManager`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::DynamicGrammarCache;
use crate::components::{EntityManager, GrammarSource};
use crate::error::LoadError;
use crate::error_handler::{Diagnostic, DiagnosticCollector, ErrorHandlerAdaptor};
use crate::grammar::{Grammar, GrammarKind, GrammarPool, SingleGrammarPool, XmlGrammarPool};
use crate::limits::ResourceLimits;
use crate::loader::{GrammarLoader, LoadContext};
use crate::registry::ComponentManager;
use crate::source::{Source, StreamSource};
use crate::validator::{Validator, ValidatorHandler};

/// Why a Dynamic grammar could not be fetched; shared by every session that
/// waited on the same load
#[derive(Debug)]
pub struct LoadFailure {
    pub cause: String,
    /// Reports the loader produced before giving up
    pub diagnostics: Vec<Diagnostic>,
}

/// Grammars discovered from schema location hints while validating
pub struct DynamicGrammars {
    cache: DynamicGrammarCache,
    loader: Arc<dyn GrammarLoader>,
}

impl DynamicGrammars {
    pub fn new(loader: Arc<dyn GrammarLoader>, max_capacity: u64, time_to_idle: Duration) -> Self {
        Self {
            cache: DynamicGrammarCache::new(max_capacity, time_to_idle),
            loader,
        }
    }

    pub fn cache(&self) -> &DynamicGrammarCache {
        &self.cache
    }

    /// Grammar for an absolute system id, loading it on first use.
    ///
    /// Only the session that performed the load receives its warnings; on
    /// failure every waiting session gets the same [`LoadFailure`].
    pub fn fetch(
        &self,
        system_id: &str,
        entity_manager: &EntityManager,
    ) -> Result<(Arc<Grammar>, Vec<Diagnostic>), Arc<LoadFailure>> {
        let mut warnings = Vec::new();
        let grammar = self
            .cache
            .get_or_load(system_id, || self.load(system_id, entity_manager, &mut warnings))?;
        Ok((grammar, warnings))
    }

    fn load(
        &self,
        system_id: &str,
        entity_manager: &EntityManager,
        warnings: &mut Vec<Diagnostic>,
    ) -> Result<Arc<Grammar>, LoadFailure> {
        let collector = Arc::new(DiagnosticCollector::new());
        let mut adaptor = ErrorHandlerAdaptor::new(Some(collector.clone()));
        let mut context = LoadContext::new(&mut adaptor);
        context.resolver = entity_manager.resolver().cloned();
        context.limits = entity_manager.limits().copied();

        let pool = XmlGrammarPool::new();
        let sources = [Source::Stream(StreamSource::from_system_id(system_id))];
        let result = self.loader.load_grammars(&sources, &pool, &mut context);

        let diagnostics: Vec<Diagnostic> = collector
            .reports()
            .into_iter()
            .map(|(severity, exception)| Diagnostic::new(severity, "schema-load", exception))
            .collect();

        let cause = match result {
            Ok(()) => match pool.retrieve_initial_grammar_set(GrammarKind::XmlSchema).pop() {
                Some(grammar) => {
                    debug!(system_id, "fetched dynamic grammar");
                    *warnings = diagnostics;
                    return Ok(grammar);
                }
                None => "the document produced no grammar".to_string(),
            },
            Err(LoadError::Reported(exception)) => exception.message,
            Err(LoadError::Handler(err)) => err.to_string(),
            Err(LoadError::Io(err)) => err.to_string(),
        };
        Err(LoadFailure { cause, diagnostics })
    }
}

impl fmt::Debug for DynamicGrammars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicGrammars")
            .field("cache", &self.cache)
            .field("loader", &self.loader)
            .finish()
    }
}

/// Representation chosen for a compiled schema
#[derive(Debug, Clone)]
pub enum SchemaVariant {
    /// No grammars: schema constraints always pass
    Empty,
    /// Exactly one top-level grammar
    Single(Arc<Grammar>),
    /// Several grammars behind a read-only pool
    Composite(Arc<dyn GrammarPool>),
    /// Grammars fetched lazily from location hints
    Dynamic(Arc<DynamicGrammars>),
}

impl SchemaVariant {
    pub fn name(&self) -> &'static str {
        match self {
            SchemaVariant::Empty => "Empty",
            SchemaVariant::Single(_) => "Single",
            SchemaVariant::Composite(_) => "Composite",
            SchemaVariant::Dynamic(_) => "Dynamic",
        }
    }
}

/// Immutable compiled schema
#[derive(Debug, Clone)]
pub struct Schema {
    variant: SchemaVariant,
    initial_limits: Option<ResourceLimits>,
}

impl Schema {
    pub(crate) fn new(variant: SchemaVariant, initial_limits: Option<ResourceLimits>) -> Self {
        Self {
            variant,
            initial_limits,
        }
    }

    pub fn variant(&self) -> &SchemaVariant {
        &self.variant
    }

    /// Whether validation is confined to the grammars compiled into this schema
    pub fn is_fully_composed(&self) -> bool {
        !matches!(self.variant, SchemaVariant::Dynamic(_))
    }

    /// Pool view handed to sessions; `None` for Empty and Dynamic
    pub fn grammar_pool(&self) -> Option<Arc<dyn GrammarPool>> {
        match &self.variant {
            SchemaVariant::Single(grammar) => Some(Arc::new(SingleGrammarPool::new(grammar.clone()))),
            SchemaVariant::Composite(pool) => Some(pool.clone()),
            SchemaVariant::Empty | SchemaVariant::Dynamic(_) => None,
        }
    }

    /// One-shot validation session
    pub fn new_validator(&self) -> Validator {
        Validator::new(self.component_manager())
    }

    /// Push-style validation session
    pub fn new_validator_handler(&self) -> ValidatorHandler {
        ValidatorHandler::new(self.component_manager())
    }

    fn component_manager(&self) -> ComponentManager {
        let source = match &self.variant {
            SchemaVariant::Empty => GrammarSource::None,
            SchemaVariant::Dynamic(dynamic) => GrammarSource::Dynamic(dynamic.clone()),
            SchemaVariant::Single(_) | SchemaVariant::Composite(_) => match self.grammar_pool() {
                Some(pool) => GrammarSource::Pool(pool),
                None => GrammarSource::None,
            },
        };
        ComponentManager::new(source, self.initial_limits)
    }
}
