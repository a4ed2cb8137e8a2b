//! Schema factory: compiles schema sources and picks a schema variant.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{DEFAULT_DYNAMIC_CAPACITY, DEFAULT_DYNAMIC_IDLE};
use crate::constants::{
    CONTINUE_AFTER_FATAL_ERROR, ENTITY_RESOLVER, ERROR_HANDLER, SCHEMA_FULL_CHECKING,
    SECURE_PROCESSING, SECURITY_MANAGER, XML_SCHEMA_DOMAIN, XMLGRAMMAR_POOL,
};
use crate::error::{ConfigurationError, LoadError, Result, SchemaError, SchemaParseException};
use crate::error_handler::{ErrorHandler, ErrorHandlerAdaptor};
use crate::grammar::{GrammarKind, GrammarPool, ReadOnlyGrammarPool, XmlGrammarPool};
use crate::limits::ResourceLimits;
use crate::loader::{GrammarLoader, LoadContext, Xml2GrammarLoader};
use crate::pool_wrapper::GrammarPoolWrapper;
use crate::registry::PropertyValue;
use crate::schema::{DynamicGrammars, Schema, SchemaVariant};
use crate::source::{ResourceResolver, Source};

const FACTORY_FEATURES: [&str; 2] = [SCHEMA_FULL_CHECKING, CONTINUE_AFTER_FATAL_ERROR];

/// Builds [`Schema`]s.
///
/// Compilation goes through `&mut self`, so one factory never runs two
/// compilations at once; use one factory per thread for parallel compiles.
pub struct SchemaFactory {
    loader: Arc<dyn GrammarLoader>,
    pool_wrapper: GrammarPoolWrapper,
    features: HashMap<String, bool>,
    limits: Option<ResourceLimits>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    dynamic_capacity: u64,
    dynamic_idle: Duration,
}

impl SchemaFactory {
    /// Factory backed by libxml2
    pub fn new() -> Self {
        Self::with_loader(Arc::new(Xml2GrammarLoader::new()))
    }

    pub fn with_loader(loader: Arc<dyn GrammarLoader>) -> Self {
        let features = FACTORY_FEATURES
            .iter()
            .map(|id| (id.to_string(), false))
            .collect();
        Self {
            loader,
            pool_wrapper: GrammarPoolWrapper::new(),
            features,
            limits: None,
            error_handler: None,
            resolver: None,
            dynamic_capacity: DEFAULT_DYNAMIC_CAPACITY,
            dynamic_idle: DEFAULT_DYNAMIC_IDLE,
        }
    }

    /// Compile `sources` into a schema.
    ///
    /// Sources are checked up front; nothing is loaded if one is rejected.
    pub fn compile(&mut self, sources: &[Source]) -> Result<Schema> {
        for (index, source) in sources.iter().enumerate() {
            check_source(index, source)?;
        }

        let pool = Arc::new(XmlGrammarPool::new());
        let mut adaptor = ErrorHandlerAdaptor::new(self.error_handler.clone());
        let outcome = {
            let installed = self.pool_wrapper.install(pool.clone());
            let mut context = LoadContext::new(&mut adaptor);
            context.resolver = self.resolver.clone();
            context.limits = self.limits;
            context.features = self.features.clone();
            self.loader
                .load_grammars(sources, installed.wrapper(), &mut context)
        };

        match outcome {
            Ok(()) => {}
            Err(LoadError::Reported(exception)) => return Err(SchemaError::Parse(exception)),
            Err(LoadError::Handler(err)) => return Err(err.into()),
            Err(LoadError::Io(err)) => {
                let exception = SchemaParseException::new(format!(
                    "schema_reference.4: Failed to read schema document: {}",
                    err
                ));
                adaptor.error(XML_SCHEMA_DOMAIN, "schema_reference.4", &exception)?;
                return Err(SchemaError::Io(err));
            }
        }

        let mut grammars = pool.retrieve_initial_grammar_set(GrammarKind::XmlSchema);
        let count = grammars.len();
        pool.lock_pool();
        let variant = match count {
            0 => SchemaVariant::Empty,
            1 => SchemaVariant::Single(grammars.remove(0)),
            _ => SchemaVariant::Composite(Arc::new(ReadOnlyGrammarPool::new(pool))),
        };
        info!(
            sources = sources.len(),
            grammars = count,
            variant = variant.name(),
            "compiled schema"
        );
        Ok(Schema::new(variant, self.limits))
    }

    /// Schema whose grammars are found through location hints while
    /// validating. Never touches the pool wrapper.
    pub fn compile_none(&self) -> Schema {
        debug!("creating dynamic schema");
        let dynamic = DynamicGrammars::new(
            self.loader.clone(),
            self.dynamic_capacity,
            self.dynamic_idle,
        );
        Schema::new(SchemaVariant::Dynamic(Arc::new(dynamic)), self.limits)
    }

    pub fn get_feature(&self, id: &str) -> Result<bool> {
        if id == SECURE_PROCESSING {
            return Ok(self.limits.is_some());
        }
        self.features
            .get(id)
            .copied()
            .ok_or_else(|| ConfigurationError::feature_not_recognized(id).into())
    }

    pub fn set_feature(&mut self, id: &str, value: bool) -> Result<()> {
        if id == SECURE_PROCESSING {
            self.limits = value.then(ResourceLimits::secure);
            return Ok(());
        }
        match self.features.get_mut(id) {
            Some(current) => {
                *current = value;
                Ok(())
            }
            None => Err(ConfigurationError::feature_not_recognized(id).into()),
        }
    }

    pub fn get_property(&self, id: &str) -> Result<Option<PropertyValue>> {
        match id {
            XMLGRAMMAR_POOL => Err(ConfigurationError::property_not_supported(id).into()),
            SECURITY_MANAGER => Ok(self.limits.map(PropertyValue::Limits)),
            ERROR_HANDLER => Ok(self.error_handler.clone().map(PropertyValue::ErrorHandler)),
            ENTITY_RESOLVER => Ok(self.resolver.clone().map(PropertyValue::ResourceResolver)),
            _ => Err(ConfigurationError::property_not_recognized(id).into()),
        }
    }

    pub fn set_property(&mut self, id: &str, value: Option<PropertyValue>) -> Result<()> {
        match (id, value) {
            (XMLGRAMMAR_POOL, _) => Err(ConfigurationError::property_not_supported(id).into()),
            (SECURITY_MANAGER, Some(PropertyValue::Limits(limits))) => {
                self.limits = Some(limits);
                Ok(())
            }
            (SECURITY_MANAGER, None) => {
                self.limits = None;
                Ok(())
            }
            (ERROR_HANDLER, Some(PropertyValue::ErrorHandler(handler))) => {
                self.error_handler = Some(handler);
                Ok(())
            }
            (ERROR_HANDLER, None) => {
                self.error_handler = None;
                Ok(())
            }
            (ENTITY_RESOLVER, Some(PropertyValue::ResourceResolver(resolver))) => {
                self.resolver = Some(resolver);
                Ok(())
            }
            (ENTITY_RESOLVER, None) => {
                self.resolver = None;
                Ok(())
            }
            (SECURITY_MANAGER | ERROR_HANDLER | ENTITY_RESOLVER, Some(_)) => {
                Err(ConfigurationError::property_not_supported(id).into())
            }
            _ => Err(ConfigurationError::property_not_recognized(id).into()),
        }
    }

    pub fn set_error_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) {
        self.error_handler = handler;
    }

    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    pub fn set_resource_resolver(&mut self, resolver: Option<Arc<dyn ResourceResolver>>) {
        self.resolver = resolver;
    }

    pub fn resource_resolver(&self) -> Option<&Arc<dyn ResourceResolver>> {
        self.resolver.as_ref()
    }

    /// Resource limits applied while compiling and inherited by sessions
    pub fn set_limits(&mut self, limits: Option<ResourceLimits>) {
        self.limits = limits;
    }

    pub fn limits(&self) -> Option<&ResourceLimits> {
        self.limits.as_ref()
    }

    /// Bounds of the grammar cache of schemas built by [`compile_none`](Self::compile_none)
    pub fn set_dynamic_cache(&mut self, max_capacity: u64, time_to_idle: Duration) {
        self.dynamic_capacity = max_capacity;
        self.dynamic_idle = time_to_idle;
    }

    pub fn pool_wrapper(&self) -> &GrammarPoolWrapper {
        &self.pool_wrapper
    }
}

impl Default for SchemaFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemaFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaFactory")
            .field("loader", &self.loader)
            .field("features", &self.features)
            .field("limits", &self.limits)
            .field("error_handler", &self.error_handler.is_some())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

fn check_source(index: usize, source: &Source) -> Result<()> {
    let reason = match source {
        Source::Stream(stream) if stream.is_blank() => {
            "source has neither content nor a system id"
        }
        Source::Pull(_) => "pull sources cannot be compiled",
        _ => return Ok(()),
    };
    Err(SchemaError::UnsupportedSource {
        index,
        kind: source.kind(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationErrorKind;
    use crate::error_handler::{DiagnosticCollector, Severity};
    use crate::events::VecEventReader;
    use crate::grammar::tests::grammar;
    use crate::source::{PullSource, StreamSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loader caching a fixed number of grammars
    #[derive(Debug)]
    struct FixedLoader {
        namespaces: Vec<Option<&'static str>>,
        calls: AtomicUsize,
    }

    impl FixedLoader {
        fn new(namespaces: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                namespaces,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl GrammarLoader for FixedLoader {
        fn load_grammars(
            &self,
            _sources: &[Source],
            pool: &dyn GrammarPool,
            _context: &mut LoadContext<'_>,
        ) -> std::result::Result<(), LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let grammars = self.namespaces.iter().map(|ns| grammar(*ns)).collect();
            pool.cache_grammars(GrammarKind::XmlSchema, grammars);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct MissingFileLoader;

    impl GrammarLoader for MissingFileLoader {
        fn load_grammars(
            &self,
            _sources: &[Source],
            _pool: &dyn GrammarPool,
            _context: &mut LoadContext<'_>,
        ) -> std::result::Result<(), LoadError> {
            Err(LoadError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "missing.xsd",
            )))
        }
    }

    fn text_source() -> Vec<Source> {
        vec![Source::Stream(StreamSource::from_text("<xs:schema/>"))]
    }

    #[test]
    fn test_variant_follows_grammar_count() {
        let cases = [
            (vec![], "Empty"),
            (vec![Some("urn:a")], "Single"),
            (vec![Some("urn:a"), None], "Composite"),
        ];
        for (namespaces, expected) in cases {
            let mut factory = SchemaFactory::with_loader(FixedLoader::new(namespaces));
            let schema = factory.compile(&text_source()).unwrap();
            assert_eq!(schema.variant().name(), expected);
            assert!(schema.is_fully_composed());
            if let Some(pool) = schema.grammar_pool() {
                assert!(pool.is_locked());
            }
        }
    }

    #[test]
    fn test_compile_none_skips_loader() {
        let loader = FixedLoader::new(vec![Some("urn:a")]);
        let factory = SchemaFactory::with_loader(loader.clone());
        let schema = factory.compile_none();

        assert_eq!(schema.variant().name(), "Dynamic");
        assert!(!schema.is_fully_composed());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert!(!factory.pool_wrapper().has_active_pool());
    }

    #[test]
    fn test_rejects_sources_before_loading() {
        let loader = FixedLoader::new(vec![Some("urn:a")]);
        let mut factory = SchemaFactory::with_loader(loader.clone());
        let sources = vec![
            Source::Stream(StreamSource::from_text("<xs:schema/>")),
            Source::Pull(PullSource::new(VecEventReader::new(Vec::new()))),
        ];

        match factory.compile(&sources) {
            Err(SchemaError::UnsupportedSource { index, kind, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(kind, "PullSource");
            }
            other => panic!("Expected UnsupportedSource, got {:?}", other),
        }

        let blank = vec![Source::Stream(StreamSource::default())];
        assert!(matches!(
            factory.compile(&blank),
            Err(SchemaError::UnsupportedSource { index: 0, .. })
        ));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_io_failure_reported_once() {
        let collector = Arc::new(DiagnosticCollector::new());
        let mut factory = SchemaFactory::with_loader(Arc::new(MissingFileLoader));
        factory.set_error_handler(Some(collector.clone()));

        match factory.compile(&text_source()) {
            Err(SchemaError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("Expected Io error, got {:?}", other),
        }
        assert_eq!(collector.count(Severity::Error), 1);
        assert!(!factory.pool_wrapper().has_active_pool());
    }

    #[test]
    fn test_io_failure_without_handler_aborts_in_handler() {
        let mut factory = SchemaFactory::with_loader(Arc::new(MissingFileLoader));
        assert!(matches!(
            factory.compile(&text_source()),
            Err(SchemaError::Handler(_))
        ));
    }

    #[test]
    fn test_feature_surface() {
        let mut factory = SchemaFactory::with_loader(FixedLoader::new(vec![]));
        assert!(!factory.get_feature(SECURE_PROCESSING).unwrap());

        factory.set_feature(SECURE_PROCESSING, true).unwrap();
        assert_eq!(factory.limits(), Some(&ResourceLimits::secure()));
        factory.set_feature(SCHEMA_FULL_CHECKING, true).unwrap();
        assert!(factory.get_feature(SCHEMA_FULL_CHECKING).unwrap());

        factory.set_feature(SECURE_PROCESSING, false).unwrap();
        assert!(factory.limits().is_none());

        let err = factory.set_feature("urn:unknown", true).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Configuration(ConfigurationError {
                kind: ConfigurationErrorKind::NotRecognized,
                ..
            })
        ));
    }

    #[test]
    fn test_grammar_pool_property_is_not_supported() {
        let mut factory = SchemaFactory::with_loader(FixedLoader::new(vec![]));
        for result in [
            factory.get_property(XMLGRAMMAR_POOL).map(|_| ()),
            factory.set_property(XMLGRAMMAR_POOL, None),
        ] {
            match result {
                Err(SchemaError::Configuration(err)) => {
                    assert_eq!(err.kind, ConfigurationErrorKind::NotSupported);
                    assert_eq!(err.identifier, XMLGRAMMAR_POOL);
                }
                other => panic!("Expected configuration error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_sessions_inherit_secure_processing() {
        let mut factory = SchemaFactory::with_loader(FixedLoader::new(vec![Some("urn:a")]));
        factory.set_feature(SECURE_PROCESSING, true).unwrap();
        let schema = factory.compile(&text_source()).unwrap();

        let validator = schema.new_validator();
        assert!(validator.get_feature(SECURE_PROCESSING).unwrap());
    }
}
