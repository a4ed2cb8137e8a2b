//! Components owned by a validation session's [`ComponentManager`].
//!
//! Each component publishes a static [`Registration`]: the features and
//! properties it recognizes and the defaults it proposes for them. The
//! manager merges those tables once at construction instead of asking
//! components at run time.
//!
//! [`ComponentManager`]: crate::registry::ComponentManager

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::constants::{
    CONTINUE_AFTER_FATAL_ERROR, DEFAULT_INPUT_BUFFER_SIZE, ENTITY_RESOLVER, ERROR_HANDLER,
    INPUT_BUFFER_SIZE, NAMESPACE_GROWTH, SCHEMA_FULL_CHECKING, SCHEMA_LOCATION,
    SCHEMA_NONS_LOCATION, SECURITY_MANAGER, XML_DOMAIN, XML_SCHEMA_DOMAIN,
};
use crate::error::{Result, SchemaError, SchemaParseException};
use crate::error_handler::{Diagnostic, ErrorHandler, ErrorHandlerAdaptor, Severity};
use crate::grammar::{GrammarDescription, GrammarPool, ValidateOptions};
use crate::limits::ResourceLimits;
use crate::locator::{RootInfo, parse_schema_location, resolve_system_id, scan_root};
use crate::registry::{PropertyValue, Settings};
use crate::schema::DynamicGrammars;
use crate::source::{ResourceResolver, StreamSource, open_stream};

/// Owned component kinds, also used as the value of their read-only
/// properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    SymbolTable,
    EntityManager,
    ErrorReporter,
    NamespaceContext,
    SchemaValidator,
    ValidationManager,
}

/// Static description of what a component recognizes
#[derive(Clone, Copy)]
pub struct Registration {
    pub kind: ComponentKind,
    pub features: &'static [&'static str],
    pub properties: &'static [&'static str],
    pub feature_default: fn(&str) -> Option<bool>,
    pub property_default: fn(&str) -> Option<PropertyValue>,
}

impl Registration {
    pub fn declares_feature(&self, id: &str) -> bool {
        self.features.contains(&id)
    }

    pub fn declares_property(&self, id: &str) -> bool {
        self.properties.contains(&id)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("features", &self.features)
            .field("properties", &self.properties)
            .finish()
    }
}

fn no_feature_default(_id: &str) -> Option<bool> {
    None
}

fn no_property_default(_id: &str) -> Option<PropertyValue> {
    None
}

fn namespace_context_feature_default(id: &str) -> Option<bool> {
    (id == NAMESPACE_GROWTH).then_some(false)
}

fn entity_manager_property_default(id: &str) -> Option<PropertyValue> {
    (id == INPUT_BUFFER_SIZE).then_some(PropertyValue::Integer(DEFAULT_INPUT_BUFFER_SIZE))
}

fn error_reporter_feature_default(id: &str) -> Option<bool> {
    (id == CONTINUE_AFTER_FATAL_ERROR).then_some(false)
}

fn schema_validator_feature_default(id: &str) -> Option<bool> {
    (id == SCHEMA_FULL_CHECKING).then_some(false)
}

/// Registration order: the first registrant's default wins
pub static REGISTRATIONS: [&Registration; 5] = [
    &EntityManager::REGISTRATION,
    &ErrorReporter::REGISTRATION,
    &NamespaceContext::REGISTRATION,
    &SchemaValidatorEngine::REGISTRATION,
    &ValidationManager::REGISTRATION,
];

/// Behavior shared by every owned component
pub trait Component {
    fn registration(&self) -> &'static Registration;

    /// Clear per-run state and re-read configuration before a run
    fn reset(&mut self, settings: &Settings) -> Result<()>;

    fn set_feature(&mut self, _id: &str, _value: bool) {}

    fn set_property(&mut self, _id: &str, _value: Option<&PropertyValue>) {}
}

/// Interned strings shared by the namespace context
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashSet<Arc<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: &str) -> Arc<str> {
        if let Some(existing) = self.symbols.get(symbol) {
            return existing.clone();
        }
        let symbol: Arc<str> = Arc::from(symbol);
        self.symbols.insert(symbol.clone());
        symbol
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }
}

const XML_PREFIX_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// Scoped prefix bindings
#[derive(Debug)]
pub struct NamespaceContext {
    symbols: SymbolTable,
    scopes: Vec<Vec<(Option<Arc<str>>, Arc<str>)>>,
    pending: Vec<(Option<Arc<str>>, Arc<str>)>,
    growth: bool,
}

impl NamespaceContext {
    pub const REGISTRATION: Registration = Registration {
        kind: ComponentKind::NamespaceContext,
        features: &[NAMESPACE_GROWTH],
        properties: &[],
        feature_default: namespace_context_feature_default,
        property_default: no_property_default,
    };

    pub fn new() -> Self {
        let mut context = Self {
            symbols: SymbolTable::new(),
            scopes: Vec::new(),
            pending: Vec::new(),
            growth: false,
        };
        context.clear_scopes();
        context
    }

    /// Record a binding for the next pushed element scope
    pub fn declare_prefix(&mut self, prefix: Option<&str>, uri: &str) {
        let prefix = prefix.map(|p| self.symbols.add(p));
        let uri = self.symbols.add(uri);
        self.pending.push((prefix, uri));
    }

    /// Open an element scope holding every pending binding
    pub fn push_context(&mut self) {
        let bindings = std::mem::take(&mut self.pending);
        self.scopes.push(bindings);
    }

    pub fn pop_context(&mut self) {
        // The outermost scope carries the built-in xml binding
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn get_uri(&self, prefix: Option<&str>) -> Option<Arc<str>> {
        self.pending
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|s| s.iter().rev()))
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    }

    /// Every binding visible in the current scope, innermost first
    pub fn bindings(&self) -> std::collections::HashMap<Option<String>, String> {
        let mut visible = std::collections::HashMap::new();
        for (prefix, uri) in self
            .pending
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|s| s.iter().rev()))
        {
            visible
                .entry(prefix.as_deref().map(str::to_string))
                .or_insert_with(|| uri.to_string());
        }
        visible
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn clear_scopes(&mut self) {
        self.scopes.clear();
        self.pending.clear();
        let xml = self.symbols.add("xml");
        let uri = self.symbols.add(XML_PREFIX_URI);
        self.scopes.push(vec![(Some(xml), uri)]);
    }
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for NamespaceContext {
    fn registration(&self) -> &'static Registration {
        &Self::REGISTRATION
    }

    fn reset(&mut self, settings: &Settings) -> Result<()> {
        self.growth = settings.feature(NAMESPACE_GROWTH);
        if !self.growth {
            self.symbols.clear();
        }
        self.clear_scopes();
        Ok(())
    }

    fn set_feature(&mut self, id: &str, value: bool) {
        if id == NAMESPACE_GROWTH {
            self.growth = value;
        }
    }
}

/// Per-run bookkeeping shared by the components of one session
#[derive(Debug, Default)]
pub struct ValidationManager {
    grammar_found: Option<bool>,
    documents_validated: u64,
}

impl ValidationManager {
    pub const REGISTRATION: Registration = Registration {
        kind: ComponentKind::ValidationManager,
        features: &[],
        properties: &[],
        feature_default: no_feature_default,
        property_default: no_property_default,
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last run found a grammar for its root element
    pub fn grammar_found(&self) -> Option<bool> {
        self.grammar_found
    }

    pub fn documents_validated(&self) -> u64 {
        self.documents_validated
    }

    fn record(&mut self, grammar_found: bool) {
        self.grammar_found = Some(grammar_found);
        self.documents_validated += 1;
    }
}

impl Component for ValidationManager {
    fn registration(&self) -> &'static Registration {
        &Self::REGISTRATION
    }

    fn reset(&mut self, _settings: &Settings) -> Result<()> {
        self.grammar_found = None;
        Ok(())
    }
}

/// Opens documents: resolver first, then the file system, under the
/// installed resource limits
#[derive(Clone, Default)]
pub struct EntityManager {
    resolver: Option<Arc<dyn ResourceResolver>>,
    limits: Option<ResourceLimits>,
    buffer_size: i64,
}

impl EntityManager {
    pub const REGISTRATION: Registration = Registration {
        kind: ComponentKind::EntityManager,
        features: &[],
        properties: &[ENTITY_RESOLVER, SECURITY_MANAGER, INPUT_BUFFER_SIZE],
        feature_default: no_feature_default,
        property_default: entity_manager_property_default,
    };

    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            ..Self::default()
        }
    }

    pub fn resolver(&self) -> Option<&Arc<dyn ResourceResolver>> {
        self.resolver.as_ref()
    }

    pub fn limits(&self) -> Option<&ResourceLimits> {
        self.limits.as_ref()
    }

    pub fn buffer_size(&self) -> i64 {
        self.buffer_size
    }

    /// Read a stream source into memory
    pub fn open(&self, stream: &StreamSource, base: Option<&str>) -> Result<Vec<u8>> {
        open_stream(
            stream,
            None,
            base,
            self.resolver.as_deref(),
            self.limits.as_ref(),
        )
    }

    /// Absolute form of `system_id` relative to `base`
    pub fn expand_system_id(&self, system_id: &str, base: Option<&str>) -> String {
        resolve_system_id(system_id, base)
    }

    pub fn allow_network(&self) -> bool {
        self.limits.is_none_or(|l| l.allow_network)
    }
}

impl Component for EntityManager {
    fn registration(&self) -> &'static Registration {
        &Self::REGISTRATION
    }

    fn reset(&mut self, settings: &Settings) -> Result<()> {
        for id in Self::REGISTRATION.properties {
            self.set_property(id, settings.property(id));
        }
        Ok(())
    }

    fn set_property(&mut self, id: &str, value: Option<&PropertyValue>) {
        match (id, value) {
            (ENTITY_RESOLVER, Some(PropertyValue::ResourceResolver(resolver))) => {
                self.resolver = Some(resolver.clone());
            }
            (ENTITY_RESOLVER, _) => self.resolver = None,
            (SECURITY_MANAGER, _) => self.limits = value.and_then(PropertyValue::as_limits).copied(),
            (INPUT_BUFFER_SIZE, Some(PropertyValue::Integer(size))) if *size > 0 => {
                self.buffer_size = *size;
            }
            (INPUT_BUFFER_SIZE, _) => self.buffer_size = DEFAULT_INPUT_BUFFER_SIZE,
            _ => {}
        }
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("resolver", &self.resolver.is_some())
            .field("limits", &self.limits)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Delivers reports through the error adaptor and decides when a fatal error
/// stops the run
#[derive(Debug, Default)]
pub struct ErrorReporter {
    adaptor: ErrorHandlerAdaptor,
    continue_after_fatal: bool,
}

impl ErrorReporter {
    pub const REGISTRATION: Registration = Registration {
        kind: ComponentKind::ErrorReporter,
        features: &[CONTINUE_AFTER_FATAL_ERROR],
        properties: &[ERROR_HANDLER],
        feature_default: error_reporter_feature_default,
        property_default: no_property_default,
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Report with severity semantics:
    /// - a handler failure always aborts
    /// - a fatal error aborts unless continue-after-fatal-error is on
    pub fn report(
        &mut self,
        severity: Severity,
        domain: &str,
        key: &str,
        exception: &SchemaParseException,
    ) -> Result<()> {
        self.adaptor.report(severity, domain, key, exception)?;
        if severity == Severity::FatalError && !self.continue_after_fatal {
            return Err(SchemaError::Fatal(exception.clone()));
        }
        Ok(())
    }

    pub fn report_diagnostic(&mut self, domain: &str, diagnostic: &Diagnostic) -> Result<()> {
        self.report(diagnostic.severity, domain, &diagnostic.key, &diagnostic.exception)
    }

    pub fn had_error(&self) -> bool {
        self.adaptor.had_error()
    }

    pub fn handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.adaptor.handler()
    }
}

impl Component for ErrorReporter {
    fn registration(&self) -> &'static Registration {
        &Self::REGISTRATION
    }

    fn reset(&mut self, settings: &Settings) -> Result<()> {
        self.continue_after_fatal = settings.feature(CONTINUE_AFTER_FATAL_ERROR);
        self.set_property(ERROR_HANDLER, settings.property(ERROR_HANDLER));
        self.adaptor.reset();
        Ok(())
    }

    fn set_feature(&mut self, id: &str, value: bool) {
        if id == CONTINUE_AFTER_FATAL_ERROR {
            self.continue_after_fatal = value;
        }
    }

    fn set_property(&mut self, id: &str, value: Option<&PropertyValue>) {
        if id == ERROR_HANDLER {
            let handler = match value {
                Some(PropertyValue::ErrorHandler(handler)) => Some(handler.clone()),
                _ => None,
            };
            self.adaptor.set_handler(handler);
        }
    }
}

/// Where the validator engine finds grammars
#[derive(Debug, Clone)]
pub enum GrammarSource {
    /// No grammars: schema constraints are not checked
    None,
    /// Fixed, locked pool
    Pool(Arc<dyn GrammarPool>),
    /// Grammars fetched from schema location hints during validation
    Dynamic(Arc<DynamicGrammars>),
}

impl GrammarSource {
    pub fn is_fully_composed(&self) -> bool {
        !matches!(self, GrammarSource::Dynamic(_))
    }

    pub fn pool(&self) -> Option<&Arc<dyn GrammarPool>> {
        match self {
            GrammarSource::Pool(pool) => Some(pool),
            _ => None,
        }
    }
}

/// Picks the grammar for a document and runs it
#[derive(Debug)]
pub struct SchemaValidatorEngine {
    source: GrammarSource,
    full_checking: bool,
    external_schema_location: Option<String>,
    external_no_namespace_location: Option<String>,
}

impl SchemaValidatorEngine {
    pub const REGISTRATION: Registration = Registration {
        kind: ComponentKind::SchemaValidator,
        features: &[SCHEMA_FULL_CHECKING],
        properties: &[SCHEMA_LOCATION, SCHEMA_NONS_LOCATION],
        feature_default: schema_validator_feature_default,
        property_default: no_property_default,
    };

    pub fn new(source: GrammarSource) -> Self {
        Self {
            source,
            full_checking: false,
            external_schema_location: None,
            external_no_namespace_location: None,
        }
    }

    pub fn grammar_source(&self) -> &GrammarSource {
        &self.source
    }

    pub fn full_checking(&self) -> bool {
        self.full_checking
    }

    /// Validate a serialized document.
    ///
    /// `root` may carry what the caller already learned from pushed events;
    /// otherwise the first start tag is scanned.
    pub fn validate_document(
        &self,
        document: &[u8],
        system_id: Option<&str>,
        root: Option<RootInfo>,
        entity_manager: &EntityManager,
        reporter: &mut ErrorReporter,
        validation_manager: &mut ValidationManager,
    ) -> Result<()> {
        let Some(root) = root.or_else(|| scan_root(document)) else {
            let exception = SchemaParseException::new("Content is not allowed in prolog.")
                .with_system_id(system_id.map(str::to_string))
                .at(Some(1), Some(1));
            validation_manager.record(false);
            return reporter.report(Severity::FatalError, XML_DOMAIN, "ContentIllegalInProlog", &exception);
        };

        let grammar = match &self.source {
            GrammarSource::None => {
                debug!("no grammars installed, skipping schema checks");
                validation_manager.record(false);
                return Ok(());
            }
            GrammarSource::Pool(pool) => {
                pool.retrieve_grammar(&GrammarDescription::xml_schema(root.namespace.as_deref()))
            }
            GrammarSource::Dynamic(dynamic) => {
                self.fetch_dynamic(dynamic, &root, system_id, entity_manager, reporter)?
            }
        };

        let Some(grammar) = grammar else {
            validation_manager.record(false);
            let exception = SchemaParseException::new(format!(
                "cvc-elt.1.a: Cannot find the declaration of element '{}'.",
                match &root.prefix {
                    Some(prefix) => format!("{}:{}", prefix, root.local_name),
                    None => root.local_name.clone(),
                }
            ))
            .with_system_id(system_id.map(str::to_string))
            .at(Some(1), None);
            return reporter.report(Severity::Error, XML_SCHEMA_DOMAIN, "cvc-elt.1.a", &exception);
        };

        validation_manager.record(true);
        let options = ValidateOptions {
            system_id: system_id.map(str::to_string),
            allow_network: entity_manager.allow_network(),
        };
        for diagnostic in grammar.model.validate(document, &options)? {
            reporter.report_diagnostic(XML_SCHEMA_DOMAIN, &diagnostic)?;
        }
        Ok(())
    }

    /// Location for the root namespace: session properties first, then the
    /// document's own `xsi` hints
    fn location_hint(&self, root: &RootInfo) -> Option<String> {
        let external = match &root.namespace {
            Some(ns) => self
                .external_schema_location
                .as_deref()
                .map(parse_schema_location)
                .and_then(|pairs| pairs.into_iter().find(|(n, _)| n == ns).map(|(_, l)| l)),
            None => self.external_no_namespace_location.clone(),
        };
        external.or_else(|| root.location_for_root().map(str::to_string))
    }

    fn fetch_dynamic(
        &self,
        dynamic: &DynamicGrammars,
        root: &RootInfo,
        system_id: Option<&str>,
        entity_manager: &EntityManager,
        reporter: &mut ErrorReporter,
    ) -> Result<Option<Arc<crate::grammar::Grammar>>> {
        let Some(location) = self.location_hint(root) else {
            return Ok(None);
        };
        let absolute = entity_manager.expand_system_id(&location, system_id);

        match dynamic.fetch(&absolute, entity_manager) {
            Ok((grammar, diagnostics)) => {
                for diagnostic in &diagnostics {
                    reporter.report_diagnostic(XML_SCHEMA_DOMAIN, diagnostic)?;
                }
                Ok(Some(grammar))
            }
            Err(failure) => {
                warn!(system_id = %absolute, cause = %failure.cause, "schema document could not be loaded");
                for diagnostic in &failure.diagnostics {
                    reporter.report_diagnostic(XML_SCHEMA_DOMAIN, diagnostic)?;
                }
                if failure.diagnostics.is_empty() {
                    let exception = SchemaParseException::new(format!(
                        "schema_reference.4: Failed to read schema document '{}': {}",
                        absolute, failure.cause
                    ))
                    .with_system_id(system_id.map(str::to_string));
                    reporter.report(Severity::Warning, XML_SCHEMA_DOMAIN, "schema_reference.4", &exception)?;
                }
                Ok(None)
            }
        }
    }
}

impl Component for SchemaValidatorEngine {
    fn registration(&self) -> &'static Registration {
        &Self::REGISTRATION
    }

    fn reset(&mut self, settings: &Settings) -> Result<()> {
        self.full_checking = settings.feature(SCHEMA_FULL_CHECKING);
        for id in Self::REGISTRATION.properties {
            self.set_property(id, settings.property(id));
        }
        Ok(())
    }

    fn set_feature(&mut self, id: &str, value: bool) {
        if id == SCHEMA_FULL_CHECKING {
            self.full_checking = value;
        }
    }

    fn set_property(&mut self, id: &str, value: Option<&PropertyValue>) {
        let text = value.and_then(PropertyValue::as_text).map(str::to_string);
        match id {
            SCHEMA_LOCATION => self.external_schema_location = text,
            SCHEMA_NONS_LOCATION => self.external_no_namespace_location = text,
            _ => {}
        }
    }
}

/// Every component a session owns
#[derive(Debug)]
pub struct Components {
    pub entity_manager: EntityManager,
    pub error_reporter: ErrorReporter,
    pub namespace_context: NamespaceContext,
    pub validator: SchemaValidatorEngine,
    pub validation_manager: ValidationManager,
}

impl Components {
    pub fn new(source: GrammarSource) -> Self {
        Self {
            entity_manager: EntityManager::new(),
            error_reporter: ErrorReporter::new(),
            namespace_context: NamespaceContext::new(),
            validator: SchemaValidatorEngine::new(source),
            validation_manager: ValidationManager::new(),
        }
    }

    /// Components in reset order
    pub fn in_reset_order(&mut self) -> [&mut dyn Component; 5] {
        [
            &mut self.namespace_context,
            &mut self.validation_manager,
            &mut self.entity_manager,
            &mut self.error_reporter,
            &mut self.validator,
        ]
    }

    /// Push a feature value to every component declaring it
    pub fn forward_feature(&mut self, id: &str, value: bool) {
        for component in self.in_reset_order() {
            if component.registration().declares_feature(id) {
                component.set_feature(id, value);
            }
        }
    }

    /// Push a property value to every component declaring it
    pub fn forward_property(&mut self, id: &str, value: Option<&PropertyValue>) {
        for component in self.in_reset_order() {
            if component.registration().declares_property(id) {
                component.set_property(id, value);
            }
        }
    }

    pub fn validate_document(
        &mut self,
        document: &[u8],
        system_id: Option<&str>,
        root: Option<RootInfo>,
    ) -> Result<()> {
        let Components {
            entity_manager,
            error_reporter,
            validator,
            validation_manager,
            ..
        } = self;
        validator.validate_document(
            document,
            system_id,
            root,
            entity_manager,
            error_reporter,
            validation_manager,
        )
    }
}
