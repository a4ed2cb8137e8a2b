//! Configuration registry of a validation session.
//!
//! Identifiers fall into three classes:
//! - reserved identifiers with bespoke rules (parser-settings, validation,
//!   schema-validation, use-grammar-pool-only, secure-processing)
//! - component-owned properties, readable but never settable
//! - ordinary identifiers, stored in the generic maps and forwarded to every
//!   component that declares them
//!
//! Every failed call leaves the registry untouched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::components::{ComponentKind, Components, GrammarSource, REGISTRATIONS, Registration};
use crate::constants::{
    ENTITY_MANAGER, ENTITY_RESOLVER, ERROR_HANDLER, ERROR_REPORTER, NAMESPACE_CONTEXT,
    PARSER_SETTINGS, SCHEMA_VALIDATION, SCHEMA_VALIDATOR, SECURE_PROCESSING, SECURITY_MANAGER,
    SYMBOL_TABLE, USE_GRAMMAR_POOL_ONLY, VALIDATION, VALIDATION_MANAGER, XMLGRAMMAR_POOL,
};
use crate::error::{ConfigurationError, Result};
use crate::error_handler::ErrorHandler;
use crate::grammar::GrammarPool;
use crate::limits::ResourceLimits;
use crate::source::ResourceResolver;

/// Value of a property
#[derive(Clone)]
pub enum PropertyValue {
    Text(String),
    Integer(i64),
    Limits(ResourceLimits),
    ErrorHandler(Arc<dyn ErrorHandler>),
    ResourceResolver(Arc<dyn ResourceResolver>),
    GrammarPool(Arc<dyn GrammarPool>),
    /// Handle of a component owned by the session
    Component(ComponentKind),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_limits(&self) -> Option<&ResourceLimits> {
        match self {
            PropertyValue::Limits(limits) => Some(limits),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a == b,
            (PropertyValue::Limits(a), PropertyValue::Limits(b)) => a == b,
            (PropertyValue::ErrorHandler(a), PropertyValue::ErrorHandler(b)) => Arc::ptr_eq(a, b),
            (PropertyValue::ResourceResolver(a), PropertyValue::ResourceResolver(b)) => {
                Arc::ptr_eq(a, b)
            }
            (PropertyValue::GrammarPool(a), PropertyValue::GrammarPool(b)) => Arc::ptr_eq(a, b),
            (PropertyValue::Component(a), PropertyValue::Component(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Text(text) => f.debug_tuple("Text").field(text).finish(),
            PropertyValue::Integer(value) => f.debug_tuple("Integer").field(value).finish(),
            PropertyValue::Limits(limits) => f.debug_tuple("Limits").field(limits).finish(),
            PropertyValue::ErrorHandler(_) => f.write_str("ErrorHandler(..)"),
            PropertyValue::ResourceResolver(_) => f.write_str("ResourceResolver(..)"),
            PropertyValue::GrammarPool(pool) => f.debug_tuple("GrammarPool").field(pool).finish(),
            PropertyValue::Component(kind) => f.debug_tuple("Component").field(kind).finish(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(text: &str) -> Self {
        PropertyValue::Text(text.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(text: String) -> Self {
        PropertyValue::Text(text)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<ResourceLimits> for PropertyValue {
    fn from(limits: ResourceLimits) -> Self {
        PropertyValue::Limits(limits)
    }
}

/// Recognized identifiers and their current values
#[derive(Debug, Default, Clone)]
pub struct Settings {
    recognized_features: HashSet<String>,
    recognized_properties: HashSet<String>,
    features: HashMap<String, bool>,
    properties: HashMap<String, PropertyValue>,
}

impl Settings {
    /// Current value of a feature; unset features read as `false`
    pub fn feature(&self, id: &str) -> bool {
        self.features.get(id).copied().unwrap_or(false)
    }

    pub fn property(&self, id: &str) -> Option<&PropertyValue> {
        self.properties.get(id)
    }

    pub fn recognizes_feature(&self, id: &str) -> bool {
        self.recognized_features.contains(id)
    }

    pub fn recognizes_property(&self, id: &str) -> bool {
        self.recognized_properties.contains(id)
    }

    pub fn has_feature_value(&self, id: &str) -> bool {
        self.features.contains_key(id)
    }

    pub fn has_property_value(&self, id: &str) -> bool {
        self.properties.contains_key(id)
    }
}

/// Component-owned property identifiers and what they resolve to
const COMPONENT_PROPERTIES: [(&str, Option<ComponentKind>); 7] = [
    (SYMBOL_TABLE, Some(ComponentKind::SymbolTable)),
    (ENTITY_MANAGER, Some(ComponentKind::EntityManager)),
    (ERROR_REPORTER, Some(ComponentKind::ErrorReporter)),
    (NAMESPACE_CONTEXT, Some(ComponentKind::NamespaceContext)),
    (SCHEMA_VALIDATOR, Some(ComponentKind::SchemaValidator)),
    (VALIDATION_MANAGER, Some(ComponentKind::ValidationManager)),
    (XMLGRAMMAR_POOL, None),
];

const MANAGER_FEATURES: [&str; 5] = [
    VALIDATION,
    SCHEMA_VALIDATION,
    USE_GRAMMAR_POOL_ONLY,
    PARSER_SETTINGS,
    SECURE_PROCESSING,
];

const MANAGER_PROPERTIES: [&str; 3] = [ERROR_HANDLER, ENTITY_RESOLVER, SECURITY_MANAGER];

/// Per-session feature/property store that owns the session's components
pub struct ComponentManager {
    settings: Settings,
    components: Components,
    registrations: Vec<Registration>,
    use_grammar_pool_only: bool,
    initial_limits: Option<ResourceLimits>,
    dirty: bool,
}

impl ComponentManager {
    /// Build a registry for one session.
    ///
    /// `initial_limits` is the secure-processing guard inherited from the
    /// factory; it is restored by [`restore_initial_state`](Self::restore_initial_state).
    pub fn new(source: GrammarSource, initial_limits: Option<ResourceLimits>) -> Self {
        let use_grammar_pool_only = source.is_fully_composed();
        let mut settings = Settings::default();
        settings
            .recognized_features
            .extend(MANAGER_FEATURES.iter().map(|id| id.to_string()));
        settings
            .recognized_properties
            .extend(MANAGER_PROPERTIES.iter().map(|id| id.to_string()));
        settings
            .recognized_properties
            .extend(COMPONENT_PROPERTIES.iter().map(|(id, _)| id.to_string()));

        let mut manager = Self {
            settings,
            components: Components::new(source),
            registrations: Vec::with_capacity(REGISTRATIONS.len()),
            use_grammar_pool_only,
            initial_limits,
            dirty: false,
        };
        manager.apply_initial_limits();
        for registration in REGISTRATIONS {
            manager.register_component(registration);
        }
        manager.dirty = true;
        manager
    }

    /// Merge a component's recognized identifiers and install the defaults
    /// it proposes for identifiers that have no value yet
    pub fn register_component(&mut self, registration: &Registration) {
        for id in registration.features {
            self.settings.recognized_features.insert(id.to_string());
        }
        for id in registration.properties {
            self.settings.recognized_properties.insert(id.to_string());
        }
        self.registrations.push(*registration);
        self.apply_defaults(registration);
    }

    fn apply_defaults(&mut self, registration: &Registration) {
        for id in registration.features {
            if !self.settings.has_feature_value(id)
                && let Some(value) = (registration.feature_default)(id)
            {
                self.settings.features.insert(id.to_string(), value);
                self.components.forward_feature(id, value);
                self.dirty = true;
            }
        }
        for id in registration.properties {
            if !self.settings.has_property_value(id)
                && let Some(value) = (registration.property_default)(id)
            {
                self.components.forward_property(id, Some(&value));
                self.settings.properties.insert(id.to_string(), value);
                self.dirty = true;
            }
        }
    }

    fn apply_initial_limits(&mut self) {
        if let Some(limits) = self.initial_limits {
            self.settings
                .properties
                .insert(SECURITY_MANAGER.to_string(), PropertyValue::Limits(limits));
            self.components
                .forward_property(SECURITY_MANAGER, Some(&PropertyValue::Limits(limits)));
        }
    }

    pub fn get_feature(&self, id: &str) -> Result<bool> {
        match id {
            PARSER_SETTINGS => Ok(self.dirty),
            VALIDATION | SCHEMA_VALIDATION => Ok(true),
            USE_GRAMMAR_POOL_ONLY => Ok(self.use_grammar_pool_only),
            SECURE_PROCESSING => Ok(self.settings.has_property_value(SECURITY_MANAGER)),
            _ if self.settings.recognizes_feature(id) => Ok(self.settings.feature(id)),
            _ => Err(ConfigurationError::feature_not_recognized(id).into()),
        }
    }

    pub fn set_feature(&mut self, id: &str, value: bool) -> Result<()> {
        match id {
            PARSER_SETTINGS => Err(ConfigurationError::feature_not_supported(id).into()),
            VALIDATION | SCHEMA_VALIDATION if !value => {
                Err(ConfigurationError::feature_not_supported(id).into())
            }
            VALIDATION | SCHEMA_VALIDATION => Ok(()),
            USE_GRAMMAR_POOL_ONLY if value != self.use_grammar_pool_only => {
                Err(ConfigurationError::feature_not_supported(id).into())
            }
            USE_GRAMMAR_POOL_ONLY => Ok(()),
            SECURE_PROCESSING => {
                let limits = value.then(|| PropertyValue::Limits(ResourceLimits::secure()));
                if self.get_feature(SECURE_PROCESSING)? != value {
                    self.store_property(SECURITY_MANAGER, limits);
                }
                Ok(())
            }
            _ if !self.settings.recognizes_feature(id) => {
                Err(ConfigurationError::feature_not_recognized(id).into())
            }
            _ => {
                if self.settings.features.get(id) != Some(&value) {
                    debug!(feature = id, value, "feature changed");
                    self.settings.features.insert(id.to_string(), value);
                    self.components.forward_feature(id, value);
                    self.dirty = true;
                }
                Ok(())
            }
        }
    }

    pub fn get_property(&self, id: &str) -> Result<Option<PropertyValue>> {
        if let Some((_, kind)) = COMPONENT_PROPERTIES.iter().find(|(owned, _)| *owned == id) {
            return Ok(match kind {
                Some(kind) => Some(PropertyValue::Component(*kind)),
                None => self
                    .components
                    .validator
                    .grammar_source()
                    .pool()
                    .cloned()
                    .map(PropertyValue::GrammarPool),
            });
        }
        if !self.settings.recognizes_property(id) {
            return Err(ConfigurationError::property_not_recognized(id).into());
        }
        Ok(self.settings.property(id).cloned())
    }

    /// Set or clear (`None`) a property
    pub fn set_property(&mut self, id: &str, value: Option<PropertyValue>) -> Result<()> {
        if COMPONENT_PROPERTIES.iter().any(|(owned, _)| *owned == id) {
            return Err(ConfigurationError::property_not_supported(id).into());
        }
        if !self.settings.recognizes_property(id) {
            return Err(ConfigurationError::property_not_recognized(id).into());
        }
        if self.settings.property(id) != value.as_ref() {
            self.store_property(id, value);
        }
        Ok(())
    }

    fn store_property(&mut self, id: &str, value: Option<PropertyValue>) {
        debug!(property = id, set = value.is_some(), "property changed");
        self.components.forward_property(id, value.as_ref());
        match value {
            Some(value) => {
                self.settings.properties.insert(id.to_string(), value);
            }
            None => {
                self.settings.properties.remove(id);
            }
        }
        self.dirty = true;
    }

    pub fn set_error_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) -> Result<()> {
        self.set_property(ERROR_HANDLER, handler.map(PropertyValue::ErrorHandler))
    }

    pub fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        match self.settings.property(ERROR_HANDLER) {
            Some(PropertyValue::ErrorHandler(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    pub fn set_resource_resolver(
        &mut self,
        resolver: Option<Arc<dyn ResourceResolver>>,
    ) -> Result<()> {
        self.set_property(ENTITY_RESOLVER, resolver.map(PropertyValue::ResourceResolver))
    }

    pub fn resource_resolver(&self) -> Option<Arc<dyn ResourceResolver>> {
        match self.settings.property(ENTITY_RESOLVER) {
            Some(PropertyValue::ResourceResolver(resolver)) => Some(resolver.clone()),
            _ => None,
        }
    }

    /// Reset every component before a run and clear the dirty flag.
    ///
    /// Caller-visible configuration is left as is.
    pub fn reset(&mut self) -> Result<()> {
        let settings = &self.settings;
        for component in self.components.in_reset_order() {
            component.reset(settings)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Drop every explicit value, the resolver and the error handler, then
    /// re-apply component defaults. Leaves the registry dirty.
    pub fn restore_initial_state(&mut self) {
        self.settings.features.clear();
        self.settings.properties.clear();
        for id in MANAGER_PROPERTIES {
            self.components.forward_property(id, None);
        }

        let registrations = std::mem::take(&mut self.registrations);
        for registration in &registrations {
            // Identifiers without a default go back to their unset state
            for id in registration.properties {
                self.components.forward_property(id, None);
            }
            self.apply_defaults(registration);
        }
        self.registrations = registrations;
        self.apply_initial_limits();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn use_grammar_pool_only(&self) -> bool {
        self.use_grammar_pool_only
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut Components {
        &mut self.components
    }
}

impl fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("use_grammar_pool_only", &self.use_grammar_pool_only)
            .field("dirty", &self.dirty)
            .field("features", &self.settings.features)
            .field("properties", &self.settings.properties.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{INPUT_BUFFER_SIZE, SCHEMA_FULL_CHECKING};
    use crate::error::{ConfigurationErrorKind, SchemaError};

    fn manager() -> ComponentManager {
        ComponentManager::new(GrammarSource::None, None)
    }

    fn config_kind(result: Result<impl Sized>) -> ConfigurationErrorKind {
        match result {
            Err(SchemaError::Configuration(err)) => err.kind,
            Err(other) => panic!("Expected configuration error, got {:?}", other),
            Ok(_) => panic!("Expected configuration error"),
        }
    }

    #[test]
    fn test_defaults_installed() {
        let manager = manager();
        assert!(manager.is_dirty());
        assert_eq!(
            manager.get_property(INPUT_BUFFER_SIZE).unwrap(),
            Some(PropertyValue::Integer(8192))
        );
        assert!(!manager.get_feature(SCHEMA_FULL_CHECKING).unwrap());
        assert!(manager.get_feature(VALIDATION).unwrap());
    }

    #[test]
    fn test_reset_clears_dirty_and_keeps_values() {
        let mut manager = manager();
        manager.set_feature(SCHEMA_FULL_CHECKING, true).unwrap();
        manager.reset().unwrap();

        assert!(!manager.is_dirty());
        assert!(!manager.get_feature(PARSER_SETTINGS).unwrap());
        assert!(manager.get_feature(SCHEMA_FULL_CHECKING).unwrap());

        manager.reset().unwrap();
        assert!(!manager.is_dirty());
    }

    #[test]
    fn test_reserved_identifiers() {
        let mut manager = manager();
        assert_eq!(
            config_kind(manager.set_feature(PARSER_SETTINGS, false)),
            ConfigurationErrorKind::NotSupported
        );
        assert_eq!(
            config_kind(manager.set_feature(SCHEMA_VALIDATION, false)),
            ConfigurationErrorKind::NotSupported
        );
        manager.set_feature(VALIDATION, true).unwrap();
        assert_eq!(
            config_kind(manager.set_property(SYMBOL_TABLE, Some("x".into()))),
            ConfigurationErrorKind::NotSupported
        );
        assert_eq!(
            manager.get_property(ERROR_REPORTER).unwrap(),
            Some(PropertyValue::Component(ComponentKind::ErrorReporter))
        );
        // Empty schemas have no pool to expose
        assert_eq!(manager.get_property(XMLGRAMMAR_POOL).unwrap(), None);
    }

    #[test]
    fn test_unknown_identifiers() {
        let mut manager = manager();
        assert_eq!(
            config_kind(manager.get_feature("urn:unknown")),
            ConfigurationErrorKind::NotRecognized
        );
        assert_eq!(
            config_kind(manager.set_property("urn:unknown", None)),
            ConfigurationErrorKind::NotRecognized
        );
    }

    #[test]
    fn test_secure_processing_toggles_limits() {
        let mut manager = manager();
        manager.reset().unwrap();

        manager.set_feature(SECURE_PROCESSING, true).unwrap();
        assert!(manager.is_dirty());
        assert!(manager.get_feature(SECURE_PROCESSING).unwrap());
        assert_eq!(
            manager.get_property(SECURITY_MANAGER).unwrap(),
            Some(PropertyValue::Limits(ResourceLimits::secure()))
        );
        assert!(!manager.components().entity_manager.allow_network());

        manager.set_feature(SECURE_PROCESSING, false).unwrap();
        assert_eq!(manager.get_property(SECURITY_MANAGER).unwrap(), None);
        assert!(manager.components().entity_manager.allow_network());
    }

    #[test]
    fn test_restore_initial_state() {
        let limits = ResourceLimits::secure();
        let mut manager = ComponentManager::new(GrammarSource::None, Some(limits));
        manager
            .set_error_handler(Some(Arc::new(crate::error_handler::DiagnosticCollector::new())))
            .unwrap();
        manager.set_property(INPUT_BUFFER_SIZE, Some(PropertyValue::Integer(16))).unwrap();
        manager.set_feature(SECURE_PROCESSING, false).unwrap();
        manager.reset().unwrap();

        manager.restore_initial_state();
        assert!(manager.is_dirty());
        assert!(manager.error_handler().is_none());
        assert!(manager.components().error_reporter.handler().is_none());
        assert_eq!(
            manager.get_property(INPUT_BUFFER_SIZE).unwrap(),
            Some(PropertyValue::Integer(8192))
        );
        assert!(manager.get_feature(SECURE_PROCESSING).unwrap());
    }
}
