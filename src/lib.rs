//! # schema-factory
//!
//! Compiles W3C XML Schema documents once into an immutable, thread-safe
//! [`Schema`] and hands out cheap validation sessions ([`Validator`],
//! [`ValidatorHandler`]) that share it. Each session carries its own
//! configuration registry of features and properties, so concurrent sessions
//! never see each other's settings. libxml2 is the validation backend.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod components;
pub mod config;
pub mod constants;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod factory;
pub mod file_discovery;
pub mod grammar;
pub mod libxml2;
pub mod limits;
pub mod loader;
pub mod locator;
pub mod output;
pub mod pool_wrapper;
pub mod registry;
pub mod schema;
pub mod source;
pub mod stream_driver;
pub mod tree;
pub mod validator;

pub use batch::{BatchConfig, BatchValidator, FileValidationResult, ValidationResults, ValidationStatus};
pub use cache::DynamicGrammarCache;
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use error::{ConfigurationError, ConfigurationErrorKind, HandlerError, Result, SchemaError, SchemaParseException};
pub use error_handler::{Diagnostic, DiagnosticCollector, ErrorHandler, ErrorHandlerAdaptor, Severity};
pub use events::{ContentHandler, EventReader, EventWriter, QName, XmlEvent};
pub use factory::SchemaFactory;
pub use file_discovery::FileDiscovery;
pub use grammar::{Grammar, GrammarPool, XmlGrammarPool};
pub use limits::ResourceLimits;
pub use loader::{GrammarLoader, Xml2GrammarLoader};
pub use output::Output;
pub use pool_wrapper::GrammarPoolWrapper;
pub use registry::{ComponentManager, PropertyValue};
pub use schema::{Schema, SchemaVariant};
pub use source::{EventSource, PullSource, ResourceResolver, Source, StreamSource, TreeSource, ValidationOutput};
pub use stream_driver::StreamValidationDriver;
pub use tree::{Element, TreeBuilder};
pub use validator::{Validator, ValidatorHandler};
