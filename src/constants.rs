//! Feature and property identifiers understood by the factory and by
//! validation sessions.

// Features
pub const SECURE_PROCESSING: &str = "http://javax.xml.XMLConstants/feature/secure-processing";
pub const VALIDATION: &str = "http://xml.org/sax/features/validation";
pub const SCHEMA_VALIDATION: &str = "http://apache.org/xml/features/validation/schema";
pub const SCHEMA_FULL_CHECKING: &str =
    "http://apache.org/xml/features/validation/schema-full-checking";
pub const USE_GRAMMAR_POOL_ONLY: &str =
    "http://apache.org/xml/features/internal/validation/schema/use-grammar-pool-only";
pub const PARSER_SETTINGS: &str = "http://apache.org/xml/features/internal/parser-settings";
pub const CONTINUE_AFTER_FATAL_ERROR: &str =
    "http://apache.org/xml/features/continue-after-fatal-error";
pub const NAMESPACE_GROWTH: &str = "http://apache.org/xml/features/namespace-growth";

// Properties owned by session components (read-only for callers)
pub const SYMBOL_TABLE: &str = "http://apache.org/xml/properties/internal/symbol-table";
pub const ENTITY_MANAGER: &str = "http://apache.org/xml/properties/internal/entity-manager";
pub const ERROR_REPORTER: &str = "http://apache.org/xml/properties/internal/error-reporter";
pub const NAMESPACE_CONTEXT: &str = "http://apache.org/xml/properties/internal/namespace-context";
pub const SCHEMA_VALIDATOR: &str = "http://apache.org/xml/properties/internal/validator/schema";
pub const VALIDATION_MANAGER: &str =
    "http://apache.org/xml/properties/internal/validation-manager";
pub const XMLGRAMMAR_POOL: &str = "http://apache.org/xml/properties/internal/grammar-pool";

// Ordinary properties
pub const ERROR_HANDLER: &str = "http://apache.org/xml/properties/internal/error-handler";
pub const ENTITY_RESOLVER: &str = "http://apache.org/xml/properties/internal/entity-resolver";
pub const SECURITY_MANAGER: &str = "http://apache.org/xml/properties/security-manager";
pub const INPUT_BUFFER_SIZE: &str = "http://apache.org/xml/properties/input-buffer-size";
pub const SCHEMA_LOCATION: &str =
    "http://apache.org/xml/properties/schema/external-schemaLocation";
pub const SCHEMA_NONS_LOCATION: &str =
    "http://apache.org/xml/properties/schema/external-noNamespaceSchemaLocation";

/// Namespace of the XML Schema instance attributes (`xsi:`)
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Error domain used for schema constraint reports
pub const XML_SCHEMA_DOMAIN: &str = "http://www.w3.org/TR/xml-schema-1";

/// Error domain used for well-formedness and resource reports
pub const XML_DOMAIN: &str = "http://www.w3.org/TR/1998/REC-xml-19980210";

/// Default size of the input buffer used when reading streams
pub const DEFAULT_INPUT_BUFFER_SIZE: i64 = 8192;
