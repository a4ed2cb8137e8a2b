use std::fmt;

use thiserror::Error;

/// Main library error type that encompasses every failure a factory or a
/// validation session can raise
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Source parameter #{index} of kind '{kind}' is not accepted: {reason}")]
    UnsupportedSource {
        index: usize,
        kind: &'static str,
        reason: String,
    },

    #[error("Schema parsing error: {0}")]
    Parse(SchemaParseException),

    #[error("Fatal error: {0}")]
    Fatal(SchemaParseException),

    #[error("Error handler aborted the operation: {0}")]
    Handler(#[from] HandlerError),

    #[error("Source of kind '{source_kind}' cannot be validated into a result of kind '{result_kind}'")]
    SourceResultMismatch {
        source_kind: &'static str,
        result_kind: &'static str,
    },

    #[error("Resource limit exceeded: {details}")]
    LimitExceeded { details: String },

    #[error("LibXML2 internal error: {0}")]
    LibXml2(#[from] LibXml2Error),
}

/// Which kind of identifier a configuration call addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTarget {
    Feature,
    Property,
}

impl fmt::Display for ConfigTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigTarget::Feature => f.write_str("Feature"),
            ConfigTarget::Property => f.write_str("Property"),
        }
    }
}

/// Classification of a rejected feature/property call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationErrorKind {
    /// The identifier is unknown to the registry
    NotRecognized,
    /// The identifier is known but the requested access is forbidden
    NotSupported,
}

impl fmt::Display for ConfigurationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationErrorKind::NotRecognized => f.write_str("not recognized"),
            ConfigurationErrorKind::NotSupported => f.write_str("not supported"),
        }
    }
}

/// A feature/property call that was refused. Never corrupts registry state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{target} '{identifier}' is {kind}")]
pub struct ConfigurationError {
    pub target: ConfigTarget,
    pub kind: ConfigurationErrorKind,
    pub identifier: String,
}

impl ConfigurationError {
    pub fn feature_not_recognized(identifier: &str) -> Self {
        Self::new(ConfigTarget::Feature, ConfigurationErrorKind::NotRecognized, identifier)
    }

    pub fn feature_not_supported(identifier: &str) -> Self {
        Self::new(ConfigTarget::Feature, ConfigurationErrorKind::NotSupported, identifier)
    }

    pub fn property_not_recognized(identifier: &str) -> Self {
        Self::new(ConfigTarget::Property, ConfigurationErrorKind::NotRecognized, identifier)
    }

    pub fn property_not_supported(identifier: &str) -> Self {
        Self::new(ConfigTarget::Property, ConfigurationErrorKind::NotSupported, identifier)
    }

    fn new(target: ConfigTarget, kind: ConfigurationErrorKind, identifier: &str) -> Self {
        Self {
            target,
            kind,
            identifier: identifier.to_string(),
        }
    }
}

/// Positional report delivered to error handlers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaParseException {
    pub message: String,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SchemaParseException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_system_id(mut self, system_id: Option<String>) -> Self {
        self.system_id = system_id;
        self
    }

    pub fn with_public_id(mut self, public_id: Option<String>) -> Self {
        self.public_id = public_id;
        self
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

impl fmt::Display for SchemaParseException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(system_id) = &self.system_id {
            write!(f, "{}:", system_id)?;
        }
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{}: ", line, column)?,
            (Some(line), None) => write!(f, "{}: ", line)?,
            _ if self.system_id.is_some() => f.write_str(" ")?,
            _ => {}
        }
        f.write_str(&self.message)
    }
}

/// Failure raised by a caller-supplied error handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler refused the report it was given
    #[error("{0}")]
    Rejected(SchemaParseException),

    /// The handler aborted for a reason of its own
    #[error("{message}")]
    Aborted { message: String },
}

impl HandlerError {
    pub fn aborted(message: impl Into<String>) -> Self {
        HandlerError::Aborted {
            message: message.into(),
        }
    }
}

/// Failures raised by a grammar loader
#[derive(Error, Debug)]
pub enum LoadError {
    /// The loader already delivered this failure to the error reporter
    #[error("{0}")]
    Reported(SchemaParseException),

    /// The error handler refused a report while the loader was running
    #[error(transparent)]
    Handler(HandlerError),

    /// Nobody has seen this failure yet
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: null pointer returned")]
    SchemaParseFailed,

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Document of {size} bytes is too large for libxml2")]
    DocumentTooLarge { size: usize },

    #[error("Invalid input for libxml2: {details}")]
    InvalidInput { details: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SchemaError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::feature_not_recognized("urn:unknown");
        assert_eq!(err.to_string(), "Feature 'urn:unknown' is not recognized");
        assert_eq!(err.kind, ConfigurationErrorKind::NotRecognized);

        let err = ConfigurationError::property_not_supported("urn:pool");
        assert_eq!(err.to_string(), "Property 'urn:pool' is not supported");
        assert_eq!(err.target, ConfigTarget::Property);
    }

    #[test]
    fn test_parse_exception_display() {
        let located = SchemaParseException::new("Element 'x' is not allowed")
            .with_system_id(Some("file:///doc.xml".to_string()))
            .at(Some(3), Some(7));
        assert_eq!(
            located.to_string(),
            "file:///doc.xml:3:7: Element 'x' is not allowed"
        );

        let bare = SchemaParseException::new("boom");
        assert_eq!(bare.to_string(), "boom");

        let line_only = SchemaParseException::new("boom").at(Some(2), None);
        assert_eq!(line_only.to_string(), "2: boom");
    }

    #[test]
    fn test_mismatch_display_names_both_kinds() {
        let err = SchemaError::SourceResultMismatch {
            source_kind: "PullSource",
            result_kind: "TreeOutput",
        };
        let text = err.to_string();
        assert!(text.contains("PullSource"));
        assert!(text.contains("TreeOutput"));
    }

    #[test]
    fn test_unsupported_source_display() {
        let err = SchemaError::UnsupportedSource {
            index: 2,
            kind: "PullSource",
            reason: "pull sources cannot be compiled".to_string(),
        };
        assert!(err.to_string().contains("#2"));
        assert!(err.to_string().contains("PullSource"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = SchemaError::Io(io_error);

        assert!(err.source().is_some());
        assert_eq!(err.source().unwrap().to_string(), "File not found");
    }

    #[test]
    fn test_libxml2_error_conversion() {
        let err: SchemaError = LibXml2Error::SchemaParseFailed.into();
        assert!(matches!(err, SchemaError::LibXml2(LibXml2Error::SchemaParseFailed)));
    }
}
