//! Caller-facing error handlers and the adaptor that bridges them to the
//! internal `(domain, key, exception)` reporting shape.
//!
//! Handler failures are returned, never thrown through the reporting call
//! site: every internal report returns `Result<(), HandlerError>` and the
//! session or factory that started the operation surfaces the failure as
//! [`SchemaError::Handler`](crate::error::SchemaError::Handler).

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::{HandlerError, SchemaParseException};

/// Severity of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    FatalError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
            Severity::FatalError => f.write_str("fatal error"),
        }
    }
}

/// One report produced by a grammar loader or a schema model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Message key, e.g. `cvc-elt.1.a` or a backend error code
    pub key: String,
    pub exception: SchemaParseException,
}

impl Diagnostic {
    pub fn new(severity: Severity, key: impl Into<String>, exception: SchemaParseException) -> Self {
        Self {
            severity,
            key: key.into(),
            exception,
        }
    }
}

/// Three-method handler installed by callers on a factory or a session
pub trait ErrorHandler: Send + Sync {
    fn warning(&self, exception: &SchemaParseException) -> Result<(), HandlerError>;
    fn error(&self, exception: &SchemaParseException) -> Result<(), HandlerError>;
    fn fatal_error(&self, exception: &SchemaParseException) -> Result<(), HandlerError>;
}

/// Handler used when the caller installed none: errors abort, warnings vanish
#[derive(Debug, Clone, Copy, Default)]
pub struct DraconianErrorHandler;

impl ErrorHandler for DraconianErrorHandler {
    fn warning(&self, _exception: &SchemaParseException) -> Result<(), HandlerError> {
        Ok(())
    }

    fn error(&self, exception: &SchemaParseException) -> Result<(), HandlerError> {
        Err(HandlerError::Rejected(exception.clone()))
    }

    fn fatal_error(&self, exception: &SchemaParseException) -> Result<(), HandlerError> {
        Err(HandlerError::Rejected(exception.clone()))
    }
}

/// Records every report and never raises
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    reports: Mutex<Vec<(Severity, SchemaParseException)>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far
    pub fn reports(&self) -> Vec<(Severity, SchemaParseException)> {
        self.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.lock().iter().filter(|(s, _)| *s == severity).count()
    }

    /// Messages of error and fatal reports
    pub fn error_messages(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(s, _)| *s != Severity::Warning)
            .map(|(_, e)| e.to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, severity: Severity, exception: &SchemaParseException) {
        self.lock().push((severity, exception.clone()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Severity, SchemaParseException)>> {
        // A poisoned collector still holds valid reports
        self.reports.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ErrorHandler for DiagnosticCollector {
    fn warning(&self, exception: &SchemaParseException) -> Result<(), HandlerError> {
        self.record(Severity::Warning, exception);
        Ok(())
    }

    fn error(&self, exception: &SchemaParseException) -> Result<(), HandlerError> {
        self.record(Severity::Error, exception);
        Ok(())
    }

    fn fatal_error(&self, exception: &SchemaParseException) -> Result<(), HandlerError> {
        self.record(Severity::FatalError, exception);
        Ok(())
    }
}

/// Bridges internal three-severity reports to one caller handler and keeps a
/// sticky "had error" flag
#[derive(Clone, Default)]
pub struct ErrorHandlerAdaptor {
    handler: Option<Arc<dyn ErrorHandler>>,
    had_error: bool,
}

impl ErrorHandlerAdaptor {
    pub fn new(handler: Option<Arc<dyn ErrorHandler>>) -> Self {
        Self {
            handler,
            had_error: false,
        }
    }

    pub fn set_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) {
        self.handler = handler;
    }

    pub fn handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.handler.as_ref()
    }

    pub fn warning(
        &mut self,
        domain: &str,
        key: &str,
        exception: &SchemaParseException,
    ) -> Result<(), HandlerError> {
        trace!(domain, key, "forwarding warning");
        self.target().warning(exception)
    }

    pub fn error(
        &mut self,
        domain: &str,
        key: &str,
        exception: &SchemaParseException,
    ) -> Result<(), HandlerError> {
        self.had_error = true;
        trace!(domain, key, "forwarding error");
        self.target().error(exception)
    }

    pub fn fatal_error(
        &mut self,
        domain: &str,
        key: &str,
        exception: &SchemaParseException,
    ) -> Result<(), HandlerError> {
        self.had_error = true;
        trace!(domain, key, "forwarding fatal error");
        self.target().fatal_error(exception)
    }

    /// Dispatch on severity
    pub fn report(
        &mut self,
        severity: Severity,
        domain: &str,
        key: &str,
        exception: &SchemaParseException,
    ) -> Result<(), HandlerError> {
        match severity {
            Severity::Warning => self.warning(domain, key, exception),
            Severity::Error => self.error(domain, key, exception),
            Severity::FatalError => self.fatal_error(domain, key, exception),
        }
    }

    /// True when an error or fatal error was reported since the last reset
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn reset(&mut self) {
        self.had_error = false;
    }

    fn target(&self) -> &dyn ErrorHandler {
        match &self.handler {
            Some(handler) => handler.as_ref(),
            None => &DraconianErrorHandler,
        }
    }
}

impl fmt::Debug for ErrorHandlerAdaptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerAdaptor")
            .field("custom_handler", &self.handler.is_some())
            .field("had_error", &self.had_error)
            .finish()
    }
}
