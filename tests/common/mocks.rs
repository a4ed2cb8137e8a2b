use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use schema_factory::error::{HandlerError, LoadError, Result, SchemaParseException};
use schema_factory::error_handler::{Diagnostic, ErrorHandler, Severity};
use schema_factory::grammar::{
    Grammar, GrammarDescription, GrammarKind, GrammarPool, SchemaModel, ValidateOptions,
};
use schema_factory::loader::{GrammarLoader, LoadContext};
use schema_factory::source::Source;

/// Schema model that rejects documents containing a marker
#[derive(Debug, Default)]
pub struct StubModel {
    reject_marker: Option<String>,
    validations: AtomicUsize,
}

impl StubModel {
    pub fn accept_all() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            reject_marker: Some(marker.to_string()),
            validations: AtomicUsize::new(0),
        })
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

impl SchemaModel for StubModel {
    fn validate(&self, document: &[u8], options: &ValidateOptions) -> Result<Vec<Diagnostic>> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(document);
        match &self.reject_marker {
            Some(marker) if text.contains(marker.as_str()) => Ok(vec![Diagnostic::new(
                Severity::Error,
                "cvc-complex-type.2.4.a",
                SchemaParseException::new(format!("Invalid content was found: '{}'", marker))
                    .with_system_id(options.system_id.clone()),
            )]),
            _ => Ok(Vec::new()),
        }
    }
}

pub fn stub_grammar(namespace: Option<&str>, model: Arc<StubModel>) -> Arc<Grammar> {
    Arc::new(Grammar::new(
        GrammarDescription::xml_schema(namespace),
        None,
        model,
    ))
}

/// Loader that caches one stub grammar per namespace it was configured with
#[derive(Debug)]
pub struct StubLoader {
    namespaces: Vec<Option<String>>,
    model: Arc<StubModel>,
    delay: Option<Duration>,
    fail_with: Option<String>,
    fail_once: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Option<String>>>,
    pool_sizes: Mutex<Vec<usize>>,
}

impl StubLoader {
    pub fn new(namespaces: &[Option<&str>], model: Arc<StubModel>) -> Self {
        Self {
            namespaces: namespaces.iter().map(|ns| ns.map(str::to_string)).collect(),
            model,
            delay: None,
            fail_with: None,
            fail_once: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            pool_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Sleep inside every load, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report a fatal error with `message` instead of loading
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    /// Fail only the first load, after caching its grammars into the pool
    pub fn failing_once(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self.fail_once = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// System ids of every source handed to the loader
    pub fn seen_system_ids(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }

    /// Grammars already in the pool when each load started
    pub fn pool_sizes_on_entry(&self) -> Vec<usize> {
        self.pool_sizes.lock().unwrap().clone()
    }
}

impl GrammarLoader for StubLoader {
    fn load_grammars(
        &self,
        sources: &[Source],
        pool: &dyn GrammarPool,
        context: &mut LoadContext<'_>,
    ) -> std::result::Result<(), LoadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .unwrap()
            .extend(sources.iter().map(|s| s.system_id().map(str::to_string)));
        self.pool_sizes
            .lock()
            .unwrap()
            .push(pool.retrieve_initial_grammar_set(GrammarKind::XmlSchema).len());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let grammars = self
            .namespaces
            .iter()
            .map(|ns| stub_grammar(ns.as_deref(), self.model.clone()))
            .collect();
        if let Some(message) = &self.fail_with
            && !(self.fail_once && call > 1)
        {
            if self.fail_once {
                // Leave a half-filled pool behind
                pool.cache_grammars(GrammarKind::XmlSchema, grammars);
            }
            return Err(context.fail("s4s-elt-invalid", SchemaParseException::new(message.clone())));
        }

        pool.cache_grammars(GrammarKind::XmlSchema, grammars);
        Ok(())
    }
}

/// Handler recording every report; optionally refuses errors
#[derive(Debug, Default)]
pub struct RecordingHandler {
    reports: Mutex<Vec<(Severity, String)>>,
    reject_errors: bool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_errors() -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(Vec::new()),
            reject_errors: true,
        })
    }

    pub fn reports(&self) -> Vec<(Severity, String)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn severities(&self) -> Vec<Severity> {
        self.reports().into_iter().map(|(s, _)| s).collect()
    }

    fn record(&self, severity: Severity, exception: &SchemaParseException) {
        self.reports
            .lock()
            .unwrap()
            .push((severity, exception.message.clone()));
    }
}

impl ErrorHandler for RecordingHandler {
    fn warning(&self, exception: &SchemaParseException) -> std::result::Result<(), HandlerError> {
        self.record(Severity::Warning, exception);
        Ok(())
    }

    fn error(&self, exception: &SchemaParseException) -> std::result::Result<(), HandlerError> {
        self.record(Severity::Error, exception);
        if self.reject_errors {
            return Err(HandlerError::Rejected(exception.clone()));
        }
        Ok(())
    }

    fn fatal_error(&self, exception: &SchemaParseException) -> std::result::Result<(), HandlerError> {
        self.record(Severity::FatalError, exception);
        if self.reject_errors {
            return Err(HandlerError::Rejected(exception.clone()));
        }
        Ok(())
    }
}
