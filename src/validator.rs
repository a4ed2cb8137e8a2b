//! Validation sessions.
//!
//! [`Validator`] validates one complete source per call; [`ValidatorHandler`]
//! is pushed events by an external producer. Both own one
//! [`ComponentManager`] and reset it at the start of every document.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::constants::XML_DOMAIN;
use crate::error::{Result, SchemaError, SchemaParseException};
use crate::error_handler::{ErrorHandler, Severity};
use crate::events::{ContentHandler, EventSerializer, EventWriter, XmlEvent};
use crate::locator::{RootInfo, resolve_system_id};
use crate::registry::{ComponentManager, PropertyValue};
use crate::source::{ResourceResolver, Source, ValidationOutput};
use crate::stream_driver::StreamValidationDriver;

/// Document being assembled from pushed events
#[derive(Debug, Default)]
pub(crate) struct DocumentState {
    serializer: EventSerializer,
    root: Option<RootInfo>,
    depth: usize,
    in_document: bool,
}

impl DocumentState {
    fn start(&mut self, manager: &mut ComponentManager) -> Result<()> {
        manager.reset()?;
        self.serializer.clear();
        self.root = None;
        self.depth = 0;
        self.in_document = true;
        Ok(())
    }

    /// Feed one event through the session's components.
    ///
    /// A failed event abandons the document, so the next event starts a
    /// fresh one.
    pub(crate) fn process(
        &mut self,
        manager: &mut ComponentManager,
        system_id: Option<&str>,
        event: &XmlEvent,
    ) -> Result<()> {
        let result = self.apply(manager, system_id, event);
        if result.is_err() {
            self.abandon();
        }
        result
    }

    pub(crate) fn abandon(&mut self) {
        self.serializer.clear();
        self.root = None;
        self.depth = 0;
        self.in_document = false;
    }

    fn apply(
        &mut self,
        manager: &mut ComponentManager,
        system_id: Option<&str>,
        event: &XmlEvent,
    ) -> Result<()> {
        if !self.in_document && !matches!(event, XmlEvent::StartDocument) {
            self.start(manager)?;
        }

        match event {
            XmlEvent::StartDocument => self.start(manager)?,
            XmlEvent::StartPrefixMapping { prefix, uri } => {
                manager
                    .components_mut()
                    .namespace_context
                    .declare_prefix(prefix.as_deref(), uri);
            }
            XmlEvent::StartElement { name, attributes } => {
                self.depth += 1;
                self.check_depth(manager, system_id)?;

                let components = manager.components_mut();
                if self.root.is_none() {
                    let mut bindings = components.namespace_context.bindings();
                    for qname in std::iter::once(name).chain(attributes.iter().map(|a| &a.name)) {
                        if let Some(ns) = &qname.namespace {
                            bindings.insert(qname.prefix.clone(), ns.clone());
                        }
                    }
                    let raw: Vec<(String, String)> = attributes
                        .iter()
                        .map(|a| (a.name.raw_name(), a.value.clone()))
                        .collect();
                    self.root = Some(RootInfo::from_parts(
                        name.prefix.clone(),
                        name.local_name.clone(),
                        &raw,
                        &bindings,
                    ));
                }
                components.namespace_context.push_context();
            }
            XmlEvent::EndElement { .. } => {
                self.depth = self.depth.saturating_sub(1);
                manager.components_mut().namespace_context.pop_context();
            }
            _ => {}
        }

        if !matches!(event, XmlEvent::EndDocument) {
            return self.serializer.write(event);
        }

        self.in_document = false;
        let document = self.serializer.as_bytes();
        if let Some(limits) = manager.components().entity_manager.limits() {
            limits.check_document_size(document.len(), system_id.unwrap_or("document"))?;
        }
        debug!(bytes = document.len(), "validating pushed document");
        let result = manager
            .components_mut()
            .validate_document(document, system_id, self.root.take());
        // Keeps the buffer's capacity for the next document
        self.serializer.clear();
        result
    }

    /// Close a document whose producer stopped before its end event
    pub(crate) fn is_open(&self) -> bool {
        self.in_document
    }

    fn check_depth(&self, manager: &mut ComponentManager, system_id: Option<&str>) -> Result<()> {
        let Some(limits) = manager.components().entity_manager.limits().copied() else {
            return Ok(());
        };
        if let Err(SchemaError::LimitExceeded { details }) = limits.check_element_depth(self.depth) {
            let exception = SchemaParseException::new(details)
                .with_system_id(system_id.map(str::to_string));
            manager.components_mut().error_reporter.report(
                Severity::FatalError,
                XML_DOMAIN,
                "MaxElementDepthLimit",
                &exception,
            )?;
        }
        Ok(())
    }
}

/// Adapts a pull-style writer to the push interface
pub(crate) struct WriterSink<'w>(pub(crate) &'w mut dyn EventWriter);

impl ContentHandler for WriterSink<'_> {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.0.write_event(event)
    }
}

/// Push handler borrowing a session: validates every event, then hands it on
pub(crate) struct PushValidator<'a> {
    manager: &'a mut ComponentManager,
    state: &'a mut DocumentState,
    system_id: Option<String>,
    downstream: Option<&'a mut dyn ContentHandler>,
}

impl<'a> PushValidator<'a> {
    pub(crate) fn new(
        manager: &'a mut ComponentManager,
        state: &'a mut DocumentState,
        system_id: Option<String>,
        downstream: Option<&'a mut dyn ContentHandler>,
    ) -> Self {
        Self {
            manager,
            state,
            system_id,
            downstream,
        }
    }

    /// End a document left open by its producer
    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.state.is_open() {
            self.handle_event(&XmlEvent::EndDocument)?;
        }
        Ok(())
    }

    /// Drop the downstream reference
    pub(crate) fn detach(&mut self) {
        self.downstream = None;
    }

    pub(crate) fn has_downstream(&self) -> bool {
        self.downstream.is_some()
    }
}

impl ContentHandler for PushValidator<'_> {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.state
            .process(self.manager, self.system_id.as_deref(), event)?;
        forward(&mut *self.state, self.downstream.as_deref_mut(), event)
    }
}

/// Pass an accepted event on; a refusing downstream ends the document
fn forward<'d>(
    state: &mut DocumentState,
    downstream: Option<&mut (dyn ContentHandler + 'd)>,
    event: &XmlEvent,
) -> Result<()> {
    let Some(downstream) = downstream else {
        return Ok(());
    };
    let result = downstream.handle_event(event);
    if result.is_err() {
        state.abandon();
    }
    result
}

/// Accessors shared by both session kinds
macro_rules! session_configuration {
    ($session:ty) => {
        impl $session {
            pub fn get_feature(&self, id: &str) -> Result<bool> {
                self.manager.get_feature(id)
            }

            pub fn set_feature(&mut self, id: &str, value: bool) -> Result<()> {
                self.manager.set_feature(id, value)
            }

            pub fn get_property(&self, id: &str) -> Result<Option<PropertyValue>> {
                self.manager.get_property(id)
            }

            pub fn set_property(&mut self, id: &str, value: Option<PropertyValue>) -> Result<()> {
                self.manager.set_property(id, value)
            }

            pub fn set_error_handler(&mut self, handler: Option<Arc<dyn ErrorHandler>>) -> Result<()> {
                self.manager.set_error_handler(handler)
            }

            pub fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
                self.manager.error_handler()
            }

            pub fn set_resource_resolver(
                &mut self,
                resolver: Option<Arc<dyn ResourceResolver>>,
            ) -> Result<()> {
                self.manager.set_resource_resolver(resolver)
            }

            pub fn resource_resolver(&self) -> Option<Arc<dyn ResourceResolver>> {
                self.manager.resource_resolver()
            }

            /// Whether an error or fatal error was reported during the last run
            pub fn had_error(&self) -> bool {
                self.manager.components().error_reporter.had_error()
            }

            /// Whether the last run found a grammar for its root element
            pub fn grammar_found(&self) -> Option<bool> {
                self.manager.components().validation_manager.grammar_found()
            }

            pub fn component_manager(&self) -> &ComponentManager {
                &self.manager
            }
        }
    };
}

/// One-shot validation session
pub struct Validator {
    manager: ComponentManager,
    state: DocumentState,
    stream_driver: Option<StreamValidationDriver>,
}

session_configuration!(Validator);

impl Validator {
    pub(crate) fn new(manager: ComponentManager) -> Self {
        Self {
            manager,
            state: DocumentState::default(),
            stream_driver: None,
        }
    }

    /// Validate `source`, copying the document to `output` when one is given.
    ///
    /// Supported pairs: stream to stream, events to events, tree to tree and
    /// pull to events. Any other pair fails before the source is read.
    pub fn validate(&mut self, source: Source, output: Option<ValidationOutput<'_>>) -> Result<()> {
        check_pair(&source, output.as_ref())?;

        let system_id = source.system_id().map(|id| resolve_system_id(id, None));
        match source {
            Source::Stream(stream) => {
                let document = self
                    .manager
                    .components()
                    .entity_manager
                    .open(&stream, None)?;
                self.manager.reset()?;
                self.manager
                    .components_mut()
                    .validate_document(&document, system_id.as_deref(), None)?;
                if let Some(ValidationOutput::Stream(writer)) = output {
                    writer.write_all(&document)?;
                    writer.flush()?;
                }
                Ok(())
            }
            Source::Events(events) => {
                let mut sink = match output {
                    Some(ValidationOutput::Events(writer)) => Some(WriterSink(writer)),
                    _ => None,
                };
                let downstream = sink.as_mut().map(|s| s as &mut dyn ContentHandler);
                self.push_all(&events.events, system_id, downstream)
            }
            Source::Tree(tree) => {
                let downstream = match output {
                    Some(ValidationOutput::Tree(builder)) => Some(builder as &mut dyn ContentHandler),
                    _ => None,
                };
                self.push_all(&tree.root.to_events(), system_id, downstream)
            }
            Source::Pull(_) => self
                .stream_driver
                .get_or_insert_with(StreamValidationDriver::new)
                .validate(&mut self.manager, source, output),
        }
    }

    /// Validate `source` without producing output
    pub fn validate_source(&mut self, source: impl Into<Source>) -> Result<()> {
        self.validate(source.into(), None)
    }

    /// Forget every caller setting and return to the configuration the
    /// session was created with
    pub fn reset(&mut self) {
        self.manager.restore_initial_state();
    }

    fn push_all<'a>(
        &'a mut self,
        events: &[XmlEvent],
        system_id: Option<String>,
        downstream: Option<&'a mut dyn ContentHandler>,
    ) -> Result<()> {
        let mut handler = PushValidator::new(&mut self.manager, &mut self.state, system_id, downstream);
        for event in events {
            handler.handle_event(event)?;
        }
        handler.finish()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Push-style validation session, usable as a sink in an event pipeline
pub struct ValidatorHandler {
    manager: ComponentManager,
    state: DocumentState,
    system_id: Option<String>,
    downstream: Option<Box<dyn ContentHandler + Send>>,
}

session_configuration!(ValidatorHandler);

impl ValidatorHandler {
    pub(crate) fn new(manager: ComponentManager) -> Self {
        Self {
            manager,
            state: DocumentState::default(),
            system_id: None,
            downstream: None,
        }
    }

    /// Handler receiving every event after it was validated
    pub fn set_content_handler(&mut self, handler: Option<Box<dyn ContentHandler + Send>>) {
        self.downstream = handler;
    }

    pub fn take_content_handler(&mut self) -> Option<Box<dyn ContentHandler + Send>> {
        self.downstream.take()
    }

    /// System id used in reports and to resolve relative location hints
    pub fn set_document_system_id(&mut self, system_id: Option<&str>) {
        self.system_id = system_id.map(|id| resolve_system_id(id, None));
    }

    /// Forget every caller setting, including the downstream handler
    pub fn reset(&mut self) {
        self.manager.restore_initial_state();
        self.state = DocumentState::default();
        self.downstream = None;
    }
}

impl ContentHandler for ValidatorHandler {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.state
            .process(&mut self.manager, self.system_id.as_deref(), event)?;
        let downstream = self
            .downstream
            .as_deref_mut()
            .map(|d| d as &mut dyn ContentHandler);
        forward(&mut self.state, downstream, event)
    }
}

impl fmt::Debug for ValidatorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorHandler")
            .field("manager", &self.manager)
            .field("system_id", &self.system_id)
            .field("downstream", &self.downstream.is_some())
            .finish()
    }
}

fn check_pair(source: &Source, output: Option<&ValidationOutput<'_>>) -> Result<()> {
    let supported = match (source, output) {
        (_, None) => true,
        (Source::Stream(_), Some(ValidationOutput::Stream(_)))
        | (Source::Events(_), Some(ValidationOutput::Events(_)))
        | (Source::Tree(_), Some(ValidationOutput::Tree(_)))
        | (Source::Pull(_), Some(ValidationOutput::Events(_))) => true,
        _ => false,
    };
    match output {
        Some(output) if !supported => Err(SchemaError::SourceResultMismatch {
            source_kind: source.kind(),
            result_kind: output.kind(),
        }),
        _ => Ok(()),
    }
}
