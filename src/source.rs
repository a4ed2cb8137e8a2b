//! Input sources, validation outputs and external resource resolution.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, SchemaError};
use crate::events::{EventReader, EventWriter, XmlEvent};
use crate::limits::ResourceLimits;
use crate::tree::{Element, TreeBuilder};

/// Resource kind passed to resolvers when a schema document is requested
pub const W3C_XML_SCHEMA_NS_URI: &str = "http://www.w3.org/2001/XMLSchema";

/// Raw document content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes(Vec<u8>),
    Text(String),
}

impl Content {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Bytes(bytes) => bytes,
            Content::Text(text) => text.as_bytes(),
        }
    }
}

/// Byte/char stream with optional public and system identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSource {
    pub content: Option<Content>,
    pub public_id: Option<String>,
    pub system_id: Option<String>,
}

impl StreamSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Some(Content::Bytes(bytes.into())),
            ..Self::default()
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content::Text(text.into())),
            ..Self::default()
        }
    }

    /// Stream that will be opened through the resolver or the file system
    pub fn from_system_id(system_id: impl Into<String>) -> Self {
        Self {
            system_id: Some(system_id.into()),
            ..Self::default()
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::from_system_id(path.display().to_string())
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    /// A stream with neither content nor a system id cannot be opened
    pub fn is_blank(&self) -> bool {
        self.content.is_none() && self.system_id.is_none()
    }
}

/// Recorded push events, replayed into a handler, plus an optional resolver
#[derive(Clone, Default)]
pub struct EventSource {
    pub events: Vec<XmlEvent>,
    pub resolver: Option<Arc<dyn ResourceResolver>>,
    pub system_id: Option<String>,
}

impl EventSource {
    pub fn new(events: Vec<XmlEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("events", &self.events.len())
            .field("resolver", &self.resolver.is_some())
            .field("system_id", &self.system_id)
            .finish()
    }
}

/// In-memory element tree with an optional system id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSource {
    pub root: Element,
    pub system_id: Option<String>,
}

impl TreeSource {
    pub fn new(root: Element) -> Self {
        Self {
            root,
            system_id: None,
        }
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }
}

/// Pull-style event producer
pub struct PullSource {
    pub reader: Box<dyn EventReader>,
    pub system_id: Option<String>,
}

impl PullSource {
    pub fn new(reader: impl EventReader + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            system_id: None,
        }
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }
}

impl fmt::Debug for PullSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullSource")
            .field("system_id", &self.system_id)
            .finish_non_exhaustive()
    }
}

/// Every input shape a factory or a validation session can be handed
#[derive(Debug)]
pub enum Source {
    Stream(StreamSource),
    Events(EventSource),
    Tree(TreeSource),
    Pull(PullSource),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Stream(_) => "StreamSource",
            Source::Events(_) => "EventSource",
            Source::Tree(_) => "TreeSource",
            Source::Pull(_) => "PullSource",
        }
    }

    pub fn system_id(&self) -> Option<&str> {
        match self {
            Source::Stream(s) => s.system_id.as_deref(),
            Source::Events(s) => s.system_id.as_deref(),
            Source::Tree(s) => s.system_id.as_deref(),
            Source::Pull(s) => s.system_id.as_deref(),
        }
    }
}

impl From<StreamSource> for Source {
    fn from(source: StreamSource) -> Self {
        Source::Stream(source)
    }
}

impl From<EventSource> for Source {
    fn from(source: EventSource) -> Self {
        Source::Events(source)
    }
}

impl From<TreeSource> for Source {
    fn from(source: TreeSource) -> Self {
        Source::Tree(source)
    }
}

impl From<PullSource> for Source {
    fn from(source: PullSource) -> Self {
        Source::Pull(source)
    }
}

/// Where a validation run copies the document it validated
pub enum ValidationOutput<'a> {
    Stream(&'a mut dyn Write),
    Events(&'a mut dyn EventWriter),
    Tree(&'a mut TreeBuilder),
}

impl ValidationOutput<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationOutput::Stream(_) => "StreamOutput",
            ValidationOutput::Events(_) => "EventOutput",
            ValidationOutput::Tree(_) => "TreeOutput",
        }
    }
}

/// Request handed to a [`ResourceResolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest<'a> {
    pub kind: &'a str,
    pub namespace: Option<&'a str>,
    pub public_id: Option<&'a str>,
    pub system_id: Option<&'a str>,
    pub base_uri: Option<&'a str>,
}

/// Caller-installed translation of external identifiers into streams.
///
/// Returning `None` falls back to default resolution.
pub trait ResourceResolver: Send + Sync {
    fn resolve_resource(&self, request: &ResourceRequest<'_>) -> Option<StreamSource>;
}

impl<F> ResourceResolver for F
where
    F: Fn(&ResourceRequest<'_>) -> Option<StreamSource> + Send + Sync,
{
    fn resolve_resource(&self, request: &ResourceRequest<'_>) -> Option<StreamSource> {
        self(request)
    }
}

/// Read the bytes behind a stream source.
///
/// Inline content wins; otherwise the resolver is asked, and finally the
/// system id is opened as a local file. Network schemes are not fetched.
pub fn open_stream(
    stream: &StreamSource,
    namespace: Option<&str>,
    base_uri: Option<&str>,
    resolver: Option<&dyn ResourceResolver>,
    limits: Option<&ResourceLimits>,
) -> Result<Vec<u8>> {
    let bytes = match (&stream.content, &stream.system_id) {
        (Some(content), _) => content.as_bytes().to_vec(),
        (None, Some(system_id)) => {
            let request = ResourceRequest {
                kind: W3C_XML_SCHEMA_NS_URI,
                namespace,
                public_id: stream.public_id.as_deref(),
                system_id: Some(system_id),
                base_uri,
            };
            match resolver.and_then(|r| r.resolve_resource(&request)) {
                Some(StreamSource {
                    content: Some(content),
                    ..
                }) => content.as_bytes().to_vec(),
                Some(StreamSource {
                    system_id: Some(redirected),
                    ..
                }) => read_system_id(&redirected)?,
                _ => read_system_id(system_id)?,
            }
        }
        (None, None) => {
            return Err(SchemaError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "stream source has neither content nor a system id",
            )));
        }
    };

    if let Some(limits) = limits {
        let what = stream.system_id.as_deref().unwrap_or("document");
        limits.check_document_size(bytes.len(), what)?;
    }
    Ok(bytes)
}

/// Default resolution of a system id: local paths and `file:` URLs only
pub fn read_system_id(system_id: &str) -> Result<Vec<u8>> {
    if system_id.starts_with("http://") || system_id.starts_with("https://") {
        return Err(SchemaError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("network resolution is not available for {}", system_id),
        )));
    }
    let path = system_id.strip_prefix("file://").unwrap_or(system_id);
    std::fs::read(path).map_err(|e| {
        SchemaError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", system_id, e),
        ))
    })
}
