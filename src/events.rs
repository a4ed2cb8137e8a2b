//! XML event model shared by push-style handlers and pull-style readers.
//!
//! The validation backend consumes serialized bytes, so this module also
//! carries the serializer that turns an event stream back into a
//! well-formed document.

use std::fmt;

use crate::error::{Result, SchemaError};

/// Qualified XML name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
}

impl QName {
    /// Unqualified name in no namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace: None,
        }
    }

    /// Name in a namespace bound to the default (unprefixed) declaration
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Prefixed name in a namespace
    pub fn prefixed(
        prefix: impl Into<String>,
        namespace: impl Into<String>,
        local_name: impl Into<String>,
    ) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local_name: local_name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Name as written in the document (`prefix:local` or `local`)
    pub fn raw_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// Attribute attached to a start-element event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// One construct of an XML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartDocument,
    EndDocument,
    StartPrefixMapping {
        prefix: Option<String>,
        uri: String,
    },
    EndPrefixMapping {
        prefix: Option<String>,
    },
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QName,
    },
    Characters(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

/// Push-style sink: driven by an external producer, one call per construct
pub trait ContentHandler {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()>;
}

/// Pull-style producer: must be advanced by its consumer
pub trait EventReader {
    /// Next event, or `None` once the stream is exhausted
    fn next_event(&mut self) -> Result<Option<XmlEvent>>;
}

/// Pull-style output: receives events written by a consumer
pub trait EventWriter {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()>;
}

impl ContentHandler for Vec<XmlEvent> {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}

impl EventWriter for Vec<XmlEvent> {
    fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}

/// Reader over an in-memory list of events
#[derive(Debug)]
pub struct VecEventReader {
    events: std::vec::IntoIter<XmlEvent>,
}

impl VecEventReader {
    pub fn new(events: Vec<XmlEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

impl EventReader for VecEventReader {
    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        Ok(self.events.next())
    }
}

/// Serializes an event stream into UTF-8 XML.
///
/// Namespace declarations come from explicit prefix-mapping events; names
/// whose namespace is not in scope get a declaration added on the element
/// that first uses them.
#[derive(Debug, Default)]
pub struct EventSerializer {
    output: Vec<u8>,
    pending: Vec<(Option<String>, String)>,
    scopes: Vec<Vec<(Option<String>, String)>>,
}

impl EventSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.output
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.output
    }

    /// Drop everything written so far
    pub fn clear(&mut self) {
        self.output.clear();
        self.pending.clear();
        self.scopes.clear();
    }

    pub fn write(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartDocument => {
                self.output
                    .extend_from_slice(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
            }
            XmlEvent::EndDocument | XmlEvent::EndPrefixMapping { .. } => {}
            XmlEvent::StartPrefixMapping { prefix, uri } => {
                self.pending.push((prefix.clone(), uri.clone()));
            }
            XmlEvent::StartElement { name, attributes } => {
                self.start_element(name, attributes);
            }
            XmlEvent::EndElement { name } => {
                if self.scopes.pop().is_none() {
                    return Err(SchemaError::Parse(crate::error::SchemaParseException::new(
                        format!("End tag '{}' has no matching start tag", name.raw_name()),
                    )));
                }
                self.output.extend_from_slice(b"</");
                self.output.extend_from_slice(name.raw_name().as_bytes());
                self.output.push(b'>');
            }
            XmlEvent::Characters(text) => {
                escape_into(&mut self.output, text, false);
            }
            XmlEvent::Comment(text) => {
                self.output.extend_from_slice(b"<!--");
                self.output.extend_from_slice(text.as_bytes());
                self.output.extend_from_slice(b"-->");
            }
            XmlEvent::ProcessingInstruction { target, data } => {
                self.output.extend_from_slice(b"<?");
                self.output.extend_from_slice(target.as_bytes());
                if !data.is_empty() {
                    self.output.push(b' ');
                    self.output.extend_from_slice(data.as_bytes());
                }
                self.output.extend_from_slice(b"?>");
            }
        }
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) {
        let mut declared = std::mem::take(&mut self.pending);

        let mut needs = vec![name];
        needs.extend(
            attributes
                .iter()
                .map(|a| &a.name)
                .filter(|n| n.prefix.is_some()),
        );
        for qname in needs {
            if let Some(ns) = &qname.namespace
                && self.lookup(&declared, qname.prefix.as_deref()) != Some(ns.as_str())
            {
                declared.push((qname.prefix.clone(), ns.clone()));
            }
        }

        self.output.push(b'<');
        self.output.extend_from_slice(name.raw_name().as_bytes());
        for (prefix, uri) in &declared {
            match prefix {
                Some(p) => {
                    self.output.extend_from_slice(b" xmlns:");
                    self.output.extend_from_slice(p.as_bytes());
                }
                None => self.output.extend_from_slice(b" xmlns"),
            }
            self.output.extend_from_slice(b"=\"");
            escape_into(&mut self.output, uri, true);
            self.output.push(b'"');
        }
        for attribute in attributes {
            self.output.push(b' ');
            self.output
                .extend_from_slice(attribute.name.raw_name().as_bytes());
            self.output.extend_from_slice(b"=\"");
            escape_into(&mut self.output, &attribute.value, true);
            self.output.push(b'"');
        }
        self.output.push(b'>');
        self.scopes.push(declared);
    }

    fn lookup<'a>(
        &'a self,
        current: &'a [(Option<String>, String)],
        prefix: Option<&str>,
    ) -> Option<&'a str> {
        current
            .iter()
            .rev()
            .chain(self.scopes.iter().rev().flat_map(|s| s.iter().rev()))
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

/// Serialize a complete event list
pub fn serialize_events(events: &[XmlEvent]) -> Result<Vec<u8>> {
    let mut serializer = EventSerializer::new();
    for event in events {
        serializer.write(event)?;
    }
    Ok(serializer.into_bytes())
}

fn escape_into(out: &mut Vec<u8>, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '"' if attribute => out.extend_from_slice(b"&quot;"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(events: &[XmlEvent]) -> String {
        String::from_utf8(serialize_events(events).unwrap()).unwrap()
    }

    #[test]
    fn test_serialize_simple_document() {
        let events = vec![
            XmlEvent::StartDocument,
            XmlEvent::StartElement {
                name: QName::local("root"),
                attributes: vec![Attribute::new(QName::local("id"), "a\"b")],
            },
            XmlEvent::Characters("1 < 2 & 3".to_string()),
            XmlEvent::EndElement {
                name: QName::local("root"),
            },
            XmlEvent::EndDocument,
        ];

        let xml = to_string(&events);
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.ends_with("<root id=\"a&quot;b\">1 &lt; 2 &amp; 3</root>"));
    }

    #[test]
    fn test_serialize_declares_missing_namespaces_once() {
        let ns = "urn:example";
        let events = vec![
            XmlEvent::StartElement {
                name: QName::namespaced(ns, "root"),
                attributes: vec![],
            },
            XmlEvent::StartElement {
                name: QName::namespaced(ns, "child"),
                attributes: vec![],
            },
            XmlEvent::EndElement {
                name: QName::namespaced(ns, "child"),
            },
            XmlEvent::EndElement {
                name: QName::namespaced(ns, "root"),
            },
        ];

        let xml = to_string(&events);
        assert_eq!(
            xml,
            "<root xmlns=\"urn:example\"><child></child></root>"
        );
    }

    #[test]
    fn test_serialize_uses_explicit_prefix_mappings() {
        let events = vec![
            XmlEvent::StartPrefixMapping {
                prefix: Some("p".to_string()),
                uri: "urn:p".to_string(),
            },
            XmlEvent::StartElement {
                name: QName::prefixed("p", "urn:p", "root"),
                attributes: vec![],
            },
            XmlEvent::EndElement {
                name: QName::prefixed("p", "urn:p", "root"),
            },
            XmlEvent::EndPrefixMapping {
                prefix: Some("p".to_string()),
            },
        ];

        assert_eq!(to_string(&events), "<p:root xmlns:p=\"urn:p\"></p:root>");
    }

    #[test]
    fn test_unbalanced_end_tag_is_rejected() {
        let events = vec![XmlEvent::EndElement {
            name: QName::local("root"),
        }];
        assert!(serialize_events(&events).is_err());
    }

    #[test]
    fn test_vec_reader_drains_in_order() {
        let mut reader = VecEventReader::new(vec![XmlEvent::StartDocument, XmlEvent::EndDocument]);
        assert_eq!(reader.next_event().unwrap(), Some(XmlEvent::StartDocument));
        assert_eq!(reader.next_event().unwrap(), Some(XmlEvent::EndDocument));
        assert_eq!(reader.next_event().unwrap(), None);
    }

    #[test]
    fn test_qname_display() {
        assert_eq!(QName::namespaced("urn:a", "x").to_string(), "{urn:a}x");
        assert_eq!(QName::prefixed("p", "urn:a", "x").raw_name(), "p:x");
        assert_eq!(QName::local("x").to_string(), "x");
    }
}
