//! In-memory element trees used as tree-shaped sources and results.

use crate::error::{Result, SchemaError, SchemaParseException};
use crate::events::{Attribute, ContentHandler, QName, XmlEvent};

/// Child of an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// Element node with its namespace declarations and children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<(Option<String>, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn with_namespace(mut self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        self.namespaces.push((prefix.map(str::to_string), uri.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Concatenated text of the direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Walk the tree as a complete document event stream
    pub fn to_events(&self) -> Vec<XmlEvent> {
        let mut events = vec![XmlEvent::StartDocument];
        self.push_events(&mut events);
        events.push(XmlEvent::EndDocument);
        events
    }

    fn push_events(&self, events: &mut Vec<XmlEvent>) {
        for (prefix, uri) in &self.namespaces {
            events.push(XmlEvent::StartPrefixMapping {
                prefix: prefix.clone(),
                uri: uri.clone(),
            });
        }
        events.push(XmlEvent::StartElement {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
        });
        for child in &self.children {
            match child {
                Node::Element(element) => element.push_events(events),
                Node::Text(text) => events.push(XmlEvent::Characters(text.clone())),
                Node::Comment(text) => events.push(XmlEvent::Comment(text.clone())),
                Node::ProcessingInstruction { target, data } => {
                    events.push(XmlEvent::ProcessingInstruction {
                        target: target.clone(),
                        data: data.clone(),
                    })
                }
            }
        }
        events.push(XmlEvent::EndElement {
            name: self.name.clone(),
        });
        for (prefix, _) in self.namespaces.iter().rev() {
            events.push(XmlEvent::EndPrefixMapping {
                prefix: prefix.clone(),
            });
        }
    }
}

/// Rebuilds an element tree from pushed events
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<Element>,
    pending: Vec<(Option<String>, String)>,
    root: Option<Element>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the last completed document
    pub fn root(&self) -> Option<&Element> {
        self.root.as_ref()
    }

    pub fn into_root(self) -> Option<Element> {
        self.root
    }

    fn append(&mut self, node: Node) {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
        }
    }
}

impl ContentHandler for TreeBuilder {
    fn handle_event(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartDocument => {
                self.stack.clear();
                self.pending.clear();
                self.root = None;
            }
            XmlEvent::EndDocument | XmlEvent::EndPrefixMapping { .. } => {}
            XmlEvent::StartPrefixMapping { prefix, uri } => {
                self.pending.push((prefix.clone(), uri.clone()));
            }
            XmlEvent::StartElement { name, attributes } => {
                let mut element = Element::new(name.clone());
                element.attributes = attributes.clone();
                element.namespaces = std::mem::take(&mut self.pending);
                self.stack.push(element);
            }
            XmlEvent::EndElement { name } => {
                let element = self.stack.pop().ok_or_else(|| {
                    SchemaError::Parse(SchemaParseException::new(format!(
                        "End tag '{}' has no matching start tag",
                        name.raw_name()
                    )))
                })?;
                if self.stack.is_empty() {
                    self.root = Some(element);
                } else {
                    self.append(Node::Element(element));
                }
            }
            XmlEvent::Characters(text) => self.append(Node::Text(text.clone())),
            XmlEvent::Comment(text) => self.append(Node::Comment(text.clone())),
            XmlEvent::ProcessingInstruction { target, data } => {
                self.append(Node::ProcessingInstruction {
                    target: target.clone(),
                    data: data.clone(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::new(QName::prefixed("p", "urn:p", "root"))
            .with_namespace(Some("p"), "urn:p")
            .with_attribute(QName::local("version"), "1")
            .with_child(Element::new(QName::prefixed("p", "urn:p", "item")).with_text("one"))
            .with_text("tail")
    }

    #[test]
    fn test_tree_walk_and_rebuild() {
        let tree = sample();
        let mut builder = TreeBuilder::new();
        for event in tree.to_events() {
            builder.handle_event(&event).unwrap();
        }

        assert_eq!(builder.root(), Some(&tree));
    }

    #[test]
    fn test_walk_brackets_prefix_mappings() {
        let events = sample().to_events();
        assert_eq!(events.first(), Some(&XmlEvent::StartDocument));
        assert!(matches!(events[1], XmlEvent::StartPrefixMapping { .. }));
        assert!(matches!(
            events[events.len() - 2],
            XmlEvent::EndPrefixMapping { .. }
        ));
        assert_eq!(events.last(), Some(&XmlEvent::EndDocument));
    }

    #[test]
    fn test_text_collects_direct_children() {
        let element = Element::new(QName::local("a"))
            .with_text("x")
            .with_child(Element::new(QName::local("b")).with_text("ignored"))
            .with_text("y");
        assert_eq!(element.text(), "xy");
    }
}
