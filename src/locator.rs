//! Root-element scanning: namespace of the document element, `xsi` schema
//! location hints and `targetNamespace`, plus system id resolution.
//!
//! The scan only looks at the first start tag, which is all the validator
//! needs to pick a grammar before handing the document to the backend.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::constants::XSI_NAMESPACE;

/// Cached regex for comments, which may hide tag-like text before the root
static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for the first start tag
static ROOT_TAG_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for attributes inside a start tag
static ATTRIBUTE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for URI schemes
static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();

fn comment_regex() -> &'static Regex {
    COMMENT_REGEX
        .get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("Failed to compile comment regex"))
}

fn root_tag_regex() -> &'static Regex {
    ROOT_TAG_REGEX.get_or_init(|| {
        Regex::new(
            r#"<([A-Za-z_][\w.\-]*(?::[A-Za-z_][\w.\-]*)?)((?:\s+[^\s=/>]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*/?>"#,
        )
        .expect("Failed to compile root tag regex")
    })
}

fn attribute_regex() -> &'static Regex {
    ATTRIBUTE_REGEX.get_or_init(|| {
        Regex::new(r#"([^\s=/>]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Failed to compile attribute regex")
    })
}

fn scheme_regex() -> &'static Regex {
    SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]+:").expect("Failed to compile scheme regex")
    })
}

/// What the first start tag of a document says about its schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootInfo {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    /// `(namespace, location)` pairs from `xsi:schemaLocation`
    pub schema_locations: Vec<(String, String)>,
    pub no_namespace_location: Option<String>,
    /// Unprefixed `targetNamespace` attribute (schema documents)
    pub target_namespace: Option<String>,
}

impl RootInfo {
    /// Location hint for the root namespace, if any
    pub fn location_for_root(&self) -> Option<&str> {
        match &self.namespace {
            Some(ns) => self
                .schema_locations
                .iter()
                .find(|(n, _)| n == ns)
                .map(|(_, l)| l.as_str()),
            None => self.no_namespace_location.as_deref(),
        }
    }

    /// Build from a start tag given as a name plus raw attributes and the
    /// namespace bindings in scope
    pub fn from_parts(
        prefix: Option<String>,
        local_name: String,
        attributes: &[(String, String)],
        bindings: &HashMap<Option<String>, String>,
    ) -> Self {
        let mut info = RootInfo {
            namespace: bindings.get(&prefix).filter(|ns| !ns.is_empty()).cloned(),
            prefix,
            local_name,
            ..RootInfo::default()
        };

        for (name, value) in attributes {
            let (attr_prefix, attr_local) = split_qname(name);
            match attr_prefix {
                None if attr_local == "targetNamespace" => {
                    info.target_namespace = Some(value.clone()).filter(|v| !v.is_empty());
                }
                Some(p) if bindings.get(&Some(p.to_string())).map(String::as_str) == Some(XSI_NAMESPACE) => {
                    match attr_local {
                        "schemaLocation" => {
                            info.schema_locations = parse_schema_location(value);
                        }
                        "noNamespaceSchemaLocation" => {
                            info.no_namespace_location =
                                Some(value.trim().to_string()).filter(|v| !v.is_empty());
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        info
    }
}

/// Scan the first start tag of a serialized document
pub fn scan_root(document: &[u8]) -> Option<RootInfo> {
    let text = String::from_utf8_lossy(document);
    let stripped = comment_regex().replace_all(&text, "");
    let caps = root_tag_regex().captures(&stripped)?;

    let (prefix, local) = split_qname(&caps[1]);
    let raw_attributes = caps.get(2).map_or("", |m| m.as_str());

    let mut bindings: HashMap<Option<String>, String> = HashMap::new();
    bindings.insert(Some("xml".to_string()), "http://www.w3.org/XML/1998/namespace".to_string());
    let mut attributes = Vec::new();
    for attr in attribute_regex().captures_iter(raw_attributes) {
        let name = attr[1].to_string();
        let value = unescape(
            attr.get(2)
                .or_else(|| attr.get(3))
                .map_or("", |m| m.as_str()),
        );
        if name == "xmlns" {
            bindings.insert(None, value);
        } else if let Some(p) = name.strip_prefix("xmlns:") {
            bindings.insert(Some(p.to_string()), value);
        } else {
            attributes.push((name, value));
        }
    }

    Some(RootInfo::from_parts(
        prefix.map(str::to_string),
        local.to_string(),
        &attributes,
        &bindings,
    ))
}

/// Split `xsi:schemaLocation` into `(namespace, location)` pairs; a trailing
/// unpaired token is ignored
pub fn parse_schema_location(value: &str) -> Vec<(String, String)> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect()
}

/// Resolve `location` against `base` into an absolute system id
pub fn resolve_system_id(location: &str, base: Option<&str>) -> String {
    let location = location.trim();
    if is_absolute(location) {
        return normalize(location);
    }

    if let Some(base) = base.filter(|b| !b.is_empty()) {
        let base = if is_absolute(base) {
            base.to_string()
        } else {
            resolve_system_id(base, None)
        };
        let dir = match base.rfind('/') {
            Some(idx) => &base[..=idx],
            None => "",
        };
        return normalize(&format!("{}{}", dir, location));
    }

    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(location).display().to_string()),
        Err(_) => location.to_string(),
    }
}

fn is_absolute(location: &str) -> bool {
    location.starts_with('/') || scheme_regex().is_match(location)
}

/// Collapse `.` and `..` path segments
fn normalize(system_id: &str) -> String {
    let (head, path) = match system_id.find("://") {
        Some(idx) => {
            let after = idx + 3;
            match system_id[after..].find('/') {
                Some(slash) => system_id.split_at(after + slash),
                None => return system_id.to_string(),
            }
        }
        None => match scheme_regex().find(system_id) {
            Some(m) if !system_id[m.end()..].starts_with('/') => return system_id.to_string(),
            Some(m) => system_id.split_at(m.end()),
            None => ("", system_id),
        },
    };

    let mut segments: Vec<&str> = Vec::new();
    let trailing = path.ends_with('/');
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut joined = format!("{}/{}", head, segments.join("/"));
    if trailing && !segments.is_empty() {
        joined.push('/');
    }
    joined
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
