//! Grammar loading: turn schema sources into compiled grammars in a pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::constants::XML_SCHEMA_DOMAIN;
use crate::error::{LoadError, SchemaError, SchemaParseException};
use crate::error_handler::{Diagnostic, ErrorHandlerAdaptor, Severity};
use crate::events::{QName, serialize_events};
use crate::grammar::{Grammar, GrammarDescription, GrammarKind, GrammarPool};
use crate::libxml2::{LibXml2Wrapper, XmlSchemaPtr};
use crate::limits::ResourceLimits;
use crate::locator::{resolve_system_id, scan_root};
use crate::source::{
    ResourceRequest, ResourceResolver, Source, StreamSource, W3C_XML_SCHEMA_NS_URI, open_stream,
};
use crate::tree::Element;

/// Location given to merged members that have no system id of their own
const MEMBER_LOCATION_PREFIX: &str = "schema-factory:member/";

/// Everything a loader may consult while compiling
pub struct LoadContext<'a> {
    /// Where diagnostics go; already-reported failures come back as
    /// [`LoadError::Reported`]
    pub reporter: &'a mut ErrorHandlerAdaptor,
    pub resolver: Option<Arc<dyn ResourceResolver>>,
    pub limits: Option<ResourceLimits>,
    pub features: HashMap<String, bool>,
}

impl<'a> LoadContext<'a> {
    pub fn new(reporter: &'a mut ErrorHandlerAdaptor) -> Self {
        Self {
            reporter,
            resolver: None,
            limits: None,
            features: HashMap::new(),
        }
    }

    pub fn feature(&self, id: &str) -> bool {
        self.features.get(id).copied().unwrap_or(false)
    }

    /// Forward a diagnostic to the reporter
    pub fn report(&mut self, diagnostic: &Diagnostic) -> Result<(), LoadError> {
        self.reporter
            .report(
                diagnostic.severity,
                XML_SCHEMA_DOMAIN,
                &diagnostic.key,
                &diagnostic.exception,
            )
            .map_err(LoadError::Handler)
    }

    /// Report a fatal failure and hand back the matching error
    pub fn fail(&mut self, key: &str, exception: SchemaParseException) -> LoadError {
        match self.report(&Diagnostic::new(Severity::FatalError, key, exception.clone())) {
            Ok(()) => LoadError::Reported(exception),
            Err(err) => err,
        }
    }
}

/// Compiles schema sources into a grammar pool
pub trait GrammarLoader: Send + Sync + fmt::Debug {
    fn load_grammars(
        &self,
        sources: &[Source],
        pool: &dyn GrammarPool,
        context: &mut LoadContext<'_>,
    ) -> Result<(), LoadError>;
}

/// libxml2-backed loader; one grammar per `targetNamespace`, with sources
/// that share a namespace compiled together
#[derive(Debug, Default, Clone, Copy)]
pub struct Xml2GrammarLoader;

impl Xml2GrammarLoader {
    pub fn new() -> Self {
        Self
    }

    fn read_member(
        &self,
        source: &Source,
        context: &mut LoadContext<'_>,
    ) -> Result<Member, LoadError> {
        let (bytes, system_id, resolver) = self.read_source(source, context)?;
        let (public_id, addressable) = match source {
            Source::Stream(stream) => (stream.public_id.clone(), stream.content.is_none()),
            _ => (None, false),
        };
        Ok(Member {
            bytes,
            addressable: addressable && system_id.is_some(),
            system_id,
            public_id,
            resolver,
        })
    }

    fn read_source(
        &self,
        source: &Source,
        context: &mut LoadContext<'_>,
    ) -> Result<(Vec<u8>, Option<String>, Option<Arc<dyn ResourceResolver>>), LoadError> {
        let limits = context.limits;
        let (bytes, system_id, resolver) = match source {
            Source::Stream(stream) => {
                let system_id = stream
                    .system_id
                    .as_deref()
                    .map(|id| resolve_system_id(id, None));
                let bytes = open_stream(
                    stream,
                    None,
                    None,
                    context.resolver.as_deref(),
                    limits.as_ref(),
                )
                .map_err(into_io)?;
                (bytes, system_id, context.resolver.clone())
            }
            Source::Events(events) => {
                let bytes = serialize_events(&events.events).map_err(|e| {
                    context.fail("schema-serialization", source_exception(&e, events.system_id.clone()))
                })?;
                let resolver = events.resolver.clone().or_else(|| context.resolver.clone());
                (bytes, events.system_id.clone(), resolver)
            }
            Source::Tree(tree) => {
                let bytes = serialize_events(&tree.root.to_events()).map_err(|e| {
                    context.fail("schema-serialization", source_exception(&e, tree.system_id.clone()))
                })?;
                (bytes, tree.system_id.clone(), context.resolver.clone())
            }
            Source::Pull(_) => {
                return Err(LoadError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "pull sources cannot be compiled",
                )));
            }
        };

        if let Some(limits) = &limits {
            limits
                .check_document_size(bytes.len(), system_id.as_deref().unwrap_or("schema"))
                .map_err(into_io)?;
        }
        Ok((bytes, system_id, resolver))
    }
}

impl GrammarLoader for Xml2GrammarLoader {
    fn load_grammars(
        &self,
        sources: &[Source],
        pool: &dyn GrammarPool,
        context: &mut LoadContext<'_>,
    ) -> Result<(), LoadError> {
        let wrapper = LibXml2Wrapper::new();
        let allow_network = context.limits.is_none_or(|l| l.allow_network);

        // Sources sharing a target namespace compile into one grammar
        let mut groups: Vec<(Option<String>, Vec<Member>)> = Vec::new();
        for source in sources {
            let member = self.read_member(source, context)?;
            let namespace = scan_root(&member.bytes).and_then(|root| root.target_namespace);
            match groups.iter_mut().find(|(ns, _)| *ns == namespace) {
                Some((_, members)) => members.push(member),
                None => groups.push((namespace, vec![member])),
            }
        }

        let mut grammars = Vec::with_capacity(groups.len());
        for (namespace, members) in groups {
            let (schema, system_id) = match members.as_slice() {
                [member] => {
                    let schema = compile(
                        &wrapper,
                        &member.bytes,
                        member.system_id.as_deref(),
                        member.public_id.as_deref(),
                        member.resolver.clone(),
                        allow_network,
                        context,
                    )?;
                    (schema, member.system_id.clone())
                }
                _ => {
                    debug!(
                        namespace = namespace.as_deref().unwrap_or(""),
                        members = members.len(),
                        "merging schema documents"
                    );
                    let (bytes, resolver) = merge_members(namespace.as_deref(), &members, context)?;
                    let schema = compile(
                        &wrapper,
                        &bytes,
                        None,
                        None,
                        Some(Arc::new(resolver)),
                        allow_network,
                        context,
                    )?;
                    (schema, members[0].system_id.clone())
                }
            };

            debug!(
                system_id = system_id.as_deref().unwrap_or("<inline>"),
                namespace = namespace.as_deref().unwrap_or(""),
                "compiled schema document"
            );
            grammars.push(Arc::new(Grammar::new(
                GrammarDescription::xml_schema(namespace.as_deref()),
                system_id,
                Arc::new(schema),
            )));
        }

        pool.cache_grammars(GrammarKind::XmlSchema, grammars);
        Ok(())
    }
}

/// One schema document read into memory
struct Member {
    bytes: Vec<u8>,
    system_id: Option<String>,
    public_id: Option<String>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    /// libxml2 can fetch it again by system id, keeping relative includes
    /// anchored at the original location
    addressable: bool,
}

/// Serves in-memory members of a merged namespace and defers everything
/// else to the members' own resolvers
struct MemberResolver {
    documents: HashMap<String, Vec<u8>>,
    fallbacks: Vec<Arc<dyn ResourceResolver>>,
}

impl ResourceResolver for MemberResolver {
    fn resolve_resource(&self, request: &ResourceRequest<'_>) -> Option<StreamSource> {
        if let Some(id) = request.system_id
            && let Some(bytes) = self.documents.get(id)
        {
            return Some(StreamSource::from_bytes(bytes.clone()).with_system_id(id));
        }
        self.fallbacks
            .iter()
            .find_map(|resolver| resolver.resolve_resource(request))
    }
}

/// Wrapper schema that includes every member, plus the resolver serving
/// the members that only exist in memory
fn merge_members(
    namespace: Option<&str>,
    members: &[Member],
    context: &mut LoadContext<'_>,
) -> Result<(Vec<u8>, MemberResolver), LoadError> {
    let mut resolver = MemberResolver {
        documents: HashMap::new(),
        fallbacks: Vec::new(),
    };
    let mut root = Element::new(QName::prefixed("xs", W3C_XML_SCHEMA_NS_URI, "schema"))
        .with_namespace(Some("xs"), W3C_XML_SCHEMA_NS_URI);
    if let Some(namespace) = namespace {
        root = root.with_attribute(QName::local("targetNamespace"), namespace);
    }

    for (index, member) in members.iter().enumerate() {
        let location = match &member.system_id {
            Some(id) if member.addressable => id.clone(),
            Some(id) if !resolver.documents.contains_key(id) => id.clone(),
            _ => format!("{}{}.xsd", MEMBER_LOCATION_PREFIX, index),
        };
        if !member.addressable {
            resolver.documents.insert(location.clone(), member.bytes.clone());
        }
        if let Some(own) = &member.resolver
            && !resolver.fallbacks.iter().any(|r| Arc::ptr_eq(r, own))
        {
            resolver.fallbacks.push(own.clone());
        }
        root = root.with_child(
            Element::new(QName::prefixed("xs", W3C_XML_SCHEMA_NS_URI, "include"))
                .with_attribute(QName::local("schemaLocation"), location),
        );
    }

    let bytes = serialize_events(&root.to_events())
        .map_err(|e| context.fail("schema-serialization", source_exception(&e, None)))?;
    Ok((bytes, resolver))
}

/// Parse one schema document, reporting its diagnostics
fn compile(
    wrapper: &LibXml2Wrapper,
    bytes: &[u8],
    system_id: Option<&str>,
    public_id: Option<&str>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    allow_network: bool,
    context: &mut LoadContext<'_>,
) -> Result<XmlSchemaPtr, LoadError> {
    let mut parsed = wrapper
        .parse_schema(bytes, system_id, allow_network, resolver)
        .map_err(|e| LoadError::Io(std::io::Error::other(e)))?;

    for diagnostic in &mut parsed.diagnostics {
        if diagnostic.exception.public_id.is_none() {
            diagnostic.exception.public_id = public_id.map(str::to_string);
        }
    }
    for diagnostic in &parsed.diagnostics {
        context.report(diagnostic)?;
    }

    parsed.schema.ok_or_else(|| {
        let exception = parsed
            .diagnostics
            .iter()
            .find(|d| d.severity != Severity::Warning)
            .map(|d| d.exception.clone())
            .unwrap_or_else(|| {
                SchemaParseException::new("schema document could not be compiled")
                    .with_system_id(system_id.map(str::to_string))
                    .with_public_id(public_id.map(str::to_string))
            });
        LoadError::Reported(exception)
    })
}

fn into_io(err: SchemaError) -> LoadError {
    match err {
        SchemaError::Io(io) => LoadError::Io(io),
        other => LoadError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            other.to_string(),
        )),
    }
}

fn source_exception(err: &SchemaError, system_id: Option<String>) -> SchemaParseException {
    match err {
        SchemaError::Parse(exception) | SchemaError::Fatal(exception) => {
            let mut exception = exception.clone();
            if exception.system_id.is_none() {
                exception.system_id = system_id;
            }
            exception
        }
        other => SchemaParseException::new(other.to_string()).with_system_id(system_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::DiagnosticCollector;
    use crate::events::{QName, XmlEvent};
    use crate::grammar::XmlGrammarPool;
    use crate::source::{EventSource, StreamSource, TreeSource};
    use crate::tree::Element;
    use tempfile::TempDir;

    const XS: &str = "http://www.w3.org/2001/XMLSchema";

    fn schema_text(target: Option<&str>) -> String {
        let tns = target
            .map(|t| format!(" targetNamespace=\"{}\" xmlns=\"{}\"", t, t))
            .unwrap_or_default();
        format!(
            r#"<xs:schema xmlns:xs="{}"{}><xs:element name="root" type="xs:string"/></xs:schema>"#,
            XS, tns
        )
    }

    fn load(sources: &[Source], collector: Arc<DiagnosticCollector>) -> (XmlGrammarPool, Result<(), LoadError>) {
        let pool = XmlGrammarPool::new();
        let mut adaptor = ErrorHandlerAdaptor::new(Some(collector));
        let mut context = LoadContext::new(&mut adaptor);
        let result = Xml2GrammarLoader::new().load_grammars(sources, &pool, &mut context);
        (pool, result)
    }

    #[test]
    fn test_loads_one_grammar_per_namespace() {
        let sources = vec![
            Source::Stream(StreamSource::from_text(schema_text(Some("urn:a")))),
            Source::Stream(StreamSource::from_text(schema_text(None))),
        ];
        let (pool, result) = load(&sources, Arc::new(DiagnosticCollector::new()));
        result.unwrap();

        assert_eq!(pool.len(), 2);
        assert!(
            pool.retrieve_grammar(&GrammarDescription::xml_schema(Some("urn:a")))
                .is_some()
        );
        assert!(
            pool.retrieve_grammar(&GrammarDescription::xml_schema(None))
                .is_some()
        );
    }

    #[test]
    fn test_file_source_keeps_absolute_system_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.xsd");
        std::fs::write(&path, schema_text(Some("urn:a"))).unwrap();

        let sources = vec![Source::Stream(StreamSource::from_path(&path))];
        let (pool, result) = load(&sources, Arc::new(DiagnosticCollector::new()));
        result.unwrap();

        let grammar = pool
            .retrieve_grammar(&GrammarDescription::xml_schema(Some("urn:a")))
            .unwrap();
        assert_eq!(grammar.system_id.as_deref(), Some(path.to_str().unwrap()));
    }

    #[test]
    fn test_event_and_tree_sources() {
        let root = Element::new(QName::prefixed("xs", XS, "schema"))
            .with_namespace(Some("xs"), XS)
            .with_child(
                Element::new(QName::prefixed("xs", XS, "element"))
                    .with_attribute(QName::local("name"), "root")
                    .with_attribute(QName::local("type"), "xs:string"),
            );
        let events: Vec<XmlEvent> = root.to_events();

        let other = Element::new(QName::prefixed("xs", XS, "schema"))
            .with_namespace(Some("xs"), XS)
            .with_child(
                Element::new(QName::prefixed("xs", XS, "element"))
                    .with_attribute(QName::local("name"), "other")
                    .with_attribute(QName::local("type"), "xs:string"),
            );

        let sources = vec![
            Source::Events(EventSource::new(events)),
            Source::Tree(TreeSource::new(other)),
        ];
        let collector = Arc::new(DiagnosticCollector::new());
        let (pool, result) = load(&sources, collector.clone());
        result.unwrap();
        assert_eq!(pool.len(), 1);
        assert!(collector.reports().is_empty());
    }

    #[test]
    fn test_same_namespace_sources_are_merged() {
        let dir = TempDir::new().unwrap();
        let on_disk = dir.path().join("b.xsd");
        std::fs::write(
            &on_disk,
            schema_text(Some("urn:x")).replace("name=\"root\"", "name=\"b\""),
        )
        .unwrap();

        let sources = vec![
            Source::Stream(
                StreamSource::from_text(schema_text(Some("urn:x")).replace("name=\"root\"", "name=\"a\""))
                    .with_system_id("memory:a.xsd"),
            ),
            Source::Stream(StreamSource::from_path(&on_disk)),
            Source::Stream(StreamSource::from_text(
                schema_text(Some("urn:x")).replace("name=\"root\"", "name=\"c\""),
            )),
        ];
        let collector = Arc::new(DiagnosticCollector::new());
        let (pool, result) = load(&sources, collector.clone());
        result.unwrap();
        assert!(collector.error_messages().is_empty());

        assert_eq!(pool.len(), 1);
        let grammar = pool
            .retrieve_grammar(&GrammarDescription::xml_schema(Some("urn:x")))
            .unwrap();
        assert_eq!(grammar.system_id.as_deref(), Some("memory:a.xsd"));
        for name in ["a", "b", "c"] {
            let instance = format!(r#"<{} xmlns="urn:x">text</{}>"#, name, name);
            let diagnostics = grammar
                .model
                .validate(instance.as_bytes(), &crate::grammar::ValidateOptions::default())
                .unwrap();
            assert!(diagnostics.is_empty(), "{}: {:?}", name, diagnostics);
        }
    }

    #[test]
    fn test_merged_duplicate_declaration_is_reported() {
        let sources = vec![
            Source::Stream(StreamSource::from_text(schema_text(Some("urn:x")))),
            Source::Stream(StreamSource::from_text(schema_text(Some("urn:x")))),
        ];
        let collector = Arc::new(DiagnosticCollector::new());
        let (pool, result) = load(&sources, collector.clone());

        assert!(matches!(result, Err(LoadError::Reported(_))));
        assert!(pool.is_empty());
        assert!(!collector.error_messages().is_empty());
    }

    #[test]
    fn test_invalid_schema_is_reported_once() {
        let collector = Arc::new(DiagnosticCollector::new());
        let sources = vec![Source::Stream(
            StreamSource::from_text(
                r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"><xs:element name="r" type="xs:nope"/></xs:schema>"#,
            )
            .with_public_id("-//example//broken"),
        )];
        let (pool, result) = load(&sources, collector.clone());

        match result {
            Err(LoadError::Reported(exception)) => {
                assert_eq!(exception.public_id.as_deref(), Some("-//example//broken"));
            }
            other => panic!("Expected reported error, got {:?}", other),
        }
        assert!(pool.is_empty());
        assert!(!collector.error_messages().is_empty());
    }

    #[test]
    fn test_missing_file_is_unreported_io() {
        let collector = Arc::new(DiagnosticCollector::new());
        let sources = vec![Source::Stream(StreamSource::from_system_id(
            "/definitely/not/here.xsd",
        ))];
        let (_, result) = load(&sources, collector.clone());

        assert!(matches!(result, Err(LoadError::Io(_))));
        assert!(collector.reports().is_empty());
    }

    #[test]
    fn test_size_limit_is_io() {
        let collector = Arc::new(DiagnosticCollector::new());
        let pool = XmlGrammarPool::new();
        let mut adaptor = ErrorHandlerAdaptor::new(Some(collector));
        let mut context = LoadContext::new(&mut adaptor);
        context.limits = Some(ResourceLimits {
            max_document_bytes: 8,
            max_element_depth: 8,
            allow_network: false,
        });

        let sources = vec![Source::Stream(StreamSource::from_text(schema_text(None)))];
        let result = Xml2GrammarLoader::new().load_grammars(&sources, &pool, &mut context);
        match result {
            Err(LoadError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolver_serves_includes() {
        let included = schema_text(None)
            .replace("name=\"root\"", "name=\"extra\"");
        let resolver: Arc<dyn ResourceResolver> = Arc::new(move |request: &crate::source::ResourceRequest<'_>| {
            request
                .system_id
                .filter(|id| id.ends_with("virtual-include.xsd"))
                .map(|_| StreamSource::from_text(included.clone()))
        });

        let main = format!(
            r#"<xs:schema xmlns:xs="{}"><xs:include schemaLocation="virtual-include.xsd"/><xs:element name="root" type="xs:string"/></xs:schema>"#,
            XS
        );
        let pool = XmlGrammarPool::new();
        let mut adaptor = ErrorHandlerAdaptor::new(Some(Arc::new(DiagnosticCollector::new())));
        let mut context = LoadContext::new(&mut adaptor);
        context.resolver = Some(resolver);
        let sources = vec![Source::Stream(
            StreamSource::from_text(main).with_system_id("memory:main.xsd"),
        )];
        Xml2GrammarLoader::new()
            .load_grammars(&sources, &pool, &mut context)
            .unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_event_source_resolver_wins() {
        let included = schema_text(None).replace("name=\"root\"", "name=\"extra\"");
        let own: Arc<dyn ResourceResolver> = Arc::new(move |request: &crate::source::ResourceRequest<'_>| {
            request
                .system_id
                .filter(|id| id.ends_with("event-include.xsd"))
                .map(|_| {
                    StreamSource::from_bytes(included.clone().into_bytes())
                        .with_public_id("-//example//include")
                })
        });
        let refusing: Arc<dyn ResourceResolver> =
            Arc::new(|_: &crate::source::ResourceRequest<'_>| None);

        let root = Element::new(QName::prefixed("xs", XS, "schema"))
            .with_namespace(Some("xs"), XS)
            .with_child(
                Element::new(QName::prefixed("xs", XS, "include"))
                    .with_attribute(QName::local("schemaLocation"), "event-include.xsd"),
            );
        let source = EventSource::new(root.to_events())
            .with_resolver(own)
            .with_system_id("memory:events.xsd");

        let pool = XmlGrammarPool::new();
        let mut adaptor = ErrorHandlerAdaptor::new(Some(Arc::new(DiagnosticCollector::new())));
        let mut context = LoadContext::new(&mut adaptor);
        context.resolver = Some(refusing);
        Xml2GrammarLoader::new()
            .load_grammars(&[Source::Events(source)], &pool, &mut context)
            .unwrap();
        assert_eq!(pool.len(), 1);
    }
}
