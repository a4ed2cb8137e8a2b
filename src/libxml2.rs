//! LibXML2 FFI Wrapper Module
//!
//! Safe wrapper around the handful of libxml2 calls the crate needs: parsing
//! an XML Schema document into a compiled schema, and validating an in-memory
//! instance document against it.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser` is not thread-safe and runs exactly
//!   once behind a `std::sync::Once`.
//! - **Schema parsing**: not thread-safe in libxml2, so every parse holds a
//!   process-wide lock.
//! - **Validation**: thread-safe for distinct validation contexts. Each call
//!   creates its own context; compiled schemas are shared read-only via `Arc`.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Mutex, Once, OnceLock};

use libc::{c_char, c_int};

use crate::error::{LibXml2Error, LibXml2Result, Result, SchemaParseException};
use crate::error_handler::{Diagnostic, Severity};
use crate::grammar::{SchemaModel, ValidateOptions};
use crate::source::{ResourceRequest, ResourceResolver, W3C_XML_SCHEMA_NS_URI};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema parsing, which libxml2 does not support concurrently
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// libxml2's own external entity loader, used when no resolver answers
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Resolver and base URI of the schema parse in progress
static ACTIVE_RESOLVER: Mutex<Option<(Arc<dyn ResourceResolver>, Option<String>)>> =
    Mutex::new(None);

// xmlParserOption flags
const XML_PARSE_NOERROR: c_int = 1 << 5;
const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NONET: c_int = 1 << 11;

// xmlErrorLevel
const XML_ERR_WARNING: c_int = 1;
const XML_ERR_ERROR: c_int = 2;

// xmlCharEncoding: let the parser detect the encoding
const XML_CHAR_ENCODING_NONE: c_int = 0;

/// ## Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Document parsing
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlGetLastError() -> *const xmlError;
    pub fn xmlResetLastError();

    // External entity loading (xs:include, xs:import, xs:redefine)
    pub fn xmlSetExternalEntityLoader(f: XmlExternalEntityLoader);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlParserInputBufferCreateMem(
        mem: *const c_char,
        size: c_int,
        enc: c_int,
    ) -> *mut libc::c_void;
    pub fn xmlFreeParserInputBuffer(input: *mut libc::c_void);
    pub fn xmlNewIOInputStream(
        ctxt: *mut libc::c_void,
        input: *mut libc::c_void,
        enc: c_int,
    ) -> *mut libc::c_void;

    // Schema parsing functions
    pub fn xmlSchemaNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut libc::c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut libc::c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut libc::c_void,
    pub node: *mut libc::c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut libc::c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut libc::c_void,
    ) -> *mut libc::c_void,
>;

/// Entity loader that asks the active resolver before falling back to
/// libxml2's default loader
unsafe extern "C" fn resolving_entity_loader(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut libc::c_void,
) -> *mut libc::c_void {
    let active = ACTIVE_RESOLVER
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();

    if let Some((resolver, base)) = active {
        let system_id = optional_string(url);
        let public_id = optional_string(id);
        let request = ResourceRequest {
            kind: W3C_XML_SCHEMA_NS_URI,
            namespace: None,
            public_id: public_id.as_deref(),
            system_id: system_id.as_deref(),
            base_uri: base.as_deref(),
        };
        let resolved = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.resolve_resource(&request)
        }))
        .ok()
        .flatten()
        .and_then(|stream| stream.content);

        if let Some(content) = resolved
            && let Some(input) = unsafe { owned_input_stream(ctxt, content.as_bytes()) }
        {
            return input;
        }
    }

    match DEFAULT_ENTITY_LOADER.get().copied().flatten() {
        Some(default_loader) => unsafe { default_loader(url, id, ctxt) },
        None => ptr::null_mut(),
    }
}

/// Input stream over a private copy of `bytes`.
///
/// The parser input buffer copies the memory, so `bytes` may be dropped as
/// soon as this returns.
///
/// # Safety
///
/// `ctxt` must be the parser context libxml2 passed to the entity loader.
unsafe fn owned_input_stream(
    ctxt: *mut libc::c_void,
    bytes: &[u8],
) -> Option<*mut libc::c_void> {
    let size = c_int::try_from(bytes.len()).ok()?;
    unsafe {
        let buffer = xmlParserInputBufferCreateMem(
            bytes.as_ptr() as *const c_char,
            size,
            XML_CHAR_ENCODING_NONE,
        );
        if buffer.is_null() {
            return None;
        }
        let input = xmlNewIOInputStream(ctxt, buffer, XML_CHAR_ENCODING_NONE);
        if input.is_null() {
            xmlFreeParserInputBuffer(buffer);
            return None;
        }
        Some(input)
    }
}

/// Installs the resolver for one schema parse and removes it on drop
struct ActiveResolverGuard;

impl ActiveResolverGuard {
    fn install(resolver: Option<Arc<dyn ResourceResolver>>, base: Option<&str>) -> Self {
        *ACTIVE_RESOLVER.lock().unwrap_or_else(|p| p.into_inner()) =
            resolver.map(|r| (r, base.map(str::to_string)));
        ActiveResolverGuard
    }
}

impl Drop for ActiveResolverGuard {
    fn drop(&mut self) {
        *ACTIVE_RESOLVER.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

/// Callback for libxml2 to report parser and validity errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut libc::c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<Diagnostic>) };
    diagnostics.push(unsafe { diagnostic_from_error(&*error) });
}

fn optional_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn positive(value: c_int) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

/// Convert a libxml2 error record into a diagnostic.
///
/// # Safety
///
/// The string pointers in `error` must be null or valid C strings.
unsafe fn diagnostic_from_error(error: &xmlError) -> Diagnostic {
    let severity = match error.level {
        XML_ERR_WARNING => Severity::Warning,
        XML_ERR_ERROR => Severity::Error,
        _ => Severity::FatalError,
    };
    let message = optional_string(error.message)
        .map(|m| m.trim().to_string())
        .unwrap_or_else(|| format!("libxml2 error {}", error.code));

    Diagnostic::new(
        severity,
        format!("xml2-{}", error.code),
        SchemaParseException::new(message)
            .with_system_id(optional_string(error.file))
            .at(positive(error.line), positive(error.int2)),
    )
}

/// Owned libxml2 document
struct XmlDocPtr {
    ptr: *mut XmlDoc,
}

impl XmlDocPtr {
    /// Parse `data`; on failure returns the diagnostic libxml2 recorded
    fn read(data: &[u8], system_id: Option<&str>, options: c_int) -> LibXml2Result<std::result::Result<Self, Diagnostic>> {
        let size = c_int::try_from(data.len())
            .map_err(|_| LibXml2Error::DocumentTooLarge { size: data.len() })?;
        let url = system_id
            .map(CString::new)
            .transpose()
            .map_err(|_| LibXml2Error::InvalidInput {
                details: "system id contains a NUL byte".to_string(),
            })?;

        unsafe {
            xmlResetLastError();
            let doc = xmlReadMemory(
                data.as_ptr() as *const c_char,
                size,
                url.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
                ptr::null(),
                options | XML_PARSE_NOERROR | XML_PARSE_NOWARNING,
            );
            if !doc.is_null() {
                return Ok(Ok(XmlDocPtr { ptr: doc }));
            }

            let last = xmlGetLastError();
            let mut diagnostic = if last.is_null() {
                Diagnostic::new(
                    Severity::FatalError,
                    "xml2-parse",
                    SchemaParseException::new("document is not well-formed"),
                )
            } else {
                diagnostic_from_error(&*last)
            };
            diagnostic.severity = Severity::FatalError;
            if diagnostic.exception.system_id.is_none() {
                diagnostic.exception.system_id = system_id.map(str::to_string);
            }
            xmlResetLastError();
            Ok(Err(diagnostic))
        }
    }
}

impl Drop for XmlDocPtr {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { xmlFreeDoc(self.ptr) };
            self.ptr = ptr::null_mut();
        }
    }
}

/// Thread-safe wrapper for a compiled libxml2 schema
///
/// This wrapper ensures that:
/// - The schema and the document it was built from are freed together
/// - The schema can be safely shared across threads (read-only after parsing)
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    doc: *mut XmlDoc,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 xmlSchema structures are thread-safe for reading, and the
// backing document is never touched after parsing.
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// Create a new XmlSchemaPtr from raw pointers
    ///
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and `doc` must be the document
    /// the parser context was created from. Ownership of both moves here.
    unsafe fn from_raw(ptr: *mut XmlSchema, doc: *mut XmlDoc) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed);
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                doc,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                xmlSchemaFree(self.ptr);
                self.ptr = ptr::null_mut();
            }
            if !self.doc.is_null() {
                xmlFreeDoc(self.doc);
                self.doc = ptr::null_mut();
            }
        }
    }
}

impl SchemaModel for XmlSchemaPtr {
    fn validate(&self, document: &[u8], options: &ValidateOptions) -> Result<Vec<Diagnostic>> {
        Ok(LibXml2Wrapper::new().validate_memory(self, document, options)?)
    }
}

/// Outcome of compiling one schema document
#[derive(Debug)]
pub struct ParsedSchema {
    /// `None` when libxml2 rejected the schema
    pub schema: Option<XmlSchemaPtr>,
    /// Everything libxml2 reported while reading and compiling
    pub diagnostics: Vec<Diagnostic>,
}

/// LibXML2 wrapper providing safe access to schema parsing and validation
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a wrapper, initializing libxml2 on first use
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            DEFAULT_ENTITY_LOADER.get_or_init(|| xmlGetExternalEntityLoader());
            xmlSetExternalEntityLoader(Some(resolving_entity_loader));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse and compile an XML Schema document.
    ///
    /// `system_id` becomes the document base URI so relative `xs:include` and
    /// `xs:import` locations resolve against it; `resolver`, when given, is
    /// asked for those documents first. Parsing is serialized process-wide.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::MemoryAllocation` if a parser context cannot be
    /// created and `LibXml2Error::DocumentTooLarge` for buffers libxml2 cannot
    /// address. Schema errors are not `Err`: they come back as diagnostics
    /// with `schema: None`.
    pub fn parse_schema(
        &self,
        schema_data: &[u8],
        system_id: Option<&str>,
        allow_network: bool,
        resolver: Option<Arc<dyn ResourceResolver>>,
    ) -> LibXml2Result<ParsedSchema> {
        let _guard = SCHEMA_PARSE_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let _resolver = ActiveResolverGuard::install(resolver, system_id);

        let options = if allow_network { 0 } else { XML_PARSE_NONET };
        let doc = match XmlDocPtr::read(schema_data, system_id, options)? {
            Ok(doc) => doc,
            Err(diagnostic) => {
                return Ok(ParsedSchema {
                    schema: None,
                    diagnostics: vec![diagnostic],
                });
            }
        };

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        unsafe {
            let parser_ctxt = xmlSchemaNewDocParserCtxt(doc.ptr);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut libc::c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                if !diagnostics.iter().any(|d| d.severity != Severity::Warning) {
                    diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "xml2-schema",
                        SchemaParseException::new("document is not a valid XML Schema")
                            .with_system_id(system_id.map(str::to_string)),
                    ));
                }
                return Ok(ParsedSchema {
                    schema: None,
                    diagnostics,
                });
            }

            // The schema keeps referencing the document it was built from
            let mut doc = doc;
            let doc_ptr = std::mem::replace(&mut doc.ptr, ptr::null_mut());
            let schema = XmlSchemaPtr::from_raw(schema_ptr, doc_ptr)?;
            Ok(ParsedSchema {
                schema: Some(schema),
                diagnostics,
            })
        }
    }

    /// Validate an in-memory instance document against a compiled schema.
    ///
    /// Safe to call concurrently: each call owns its validation context.
    /// A document that is not well-formed yields a single fatal diagnostic.
    pub fn validate_memory(
        &self,
        schema: &XmlSchemaPtr,
        xml_content: &[u8],
        options: &ValidateOptions,
    ) -> LibXml2Result<Vec<Diagnostic>> {
        let parse_options = if options.allow_network {
            0
        } else {
            XML_PARSE_NONET
        };
        let doc = match XmlDocPtr::read(xml_content, options.system_id.as_deref(), parse_options)? {
            Ok(doc) => doc,
            Err(diagnostic) => return Ok(vec![diagnostic]),
        };

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let result_code = unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<Diagnostic> as *mut libc::c_void,
            );
            let code = xmlSchemaValidateDoc(valid_ctxt, doc.ptr);
            xmlSchemaFreeValidCtxt(valid_ctxt);
            code
        };

        if result_code < 0 && diagnostics.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::FatalError,
                "xml2-internal",
                SchemaParseException::new(format!(
                    "libxml2 internal validation error {}",
                    result_code
                ))
                .with_system_id(options.system_id.clone()),
            ));
        }
        Ok(diagnostics)
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
