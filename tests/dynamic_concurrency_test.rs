mod common;

use std::sync::Arc;
use std::time::Duration;

use common::mocks::{RecordingHandler, StubLoader, StubModel};
use rayon::prelude::*;
use schema_factory::error_handler::Severity;
use schema_factory::schema::SchemaVariant;
use schema_factory::source::StreamSource;
use schema_factory::{SchemaError, SchemaFactory};

const SCHEMA_ID: &str = "file:///schemas/dyn.xsd";
const DOCUMENT_ID: &str = "file:///docs/doc.xml";

const DOCUMENT: &str = r#"<root xmlns="urn:dyn"
      xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
      xsi:schemaLocation="urn:dyn file:///schemas/dyn.xsd"/>"#;

fn document() -> StreamSource {
    StreamSource::from_text(DOCUMENT).with_system_id(DOCUMENT_ID)
}

#[test]
fn test_concurrent_sessions_load_hint_once() {
    let model = StubModel::accept_all();
    let loader = Arc::new(
        StubLoader::new(&[Some("urn:dyn")], model.clone()).with_delay(Duration::from_millis(50)),
    );
    let factory = SchemaFactory::with_loader(loader.clone());
    let schema = factory.compile_none();

    let outcomes: Vec<_> = (0..100)
        .into_par_iter()
        .map(|_| {
            let mut validator = schema.new_validator();
            let result = validator.validate_source(document());
            (result.is_ok(), validator.grammar_found())
        })
        .collect();

    assert!(outcomes.iter().all(|(ok, found)| *ok && *found == Some(true)));
    assert_eq!(loader.calls(), 1);
    assert_eq!(model.validations(), 100);
    assert_eq!(loader.seen_system_ids(), vec![Some(SCHEMA_ID.to_string())]);

    let SchemaVariant::Dynamic(dynamic) = schema.variant() else {
        panic!("Expected a dynamic schema, got {}", schema.variant().name());
    };
    let cache = dynamic.cache();
    assert_eq!(cache.entry_count(), 1);
    let first = cache.get(SCHEMA_ID).unwrap();
    let second = cache.get(SCHEMA_ID).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_failed_hint_is_reported_to_every_waiting_session() {
    let loader = Arc::new(
        StubLoader::new(&[Some("urn:dyn")], StubModel::accept_all())
            .with_delay(Duration::from_millis(50))
            .failing("broken schema"),
    );
    let factory = SchemaFactory::with_loader(loader.clone());
    let schema = factory.compile_none();

    let handlers: Vec<Arc<RecordingHandler>> = (0..8)
        .into_par_iter()
        .map(|_| {
            let handler = RecordingHandler::new();
            let mut validator = schema.new_validator();
            validator.set_error_handler(Some(handler.clone())).unwrap();
            let err = validator.validate_source(document()).unwrap_err();
            assert!(matches!(err, SchemaError::Fatal(_)), "unexpected error: {:?}", err);
            assert!(validator.had_error());
            handler
        })
        .collect();

    for handler in &handlers {
        let reports = handler.reports();
        assert_eq!(reports[0].0, Severity::FatalError);
        assert!(reports[0].1.contains("broken schema"));
    }
    assert!(loader.calls() >= 1);
}

#[test]
fn test_document_without_hint_has_no_grammar() {
    let loader = Arc::new(StubLoader::new(&[Some("urn:dyn")], StubModel::accept_all()));
    let schema = SchemaFactory::with_loader(loader.clone()).compile_none();
    let handler = RecordingHandler::new();

    let mut validator = schema.new_validator();
    validator.set_error_handler(Some(handler.clone())).unwrap();
    validator
        .validate_source(StreamSource::from_text(r#"<root xmlns="urn:dyn"/>"#))
        .unwrap();

    assert_eq!(loader.calls(), 0);
    assert_eq!(validator.grammar_found(), Some(false));
    let reports = handler.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.contains("cvc-elt.1.a"));
}
