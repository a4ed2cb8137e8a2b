//! Runs pull-style sources through a push-style validation handler.

use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::events::{ContentHandler, EventReader};
use crate::locator::resolve_system_id;
use crate::registry::ComponentManager;
use crate::source::{Source, ValidationOutput};
use crate::validator::{DocumentState, PushValidator, WriterSink};

/// Identity copier from a pull source into a freshly built validation
/// handler. Its document buffer is reused by every run.
#[derive(Debug, Default)]
struct Pipeline {
    state: DocumentState,
    copied: u64,
}

impl Pipeline {
    fn run(
        &mut self,
        manager: &mut ComponentManager,
        reader: &mut dyn EventReader,
        system_id: Option<String>,
        downstream: Option<&mut dyn ContentHandler>,
    ) -> Result<()> {
        let downstream = downstream.map(|d| d as &mut dyn ContentHandler);
        let mut handler = PushValidator::new(manager, &mut self.state, system_id, downstream);
        let mut result = Ok(());
        loop {
            match reader.next_event() {
                Ok(Some(event)) => {
                    if let Err(err) = handler.handle_event(&event) {
                        result = Err(err);
                        break;
                    }
                    self.copied += 1;
                }
                Ok(None) => {
                    result = handler.finish();
                    break;
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        handler.detach();

        if result.is_err() {
            self.state.abandon();
        }
        result
    }
}

/// Validation driver for pull-style sources.
///
/// The pipeline is built on first use and kept for the lifetime of the
/// driver.
#[derive(Debug, Default)]
pub struct StreamValidationDriver {
    pipeline: Option<Pipeline>,
}

impl StreamValidationDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a pull source, optionally writing every event to `output`.
    ///
    /// Only pull sources with no output or an event output are accepted; any
    /// other pair fails before a single event is read.
    pub fn validate(
        &mut self,
        manager: &mut ComponentManager,
        source: Source,
        output: Option<ValidationOutput<'_>>,
    ) -> Result<()> {
        let mut pull = match (source, &output) {
            (Source::Pull(pull), None | Some(ValidationOutput::Events(_))) => pull,
            (source, output) => {
                return Err(SchemaError::SourceResultMismatch {
                    source_kind: source.kind(),
                    result_kind: output.as_ref().map_or("NoOutput", |o| o.kind()),
                });
            }
        };

        let pipeline = self.pipeline.get_or_insert_with(|| {
            debug!("building pull validation pipeline");
            Pipeline::default()
        });

        let mut sink = match output {
            Some(ValidationOutput::Events(writer)) => Some(WriterSink(writer)),
            _ => None,
        };
        let system_id = pull.system_id.as_deref().map(|id| resolve_system_id(id, None));
        pipeline.run(
            manager,
            pull.reader.as_mut(),
            system_id,
            sink.as_mut().map(|s| s as &mut dyn ContentHandler),
        )
    }

    /// Events copied by this driver so far
    pub fn events_copied(&self) -> u64 {
        self.pipeline.as_ref().map_or(0, |p| p.copied)
    }

    /// Whether the pipeline has been built
    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }
}
