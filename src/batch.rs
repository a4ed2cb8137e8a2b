//! Batch validation of many documents against one compiled schema.
//!
//! Every file gets its own validation session. Sessions run on the blocking
//! pool, a semaphore bounds how many run at once, and the results are
//! collected with `try_join_all`.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SchemaError};
use crate::error_handler::{DiagnosticCollector, Severity};
use crate::file_discovery::FileDiscovery;
use crate::schema::Schema;
use crate::source::StreamSource;

/// Batch configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Number of concurrent validations
    pub max_concurrent_validations: usize,
    /// Timeout for a single document
    pub validation_timeout: Duration,
    /// Stop scheduling files after the first failure
    pub fail_fast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
            validation_timeout: Duration::from_secs(30),
            fail_fast: false,
        }
    }
}

/// Status of a single file validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// No errors were reported
    Valid,
    /// The document violates the schema or is not well-formed
    Invalid { error_count: usize },
    /// The document could not be validated at all
    Error { message: String },
    /// Not validated because an earlier file failed
    Skipped { reason: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Invalid { .. } | ValidationStatus::Error { .. }
        )
    }
}

/// Result of validating a single file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub path: PathBuf,
    pub status: ValidationStatus,
    pub duration: Duration,
    /// Warnings reported while validating
    pub warning_count: usize,
    /// Messages of every error and fatal error
    pub error_details: Vec<String>,
}

impl FileValidationResult {
    pub fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            status: ValidationStatus::Skipped {
                reason: reason.into(),
            },
            duration: Duration::ZERO,
            warning_count: 0,
            error_details: Vec::new(),
        }
    }

    pub fn error(path: PathBuf, error: &SchemaError, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            duration,
            warning_count: 0,
            error_details: vec![error.to_string()],
        }
    }
}

/// Aggregated results of validating multiple files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResults {
    pub started_at: DateTime<Utc>,
    /// Kind of schema the files were validated against
    pub schema_variant: String,
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    /// Wall clock time of the whole run
    pub total_duration: Duration,
    /// Mean time spent on one validated file
    pub average_duration: Duration,
    pub file_results: Vec<FileValidationResult>,
}

impl ValidationResults {
    /// Aggregate individual file results into a summary
    pub fn aggregate(
        started_at: DateTime<Utc>,
        schema_variant: &str,
        file_results: Vec<FileValidationResult>,
        total_duration: Duration,
    ) -> Self {
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;
        let mut skipped_files = 0;
        let mut validation_time = Duration::ZERO;

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid => valid_files += 1,
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
                ValidationStatus::Skipped { .. } => skipped_files += 1,
            }
            validation_time += result.duration;
        }

        let validated = file_results.len() - skipped_files;
        let average_duration = if validated > 0 {
            validation_time / validated as u32
        } else {
            Duration::ZERO
        };

        Self {
            started_at,
            schema_variant: schema_variant.to_string(),
            total_files: file_results.len(),
            valid_files,
            invalid_files,
            error_files,
            skipped_files,
            total_duration,
            average_duration,
            file_results,
        }
    }

    /// True when every file validated and there was at least one
    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files && self.total_files > 0
    }

    pub fn has_errors(&self) -> bool {
        self.error_files > 0 || self.invalid_files > 0
    }

    /// Share of valid files, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }

    pub fn throughput_files_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            (self.total_files - self.skipped_files) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Validates files concurrently against one shared schema
pub struct BatchValidator {
    schema: Arc<Schema>,
    config: BatchConfig,
}

impl BatchValidator {
    pub fn new(schema: Schema, config: BatchConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            config,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Discover files under `path` and validate all of them
    pub async fn validate_path(
        &self,
        path: &Path,
        discovery: &FileDiscovery,
    ) -> Result<ValidationResults> {
        let started_at = Utc::now();
        let start = Instant::now();

        let files = discovery.discover_files(path).await?;
        debug!(count = files.len(), "discovered files");

        let file_results = self.validate_files(files).await?;
        let results = ValidationResults::aggregate(
            started_at,
            self.schema.variant().name(),
            file_results,
            start.elapsed(),
        );

        info!(
            total = results.total_files,
            valid = results.valid_files,
            invalid = results.invalid_files,
            errors = results.error_files,
            skipped = results.skipped_files,
            "batch validation finished"
        );
        Ok(results)
    }

    /// Validate `files` in order, keeping the order in the returned list
    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations.max(1),
        ));
        let stop = Arc::new(AtomicBool::new(false));

        let tasks: Vec<_> = files
            .into_iter()
            .map(|file_path| {
                let schema = Arc::clone(&self.schema);
                let semaphore = Arc::clone(&semaphore);
                let stop = Arc::clone(&stop);
                let timeout = self.config.validation_timeout;
                let fail_fast = self.config.fail_fast;

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(std::io::Error::other)?;
                    if stop.load(Ordering::SeqCst) {
                        return Ok(FileValidationResult::skipped(
                            file_path,
                            "an earlier file failed",
                        ));
                    }

                    let start = Instant::now();
                    let path = file_path.clone();
                    let blocking =
                        tokio::task::spawn_blocking(move || validate_file(&schema, &path));
                    let result = match tokio::time::timeout(timeout, blocking).await {
                        Ok(joined) => joined.map_err(std::io::Error::other)?,
                        Err(_) => FileValidationResult::error(
                            file_path,
                            &SchemaError::Io(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                format!("validation timed out after {:?}", timeout),
                            )),
                            start.elapsed(),
                        ),
                    };

                    if fail_fast && result.status.is_failure() {
                        stop.store(true, Ordering::SeqCst);
                    }
                    Ok::<FileValidationResult, SchemaError>(result)
                })
            })
            .collect();

        let joined = try_join_all(tasks).await.map_err(std::io::Error::other)?;
        joined.into_iter().collect()
    }
}

/// Validate one file in a fresh session, collecting every report
pub fn validate_file(schema: &Schema, path: &Path) -> FileValidationResult {
    let start = Instant::now();
    let collector = Arc::new(DiagnosticCollector::new());
    let mut validator = schema.new_validator();

    let outcome = validator
        .set_error_handler(Some(collector.clone()))
        .and_then(|()| validator.validate_source(StreamSource::from_path(path)));
    let duration = start.elapsed();

    let error_details = collector.error_messages();
    let status = match outcome {
        Ok(()) if error_details.is_empty() => ValidationStatus::Valid,
        Ok(()) | Err(SchemaError::Fatal(_)) => ValidationStatus::Invalid {
            error_count: error_details.len().max(1),
        },
        Err(err) => return FileValidationResult::error(path.to_path_buf(), &err, duration),
    };

    FileValidationResult {
        path: path.to_path_buf(),
        status,
        duration,
        warning_count: collector.count(Severity::Warning),
        error_details,
    }
}
