//! Rendering of batch results.

use std::time::Duration;

use crate::batch::{FileValidationResult, ValidationResults, ValidationStatus};
use crate::cli::{OutputFormat, VerbosityLevel};

/// Formatter for batch results
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    /// Disable ANSI colors regardless of the terminal
    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &ValidationResults) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(results)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
            OutputFormat::Summary => self.format_summary_line(results),
            OutputFormat::Human => self.format_human(results),
        }
    }

    fn format_human(&self, results: &ValidationResults) -> String {
        let mut output = String::new();

        if self.verbosity == VerbosityLevel::Quiet {
            for file_result in results.file_results.iter().filter(|r| r.status.is_failure()) {
                output.push_str(&self.format_file_result(file_result));
                output.push('\n');
            }
            return output;
        }

        for file_result in &results.file_results {
            if self.verbosity == VerbosityLevel::Verbose || file_result.status.is_failure() {
                output.push_str(&self.format_file_result(file_result));
                output.push('\n');
            }
        }
        output.push_str(&self.format_summary(results));
        output
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        match &result.status {
            ValidationStatus::Valid => {
                let mut line = format!(
                    "{}  {} ({})",
                    self.colorize("✓ VALID", "32"),
                    path_display,
                    duration_str
                );
                if result.warning_count > 0 {
                    line.push_str(&format!(" - {} warning(s)", result.warning_count));
                }
                line
            }
            ValidationStatus::Invalid { error_count } => {
                let mut output = format!(
                    "{}  {} ({}) - {} error{}",
                    self.colorize("✗ INVALID", "31"),
                    path_display,
                    duration_str,
                    error_count,
                    if *error_count == 1 { "" } else { "s" }
                );
                if self.verbosity != VerbosityLevel::Quiet {
                    for detail in &result.error_details {
                        output.push_str(&format!("\n    {}", detail));
                    }
                }
                output
            }
            ValidationStatus::Error { message } => {
                format!(
                    "{}  {} ({}) - {}",
                    self.colorize("⚠ ERROR", "33"),
                    path_display,
                    duration_str,
                    message
                )
            }
            ValidationStatus::Skipped { reason } => {
                format!(
                    "{}  {} - {}",
                    self.colorize("- SKIPPED", "36"),
                    path_display,
                    reason
                )
            }
        }
    }

    fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Schema: {}\n", results.schema_variant));
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        if results.skipped_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_files
            ));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));
        if self.verbosity == VerbosityLevel::Verbose {
            output.push_str(&format!(
                "  Throughput: {:.1} files/sec\n",
                results.throughput_files_per_second()
            ));
            output.push_str(&format!(
                "  Started: {}\n",
                results.started_at.to_rfc3339()
            ));
        }

        output
    }

    fn format_summary_line(&self, results: &ValidationResults) -> String {
        format!(
            "{} files: {} valid, {} invalid, {} errors, {} skipped ({})\n",
            results.total_files,
            results.valid_files,
            results.invalid_files,
            results.error_files,
            results.skipped_files,
            format_duration(results.total_duration)
        )
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn create_test_results() -> ValidationResults {
        ValidationResults::aggregate(
            Utc::now(),
            "Single",
            vec![
                FileValidationResult {
                    path: PathBuf::from("good.xml"),
                    status: ValidationStatus::Valid,
                    duration: Duration::from_millis(5),
                    warning_count: 0,
                    error_details: Vec::new(),
                },
                FileValidationResult {
                    path: PathBuf::from("bad.xml"),
                    status: ValidationStatus::Invalid { error_count: 1 },
                    duration: Duration::from_millis(7),
                    warning_count: 0,
                    error_details: vec!["cvc-elt.1.a: Cannot find the declaration".to_string()],
                },
            ],
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_human_output_lists_failures() {
        let output = Output::new(OutputFormat::Human, VerbosityLevel::Normal).without_colors();
        let formatted = output.format_results(&create_test_results());

        assert!(formatted.contains("Validation Summary:"));
        assert!(formatted.contains("✗ INVALID  bad.xml"));
        assert!(formatted.contains("cvc-elt.1.a"));
        assert!(!formatted.contains("good.xml"));
    }

    #[test]
    fn test_quiet_output_has_no_summary() {
        let output = Output::new(OutputFormat::Human, VerbosityLevel::Quiet).without_colors();
        let formatted = output.format_results(&create_test_results());

        assert!(!formatted.contains("Validation Summary:"));
        assert!(formatted.contains("bad.xml (7ms) - 1 error"));
    }

    #[test]
    fn test_json_output() {
        let output = Output::new(OutputFormat::Json, VerbosityLevel::Normal);
        let formatted = output.format_results(&create_test_results());

        let value: serde_json::Value = serde_json::from_str(&formatted).unwrap();
        assert_eq!(value["total_files"], 2);
        assert_eq!(value["invalid_files"], 1);
    }

    #[test]
    fn test_summary_line() {
        let output = Output::new(OutputFormat::Summary, VerbosityLevel::Normal);
        let formatted = output.format_results(&create_test_results());
        assert_eq!(
            formatted,
            "2 files: 1 valid, 1 invalid, 0 errors, 0 skipped (100ms)\n"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30.0s");
    }
}
