use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Show the summary
    #[default]
    Normal,
    /// Show every file and its diagnostics
    Verbose,
}

/// How batch results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Summary,
}

/// Validate XML documents against W3C XML Schemas
#[derive(Parser, Debug, Clone)]
#[command(name = "schema-factory")]
#[command(about = "Compile XML Schemas once and validate XML files against them")]
#[command(version)]
pub struct Cli {
    /// Directory or file to validate
    #[arg(help = "Directory or file to validate")]
    pub path: PathBuf,

    /// Schema documents to compile; without any, schemas are taken from the
    /// location hints inside each document
    #[arg(short = 's', long = "schema", action = clap::ArgAction::Append)]
    pub schemas: Vec<PathBuf>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'xml,cmdi')"
    )]
    pub extensions: Option<String>,

    /// Number of concurrent validations
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Stop scheduling new files after the first failure
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Turn on secure processing (document size, element depth, no network)
    #[arg(long = "secure")]
    pub secure: bool,

    /// Turn on full schema constraint checking
    #[arg(long = "full-checking")]
    pub full_checking: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (failures only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|list| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(missing) = self.schemas.iter().find(|schema| !schema.exists()) {
            return Err(format!("Schema does not exist: {}", missing.display()));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}
