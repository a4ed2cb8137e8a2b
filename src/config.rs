use crate::cache::{DEFAULT_DYNAMIC_CAPACITY, DEFAULT_DYNAMIC_IDLE};
use crate::cli::{Cli, OutputFormat};
use crate::constants::{CONTINUE_AFTER_FATAL_ERROR, SCHEMA_FULL_CHECKING};
use crate::factory::SchemaFactory;
use crate::limits::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Factory rejected configuration: {0}")]
    Factory(#[from] crate::error::SchemaError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub factory: FactoryConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
    pub files: FileConfig,
}

/// Settings applied to the schema factory before compiling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactoryConfig {
    /// Secure processing (resource limits, no network access)
    pub secure: bool,
    /// Full schema constraint checking
    pub full_checking: bool,
    /// Keep reporting after a fatal error instead of aborting
    pub continue_after_fatal_error: bool,
    /// Overrides the secure document size limit
    pub max_document_bytes: Option<usize>,
    /// Overrides the secure element depth limit
    pub max_element_depth: Option<usize>,
    /// Grammars kept by the hint-driven schema
    pub dynamic_cache_capacity: u64,
    /// Seconds an unused hint-driven grammar stays cached
    pub dynamic_cache_idle_seconds: u64,
}

/// Batch validation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Number of concurrent validations
    pub threads: Option<usize>,
    /// Stop scheduling files after the first failure
    pub fail_fast: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormatConfig,
    pub verbose: bool,
    pub quiet: bool,
}

/// File processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Schema documents compiled into one schema
    pub schemas: Vec<PathBuf>,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    #[default]
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            secure: false,
            full_checking: false,
            continue_after_fatal_error: false,
            max_document_bytes: None,
            max_element_depth: None,
            dynamic_cache_capacity: DEFAULT_DYNAMIC_CAPACITY,
            dynamic_cache_idle_seconds: DEFAULT_DYNAMIC_IDLE.as_secs(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            schemas: vec![],
        }
    }
}

impl FactoryConfig {
    /// Limits to install, or `None` when secure processing is off
    pub fn limits(&self) -> Option<ResourceLimits> {
        if !self.secure {
            return None;
        }
        let mut limits = ResourceLimits::secure();
        if let Some(bytes) = self.max_document_bytes {
            limits.max_document_bytes = bytes;
        }
        if let Some(depth) = self.max_element_depth {
            limits.max_element_depth = depth;
        }
        Some(limits)
    }
}

const CONFIG_NAMES: [&str; 4] = [
    "schema-factory.toml",
    "schema-factory.json",
    ".schema-factory.toml",
    ".schema-factory.json",
];

fn env_value<T: std::str::FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    match env.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, raw))),
        None => Ok(None),
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            config = Self::load_from_file(config_path).await?;
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = found_config;
        }

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => match toml::from_str::<Config>(&content) {
                Ok(config) => Ok(config),
                Err(_) => Ok(serde_json::from_str(&content)?),
            },
        }
    }

    /// Find a configuration file in the working directory, then in the user
    /// config directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        for name in &CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("schema-factory");
            for name in &CONFIG_NAMES {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply `SCHEMA_FACTORY_*` overrides read through `env`
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Factory settings
        if let Some(secure) = env_value(env, "SCHEMA_FACTORY_SECURE")? {
            config.factory.secure = secure;
        }
        if let Some(full) = env_value(env, "SCHEMA_FACTORY_FULL_CHECKING")? {
            config.factory.full_checking = full;
        }
        if let Some(bytes) = env_value(env, "SCHEMA_FACTORY_MAX_DOCUMENT_BYTES")? {
            config.factory.max_document_bytes = Some(bytes);
        }
        if let Some(depth) = env_value(env, "SCHEMA_FACTORY_MAX_ELEMENT_DEPTH")? {
            config.factory.max_element_depth = Some(depth);
        }
        if let Some(capacity) = env_value(env, "SCHEMA_FACTORY_CACHE_CAPACITY")? {
            config.factory.dynamic_cache_capacity = capacity;
        }
        if let Some(idle) = env_value(env, "SCHEMA_FACTORY_CACHE_IDLE")? {
            config.factory.dynamic_cache_idle_seconds = idle;
        }

        // Validation settings
        if let Some(threads) = env_value(env, "SCHEMA_FACTORY_THREADS")? {
            config.validation.threads = Some(threads);
        }
        if let Some(fail_fast) = env_value(env, "SCHEMA_FACTORY_FAIL_FAST")? {
            config.validation.fail_fast = fail_fast;
        }

        // Output settings
        if let Some(verbose) = env_value(env, "SCHEMA_FACTORY_VERBOSE")? {
            config.output.verbose = verbose;
        }
        if let Some(quiet) = env_value(env, "SCHEMA_FACTORY_QUIET")? {
            config.output.quiet = quiet;
        }
        if let Some(format) = env.get("SCHEMA_FACTORY_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid SCHEMA_FACTORY_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        // File settings
        if let Some(extensions) = env.get("SCHEMA_FACTORY_EXTENSIONS") {
            config.files.extensions = extensions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    ///
    /// Boolean switches can only turn a setting on.
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        config.factory.secure |= cli.secure;
        config.factory.full_checking |= cli.full_checking;

        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        config.validation.fail_fast |= cli.fail_fast;

        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.verbose || cli.quiet {
            config.output.verbose = cli.verbose;
            config.output.quiet = cli.quiet;
        }

        if let Some(extensions) = cli.get_extensions() {
            config.files.extensions = extensions;
        }
        if !cli.schemas.is_empty() {
            config.files.schemas = cli.schemas.clone();
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.factory.dynamic_cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "Dynamic cache capacity must be greater than 0".to_string(),
            ));
        }
        if config.factory.dynamic_cache_idle_seconds == 0 {
            return Err(ConfigError::Validation(
                "Dynamic cache idle time must be greater than 0".to_string(),
            ));
        }
        if config.factory.max_element_depth == Some(0) {
            return Err(ConfigError::Validation(
                "Element depth limit must be greater than 0".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        if config.files.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }
        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        Ok(())
    }

    /// Build a factory carrying the configured features and limits
    pub fn configure_factory(config: &Config, mut factory: SchemaFactory) -> Result<SchemaFactory> {
        factory.set_feature(SCHEMA_FULL_CHECKING, config.factory.full_checking)?;
        factory.set_feature(
            CONTINUE_AFTER_FATAL_ERROR,
            config.factory.continue_after_fatal_error,
        )?;
        factory.set_limits(config.factory.limits());
        factory.set_dynamic_cache(
            config.factory.dynamic_cache_capacity,
            Self::get_cache_idle_duration(config),
        );
        Ok(factory)
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or_else(|_| num_cpus::get())
        })
    }

    pub fn get_cache_idle_duration(config: &Config) -> Duration {
        Duration::from_secs(config.factory.dynamic_cache_idle_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECURE_PROCESSING;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new(vars: &[(&str, &str)]) -> Self {
            Self {
                vars: vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["schema-factory"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.factory.secure);
        assert_eq!(config.factory.dynamic_cache_capacity, DEFAULT_DYNAMIC_CAPACITY);
        assert_eq!(config.files.extensions, vec!["xml"]);
        assert_eq!(config.output.format, OutputFormatConfig::Human);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("schema-factory.toml");
        fs::write(
            &path,
            r#"
[factory]
secure = true
max_element_depth = 32
dynamic_cache_capacity = 8

[validation]
threads = 2

[files]
extensions = ["xml", "cmdi"]
schemas = ["a.xsd"]
"#,
        )
        .unwrap();

        let config = ConfigManager::load_from_file(&path).await.unwrap();
        assert!(config.factory.secure);
        assert_eq!(config.factory.max_element_depth, Some(32));
        assert_eq!(config.factory.dynamic_cache_capacity, 8);
        assert_eq!(config.validation.threads, Some(2));
        assert_eq!(config.files.schemas, vec![PathBuf::from("a.xsd")]);
        // Unset sections keep their defaults
        assert_eq!(config.output, OutputConfig::default());
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("schema-factory.json");
        fs::write(&path, r#"{"output": {"format": "summary", "quiet": true}}"#).unwrap();

        let config = ConfigManager::load_from_file(&path).await.unwrap();
        assert_eq!(config.output.format, OutputFormatConfig::Summary);
        assert!(config.output.quiet);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "factory: {}").unwrap();

        let result = ConfigManager::load_from_file(&path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[test]
    fn test_environment_overrides() {
        let env = MockEnvProvider::new(&[
            ("SCHEMA_FACTORY_SECURE", "true"),
            ("SCHEMA_FACTORY_THREADS", "3"),
            ("SCHEMA_FACTORY_CACHE_IDLE", "30"),
            ("SCHEMA_FACTORY_FORMAT", "JSON"),
            ("SCHEMA_FACTORY_EXTENSIONS", "xml, xsd"),
        ]);

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
        assert!(config.factory.secure);
        assert_eq!(config.validation.threads, Some(3));
        assert_eq!(config.factory.dynamic_cache_idle_seconds, 30);
        assert_eq!(config.output.format, OutputFormatConfig::Json);
        assert_eq!(config.files.extensions, vec!["xml", "xsd"]);
    }

    #[test]
    fn test_invalid_environment_value() {
        let env = MockEnvProvider::new(&[("SCHEMA_FACTORY_THREADS", "many")]);
        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        assert!(matches!(result, Err(ConfigError::Environment(msg)) if msg.contains("many")));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let mut config = Config::default();
        config.validation.threads = Some(8);
        config.output.format = OutputFormatConfig::Json;
        config.files.schemas = vec![PathBuf::from("from-file.xsd")];

        let merged = ConfigManager::merge_with_cli(
            config,
            &cli(&["docs", "-t", "2", "--schema", "cli.xsd", "--secure"]),
        );
        assert_eq!(merged.validation.threads, Some(2));
        assert_eq!(merged.files.schemas, vec![PathBuf::from("cli.xsd")]);
        assert!(merged.factory.secure);
        // Not given on the command line
        assert_eq!(merged.output.format, OutputFormatConfig::Json);
    }

    #[test]
    fn test_validate_config_rejects_bad_values() {
        let mut config = Config::default();
        config.validation.threads = Some(0);
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.files.extensions = vec!["x.ml".to_string()];
        assert!(ConfigManager::validate_config(&config).is_err());

        let mut config = Config::default();
        config.factory.dynamic_cache_capacity = 0;
        assert!(ConfigManager::validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_load_config_with_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(&path, "[validation]\nfail_fast = true\n").unwrap();

        let cli = cli(&["docs", "--config", path.to_str().unwrap()]);
        let env = MockEnvProvider::new(&[("SCHEMA_FACTORY_FULL_CHECKING", "true")]);
        let config = ConfigManager::load_config_with(&env, &cli).await.unwrap();

        assert!(config.validation.fail_fast);
        assert!(config.factory.full_checking);
    }

    #[test]
    fn test_configure_factory() {
        let mut config = Config::default();
        config.factory.secure = true;
        config.factory.full_checking = true;
        config.factory.max_document_bytes = Some(1024);

        let factory = ConfigManager::configure_factory(&config, SchemaFactory::new()).unwrap();
        assert!(factory.get_feature(SECURE_PROCESSING).unwrap());
        assert!(factory.get_feature(SCHEMA_FULL_CHECKING).unwrap());
        assert_eq!(factory.limits().map(|l| l.max_document_bytes), Some(1024));
        assert!(!factory.get_feature(CONTINUE_AFTER_FATAL_ERROR).unwrap());
    }
}
