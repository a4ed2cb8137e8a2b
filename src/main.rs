use std::process::ExitCode;

use anyhow::{Context, bail};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use schema_factory::batch::{BatchConfig, BatchValidator};
use schema_factory::cli::{Cli, OutputFormat, VerbosityLevel};
use schema_factory::config::{Config, ConfigManager};
use schema_factory::factory::SchemaFactory;
use schema_factory::file_discovery::FileDiscovery;
use schema_factory::output::Output;
use schema_factory::source::{Source, StreamSource};

fn init_tracing(verbosity: VerbosityLevel) {
    let default_level = match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "schema_factory=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn verbosity(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    if let Err(message) = cli.validate() {
        bail!(message);
    }

    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    debug!(?config, "effective configuration");

    let mut factory = ConfigManager::configure_factory(&config, SchemaFactory::new())?;
    let schema = if config.files.schemas.is_empty() {
        info!("no schemas given, using document location hints");
        factory.compile_none()
    } else {
        let sources: Vec<Source> = config
            .files
            .schemas
            .iter()
            .map(|path| Source::Stream(StreamSource::from_path(path)))
            .collect();
        factory
            .compile(&sources)
            .context("failed to compile schemas")?
    };

    let batch = BatchValidator::new(
        schema,
        BatchConfig {
            max_concurrent_validations: ConfigManager::get_thread_count(&config),
            fail_fast: config.validation.fail_fast,
            ..BatchConfig::default()
        },
    );
    let discovery = FileDiscovery::new().with_extensions(config.files.extensions.clone());
    let results = batch
        .validate_path(&cli.path, &discovery)
        .await
        .with_context(|| format!("failed to validate {}", cli.path.display()))?;

    let output = Output::new(OutputFormat::from(config.output.format), verbosity(&config));
    print!("{}", output.format_results(&results));

    Ok(!results.has_errors())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbosity());

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
