mod config;

use clap::{Args, Parser};
use config::{CommonConfig, Config, ConfigError};
use ingestor::errors::StartupError;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "syncgaze";

#[derive(Parser)]
#[command(name = "syncgaze", version, about)]
enum CliCommand {
    /// Run the ingest webhook
    Ingestor(IngestorArgs),
}

#[derive(Args)]
struct IngestorArgs {
    /// YAML config file. Environment variables override its values.
    #[arg(long)]
    config_file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid Sentry DSN: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not build statsd exporter: {0}")]
    Metrics(#[from] metrics_exporter_statsd::StatsdError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Startup(#[from] StartupError),
}

fn main() -> Result<(), CliError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Ingestor(args) => {
            let config = Config::load(args.config_file.as_deref(), |name| {
                std::env::var(name).ok()
            })?;

            let _sentry = init_sentry(&config.common)?;
            init_tracing(&config.common);
            init_metrics(&config.common)?;

            tracing::info!("Starting ingestor");
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(ingestor::run(config.ingestor))?;
        }
    }

    Ok(())
}

fn init_sentry(common: &CommonConfig) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let Some(dsn) = &common.logging.sentry_dsn else {
        return Ok(None);
    };

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn.parse()?),
        release: sentry::release_name!(),
        ..Default::default()
    });
    Ok(Some(guard))
}

fn init_tracing(common: &CommonConfig) {
    let filter = EnvFilter::try_new(common.logging.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics_config) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(&metrics_config.statsd_host, metrics_config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("A metrics recorder is already installed");
        return Ok(());
    }

    shared::metrics_defs::describe_all(ingestor::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
