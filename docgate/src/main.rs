use clap::{Parser, Subcommand};
use gateway::errors::GatewayError;
use gateway::metrics_defs::ALL_METRICS;
use shared::metrics_defs::MetricType;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

use config::{ConfigError, LoggingConfig, MetricsConfig};

#[derive(Parser)]
#[command(version, about = "Document storage gateway")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve storage requests
    Gateway {
        #[arg(long, default_value = "config.yaml")]
        config_file_path: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("config file has no gateway section")]
    MissingGatewayConfig,
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Gateway { config_file_path } => run_gateway(config_file_path),
    };

    if let Err(e) = result {
        eprintln!("docgate: {e}");
        process::exit(1);
    }
}

fn run_gateway(config_file_path: PathBuf) -> Result<(), CliError> {
    let config = config::Config::from_file(&config_file_path)?;
    let gateway_config = config.gateway.ok_or(CliError::MissingGatewayConfig)?;
    gateway_config.validate().map_err(GatewayError::from)?;

    let _sentry = init_logging(&config.common.logging);
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    tracing::info!(
        port = gateway_config.listener.port,
        admin_port = gateway_config.admin_listener.port,
        "starting gateway"
    );

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    runtime.block_on(gateway::run(gateway_config))?;
    Ok(())
}

/// The returned guard flushes pending Sentry events when dropped.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder =
        metrics_exporter_statsd::StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
            .build(Some("docgate"))
            .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_gateway_command() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from(["docgate", "gateway"]);
        let CliCommand::Gateway { config_file_path } = cli.command;
        assert_eq!(config_file_path, PathBuf::from("config.yaml"));

        let cli = Cli::parse_from(["docgate", "gateway", "--config-file-path", "/etc/docgate.yaml"]);
        let CliCommand::Gateway { config_file_path } = cli.command;
        assert_eq!(config_file_path, PathBuf::from("/etc/docgate.yaml"));
    }

    #[test]
    fn missing_gateway_section_is_reported() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        std::io::Write::write_all(&mut tmp, b"logging: {level: warn}\n").expect("write yaml");

        assert!(matches!(
            run_gateway(tmp.path().to_path_buf()),
            Err(CliError::MissingGatewayConfig)
        ));
    }
}
