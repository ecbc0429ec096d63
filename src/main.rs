use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use otel_auto_agent::analyzer::Analyzer;
use otel_auto_agent::cli::Cli;
use otel_auto_agent::config::Config;
use otel_auto_agent::error::AgentError;
use otel_auto_agent::manager::Manager;
use otel_auto_agent::offsets::OffsetsDatabase;
use otel_auto_agent::otlp_exporter::{OtlpConfig, OtlpSpanExporter};
use otel_auto_agent::probe::catalog::{embedded_sdk_catalog, standard_catalog};
use otel_auto_agent::ring_buffer::SpanRingBuffer;

/// Exit codes (spec §6): 0 clean shutdown, 1 startup failure, 2 invalid flags.
const EXIT_OK: u8 = 0;
const EXIT_STARTUP_FAILURE: u8 = 1;
const EXIT_INVALID_FLAGS: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::resolve(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::from(EXIT_INVALID_FLAGS);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(config.log_level.to_string()).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            error!(error = %err, "agent failed to start or run");
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal, stopping");
                cancel.cancel();
            }
        });
    }

    let analyzer = Analyzer::new();
    let cancel_for_discover = cancel.clone();
    let target = config.target.clone();
    let pid = tokio::task::spawn_blocking(move || {
        analyzer.discover(&target, || cancel_for_discover.is_cancelled())
    })
    .await??;

    let offsets_bytes = std::fs::read(&config.offsets_path)
        .with_context(|| format!("reading offsets database {}", config.offsets_path.display()))?;
    let offsets = OffsetsDatabase::from_json(&offsets_bytes)?;

    let mut catalog = standard_catalog(
        &config.probes_dir,
        config.include_db_statement,
        config.parse_db_statement,
        config.sampler.clone(),
    );
    if config.global_impl {
        catalog.extend(embedded_sdk_catalog(&config.probes_dir, config.sampler.clone()));
    }

    let mut manager = Manager::new(catalog, offsets, config.instrumentation_filter.clone(), config.resource.clone());

    let analyzer = Analyzer::new();
    let target_details = manager.load(&analyzer, pid).await?;
    info!(
        pid = target_details.pid,
        language_version = %target_details.language_version,
        functions = target_details.functions.len(),
        "target analyzed and probes loaded"
    );

    let otlp_config = OtlpConfig::from_env();
    let exporter = Arc::new(OtlpSpanExporter::new(otlp_config, &config.resource)?);
    let sink = Arc::new(SpanRingBuffer::new(4096, exporter));

    let result = manager.run(cancel, sink.clone()).await;

    if let Err(ref err) = result {
        warn!(error = %err, "event demultiplexer stopped with an error");
    }

    manager.close().await?;
    if let Ok(sink) = Arc::try_unwrap(sink) {
        sink.shutdown();
    }

    match result {
        Ok(()) | Err(AgentError::Closed) | Err(AgentError::Interrupted) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
