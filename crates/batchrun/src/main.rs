#![doc = include_str!("../README.md")]

mod dispatch;
mod marklogic;
mod sink;

use anyhow::Context;
use batchrun_core::ResultSink;
use clap::Parser;
use dispatch::{
    Manager,
    config::{CliArgs, RunConfig},
    telemetry::init_telemetry,
};
use marklogic::{RestClient, RestConnector, UrisSource};
use sink::FileSink;
use std::sync::Arc;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let result = run(config).await;
    if let Err(e) = &result {
        tracing::error!("Fatal error: {e:#}");
    }

    providers.shutdown();
    result
}

async fn run(config: RunConfig) -> anyhow::Result<()> {
    let client = RestClient::new(&config.connection).context("failed to build HTTP client")?;
    let source = UrisSource::new(client.clone(), config.uris_module.as_str());
    let connector = RestConnector::new(client);
    let sink = FileSink::create(&config.output_file)?;
    tracing::info!("Writing results to {}", sink.path().display());
    let sink: Arc<dyn ResultSink> = Arc::new(sink);

    let manager = Manager::new(config.dispatch, source, connector, sink, config.selector);

    let run = manager.run();
    tokio::pin!(run);

    let summary = tokio::select! {
        summary = &mut run => summary,
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping run...");
            manager.stop();
            run.await
        }
    };
    tracing::debug!("Pool state at exit: {:?}", manager.state());
    let summary = summary?;

    tracing::info!(
        "Processed {} items in {:.1}s: {} completed, {} failed",
        summary.counters.total,
        summary.elapsed.as_secs_f64(),
        summary.counters.completed,
        summary.counters.failed
    );
    Ok(())
}

fn log_startup_info(config: &RunConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting batchrun with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting batchrun against {} with {} threads",
            config.connection.base_url,
            config.dispatch.threads
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
