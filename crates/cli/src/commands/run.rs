//! `run` command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{ForwarderBlueprint, DEFAULT_FATAL_EXIT_DELAY_SECS};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_forwarder(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let blueprint = match load_blueprint(&args.config) {
        Ok(blueprint) => blueprint,
        Err(e) => {
            let delay = args
                .fatal_exit_delay_secs
                .unwrap_or(DEFAULT_FATAL_EXIT_DELAY_SECS);
            return fatal_exit(e, Duration::from_secs(delay)).await;
        }
    };
    let fatal_delay = args
        .fatal_exit_delay_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| blueprint.fatal_exit_delay());

    info!(
        endpoint = %blueprint.https.endpoint,
        backends = ?blueprint.enabled_backends(),
        capacity = blueprint.buffer.capacity,
        policy = ?blueprint.buffer.overflow_policy,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint: Arc::new(blueprint),
        inputs: args.inputs.clone(),
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    });

    // Setup graceful shutdown handler
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Received shutdown signal, stopping forwarder...");
        signal_token.cancel();
    });

    info!("Starting forwarder...");
    match pipeline.run(shutdown).await {
        Ok(stats) => {
            info!(
                lines = stats.lines_read,
                delivered = stats.dispatch.total_delivered(),
                dropped = stats.dispatch.dropped_no_backend + stats.dispatch.dropped_at_shutdown,
                duration_secs = stats.duration.as_secs_f64(),
                "Forwarder completed"
            );
            stats.print_summary();
        }
        Err(e) if e.is_fatal() => return fatal_exit(e, fatal_delay).await,
        Err(e) => return Err(e).context("Forwarder execution failed"),
    }

    info!("Log Forwarder finished");
    Ok(())
}

fn load_blueprint(path: &Path) -> Result<ForwarderBlueprint, CliError> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    Ok(config_loader::ConfigLoader::load_from_path(path)?)
}

/// Report the error, wait out the cooldown, then fail the command
async fn fatal_exit(e: CliError, delay: Duration) -> Result<()> {
    observability::report_exception(e.exception_kind(), &e.to_string());
    error!(
        error = %e,
        delay_secs = delay.as_secs(),
        "Unrecoverable error, exiting after cooldown"
    );
    tokio::time::sleep(delay).await;
    Err(e).context("Fatal error")
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ForwarderBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("HTTPS:");
    println!("  Endpoint: {}", blueprint.https.endpoint);
    println!("  Certificate: {}", blueprint.https.cert_file_path);

    match &blueprint.relay {
        Some(relay) => println!("\nRelay: {} (tag {})", relay.socket_path, relay.tag),
        None => println!("\nRelay: disabled"),
    }
    match &blueprint.cloud {
        Some(cloud) => println!(
            "Cloud ingest: {} -> {}.{}",
            cloud.endpoint, cloud.database, cloud.table
        ),
        None => println!("Cloud ingest: disabled"),
    }

    println!("\nBuffer:");
    println!("  Capacity: {}", blueprint.buffer.capacity);
    println!("  Overflow policy: {:?}", blueprint.buffer.overflow_policy);
    println!();
}
