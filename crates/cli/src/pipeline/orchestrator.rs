//! Pipeline orchestrator - coordinates all components.
//!
//! producers (OS threads) -> RecordBuffer -> DeliveryDispatcher -> backends

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use client_factory::{ClientFactory, SenderFactory};
use contracts::ForwarderBlueprint;
use dispatcher::{create_dispatcher, RecordBuffer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::producer::{spawn_producer, InputSource, ProducerContext};
use super::PipelineStats;
use crate::error::{CliError, Result};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated forwarder configuration
    pub blueprint: Arc<ForwarderBlueprint>,

    /// Input files (empty = stdin)
    pub inputs: Vec<PathBuf>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    factory: Arc<dyn ClientFactory>,
}

impl Pipeline {
    /// Create a new pipeline backed by the real senders
    pub fn new(config: PipelineConfig) -> Self {
        let factory = Arc::new(SenderFactory::new(Arc::clone(&config.blueprint)));
        Self::with_factory(config, factory)
    }

    /// Create a pipeline with a custom client factory
    pub fn with_factory(config: PipelineConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self { config, factory }
    }

    /// Run until every input hits EOF or `shutdown` is cancelled
    ///
    /// # Errors
    /// - Dispatcher startup failed (fatal when the primary backend is unusable)
    /// - The primary backend was lost while running (fatal)
    /// - An input could not be opened
    #[instrument(name = "pipeline_run", skip(self, shutdown))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)
                .map_err(|e| CliError::pipeline_execution(format!("{e:#}")))?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Setup Dispatcher
        let buffer = Arc::new(RecordBuffer::from_settings(&blueprint.buffer));
        let dispatcher =
            create_dispatcher(blueprint, Arc::clone(&self.factory), Arc::clone(&buffer)).await?;
        let states = dispatcher.slot_states();
        let dispatch_token = dispatcher.shutdown_token();
        let mut dispatcher_handle = dispatcher.spawn();

        info!(backends = ?states, "Dispatcher started");

        // Start producers
        let ctx = ProducerContext {
            buffer: Arc::clone(&buffer),
            routes: blueprint.enabled_backends(),
            next_id: Arc::new(AtomicU64::new(0)),
        };
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        for source in InputSource::from_paths(&self.config.inputs) {
            info!(source = %source.name(), "Starting producer");
            if let Err(e) = spawn_producer(source, ctx.clone(), done_tx.clone()) {
                dispatch_token.cancel();
                let _ = dispatcher_handle.await;
                return Err(e);
            }
        }
        drop(done_tx);

        let mut stats = PipelineStats::default();
        let mut interrupted = false;
        let mut stopped_early = None;
        loop {
            tokio::select! {
                producer = done_rx.recv() => match producer {
                    Some(producer) => stats.add_producer(&producer),
                    None => {
                        info!("All inputs finished, draining buffer");
                        break;
                    }
                },
                report = &mut dispatcher_handle => {
                    warn!("Dispatcher stopped before inputs finished");
                    stopped_early = Some(report);
                    break;
                }
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested, stopping pipeline");
                    interrupted = true;
                    break;
                }
            }
        }

        // Shutdown
        buffer.close();
        let report = if let Some(report) = stopped_early {
            report
        } else if interrupted {
            dispatch_token.cancel();
            dispatcher_handle.await
        } else {
            tokio::select! {
                report = &mut dispatcher_handle => report,
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested while draining");
                    dispatch_token.cancel();
                    (&mut dispatcher_handle).await
                }
            }
        };
        stats.dispatch = report
            .map_err(|e| CliError::pipeline_execution(format!("dispatcher task failed: {e}")))?;
        if let Some(err) = stats.dispatch.fatal_error() {
            return Err(err.into());
        }

        // producers stopped by a signal may not have reported yet
        while let Ok(producer) = done_rx.try_recv() {
            stats.add_producer(&producer);
        }

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            delivered = stats.dispatch.total_delivered(),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}
