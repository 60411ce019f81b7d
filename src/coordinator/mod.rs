// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backup worker coordinator.
//!
//! Ties together:
//! - The broker connection via [`crate::broker::BrokerConnection`]
//! - Envelope processing via [`EnvelopeProcessor`]
//! - The copy itself via [`crate::replicate::Replicator`]
//!
//! # Architecture
//!
//! 1. Connects to the broker (startup retry profile)
//! 2. Declares the queue, sets prefetch 1 and subscribes
//! 3. Runs the consumer loop on a dedicated task
//! 4. On shutdown, lets the in-flight envelope settle, then closes the
//!    connection so anything still unacknowledged is redelivered

mod consumer;
mod types;

pub use consumer::{run_consumer, EnvelopeProcessor};
pub use types::{
    HealthCheck, Outcome, Processed, ProcessingStats, Settlement, StatsSnapshot, WorkerState,
};

use crate::broker::BrokerConnection;
use crate::config::BackupConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::object_store::ObjectStore;
use crate::replicate::Replicator;
use crate::resilience::RetryConfig;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The backup worker.
///
/// Consumes replication requests from one queue and copies each referenced
/// object from `source` to `destination`.
pub struct BackupWorker<S: ObjectStore, D: ObjectStore> {
    config: BackupConfig,

    /// Worker state (broadcast to watchers)
    state_tx: watch::Sender<WorkerState>,
    state_rx: watch::Receiver<WorkerState>,

    broker: Arc<BrokerConnection>,
    processor: Arc<EnvelopeProcessor<S, D>>,
    retry_config: RetryConfig,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    consumer_handle: Option<JoinHandle<Result<()>>>,
}

impl<S: ObjectStore, D: ObjectStore> BackupWorker<S, D> {
    /// Create a worker. Nothing connects until [`start()`](Self::start).
    pub fn new(config: BackupConfig, source: Arc<S>, destination: Arc<D>) -> Self {
        let (state_tx, state_rx) = watch::channel(WorkerState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let replicator = Replicator::new(
            source,
            destination,
            config.settings.download_timeout_duration(),
            config.settings.upload_timeout_duration(),
        );
        let processor = Arc::new(EnvelopeProcessor::new(
            replicator,
            config.settings.invalid_messages,
        ));
        let broker = Arc::new(BrokerConnection::new(config.broker.clone()));

        Self {
            config,
            state_tx,
            state_rx,
            broker,
            processor,
            retry_config: RetryConfig::startup(),
            shutdown_tx,
            shutdown_rx,
            consumer_handle: None,
        }
    }

    /// Override the connection retry profile.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<BrokerConnection> {
        &self.broker
    }

    pub fn processor(&self) -> &Arc<EnvelopeProcessor<S, D>> {
        &self.processor
    }

    /// Get current worker state.
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), WorkerState::Running)
    }

    /// Counters since start.
    pub fn stats(&self) -> StatsSnapshot {
        self.processor.stats().snapshot()
    }

    fn set_state(&self, state: WorkerState) {
        let _ = self.state_tx.send(state);
        metrics::set_worker_state(&state.to_string());
    }

    /// Health status for monitoring endpoints. Performs no network I/O.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let broker_connected = self.broker.is_connected().await;

        HealthCheck {
            state,
            ready: state == WorkerState::Running && broker_connected,
            broker_connected,
            busy: self.processor.is_busy(),
            stats: self.stats(),
        }
    }

    /// Connect, subscribe and spawn the consumer task.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != WorkerState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        if let Err(e) = self.config.settings.validate() {
            error!(error = %e, "Invalid worker settings");
            self.set_state(WorkerState::Failed);
            return Err(e);
        }

        info!(
            queue = %self.config.broker.queue_name,
            source = %self.config.source.endpoint,
            destination = %self.config.destination.endpoint,
            policy = %self.config.settings.invalid_messages,
            "Starting backup worker"
        );
        self.set_state(WorkerState::Connecting);

        if let Err(e) = self.broker.connect(&self.retry_config).await {
            error!(error = %e, "Could not connect to broker");
            self.set_state(WorkerState::Failed);
            return Err(e);
        }

        info!("Subscribing to events");
        let consumer = match self.broker.subscribe().await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "Could not subscribe to queue");
                self.set_state(WorkerState::Failed);
                return Err(e);
            }
        };

        let deliveries =
            consumer.map(|delivery| delivery.map_err(|e| ReplicationError::broker("basic.consume", e)));
        let processor = Arc::clone(&self.processor);
        let shutdown_rx = self.shutdown_rx.clone();

        self.consumer_handle = Some(tokio::spawn(run_consumer(
            deliveries,
            processor,
            shutdown_rx,
        )));
        debug!("Spawned consumer task");

        self.set_state(WorkerState::Running);
        Ok(())
    }

    /// Wait for the consumer task to end.
    ///
    /// Returns `Ok(())` after a requested shutdown and the broker error
    /// otherwise. Cancel-safe: dropping this future leaves the task running.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.consumer_handle.as_mut() else {
            return Ok(());
        };

        let joined = handle.await;
        self.consumer_handle = None;

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Consumer stopped");
                self.set_state(WorkerState::Failed);
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Consumer task panicked");
                self.set_state(WorkerState::Failed);
                Err(ReplicationError::Internal(format!("consumer task panicked: {}", e)))
            }
        }
    }

    /// `start()` followed by `wait()`.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }

    /// Shut down gracefully.
    ///
    /// 1. Signal the consumer to stop between envelopes
    /// 2. Wait for the in-flight envelope to settle (bounded)
    /// 3. Close the broker connection
    pub async fn shutdown(&mut self) {
        info!("Shutting down backup worker");
        let failed = self.state() == WorkerState::Failed;
        self.set_state(WorkerState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);
        self.broker.request_shutdown();

        if let Some(handle) = self.consumer_handle.take() {
            let drain_timeout = self.config.settings.shutdown_timeout_duration();
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(Ok(()))) => debug!("Consumer stopped gracefully"),
                Ok(Ok(Err(e))) => warn!(error = %e, "Consumer ended with error during shutdown"),
                Ok(Err(e)) => warn!(error = %e, "Consumer task panicked during shutdown"),
                Err(_) => warn!(
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "Consumer did not stop in time, in-flight message will be redelivered"
                ),
            }
        }

        if let Err(e) = self.broker.close().await {
            warn!(error = %e, "Error closing broker connection");
        }

        self.set_state(if failed { WorkerState::Failed } else { WorkerState::Stopped });
        info!("Backup worker stopped");
    }
}
