// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! AMQP broker connection and delivery handles.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Connected → Closed
//!                    ↓
//!                 Failed (retries exhausted)
//! ```
//!
//! The connection is established once at startup with [`RetryConfig`]
//! backoff. After that a lost connection is not reopened here: the consumer
//! stream ends, the worker fails and the process supervisor restarts it.
//! Unacknowledged deliveries go back to the queue when the channel closes.
//!
//! # Topology
//!
//! Exactly one named queue, declared durable, non-exclusive and not
//! auto-deleted. The consuming channel runs with `basic.qos(prefetch_count = 1,
//! global = false)` and manual acknowledgment.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> backup_replicator::Result<()> {
//! use backup_replicator::broker::BrokerConnection;
//! use backup_replicator::config::BrokerConfig;
//! use backup_replicator::resilience::RetryConfig;
//!
//! let broker = BrokerConnection::new(BrokerConfig::for_testing("localhost"));
//! broker.connect(&RetryConfig::startup()).await?;
//! let depth = broker.queue_depth().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::BrokerConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Unacknowledged deliveries the broker may push to the consumer.
///
/// Fixed: the consumer processes strictly one message at a time.
pub const PREFETCH_COUNT: u16 = 1;

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Future returned by settlement calls.
pub type SettleFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One received message plus its single-use delivery handle.
///
/// Implemented for `lapin`'s [`Delivery`] and by test doubles.
pub trait Envelope: Send + Sync {
    /// Raw message body.
    fn payload(&self) -> &[u8];

    /// Channel-scoped delivery tag.
    fn delivery_tag(&self) -> u64;

    /// Whether the broker has delivered this message before.
    fn redelivered(&self) -> bool;

    /// Acknowledge exactly this delivery (`multiple = false`).
    fn ack(&self) -> SettleFuture<'_>;

    /// Reject exactly this delivery.
    fn reject(&self, requeue: bool) -> SettleFuture<'_>;
}

impl Envelope for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn ack(&self) -> SettleFuture<'_> {
        Box::pin(async move {
            self.acker
                .ack(BasicAckOptions { multiple: false })
                .await
                .map(|_| ())
                .map_err(|e| ReplicationError::broker("basic.ack", e))
        })
    }

    fn reject(&self, requeue: bool) -> SettleFuture<'_> {
        Box::pin(async move {
            self.acker
                .reject(BasicRejectOptions { requeue })
                .await
                .map(|_| ())
                .map_err(|e| ReplicationError::broker("basic.reject", e))
        })
    }
}

/// State of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Not yet connected (initial state).
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and healthy.
    Connected,
    /// Retries exhausted.
    Failed,
    /// Closed on request.
    Closed,
}

/// A managed AMQP connection.
pub struct BrokerConnection {
    config: BrokerConfig,
    conn: RwLock<Option<Connection>>,
    state: RwLock<BrokerState>,
    shutdown: AtomicBool,
}

impl BrokerConnection {
    /// Create a new connection handle (not yet connected).
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            conn: RwLock::new(None),
            state: RwLock::new(BrokerState::Disconnected),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Name of the queue this connection consumes from.
    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Get current connection state.
    pub async fn state(&self) -> BrokerState {
        *self.state.read().await
    }

    /// True when connected and the underlying connection reports itself open.
    pub async fn is_connected(&self) -> bool {
        match self.conn.read().await.as_ref() {
            Some(conn) => conn.status().connected(),
            None => false,
        }
    }

    /// Connect to the broker with retry logic.
    pub async fn connect(&self, retry_config: &RetryConfig) -> Result<()> {
        *self.state.write().await = BrokerState::Connecting;
        info!(uri = %self.config.display_uri(), "Connecting to broker");

        let uri = self.config.amqp_uri();
        let mut attempt = 0;

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(ReplicationError::Shutdown);
            }

            attempt += 1;

            let failure = match timeout(
                retry_config.connection_timeout,
                Connection::connect_uri(uri.clone(), ConnectionProperties::default()),
            )
            .await
            {
                Ok(Ok(conn)) => {
                    *self.conn.write().await = Some(conn);
                    *self.state.write().await = BrokerState::Connected;
                    metrics::record_broker_connection(true);

                    if attempt > 1 {
                        info!(host = %self.config.host, attempt, "Connected to broker after retry");
                    } else {
                        info!(host = %self.config.host, "Connected to broker");
                    }
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "timed out after {}ms",
                    retry_config.connection_timeout.as_millis()
                ),
            };

            metrics::record_broker_connection(false);

            if attempt >= retry_config.max_attempts {
                *self.state.write().await = BrokerState::Failed;
                error!(
                    host = %self.config.host,
                    attempt,
                    error = %failure,
                    "Failed to connect to broker after max retries"
                );
                return Err(ReplicationError::broker_msg(
                    "connect",
                    format!("failed after {} attempts: {}", attempt, failure),
                ));
            }

            let delay = retry_config.delay_for_attempt(attempt);
            warn!(
                host = %self.config.host,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Broker connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn channel(&self) -> Result<Channel> {
        let guard = self.conn.read().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| ReplicationError::broker_msg("channel.open", "not connected"))?;
        conn.create_channel()
            .await
            .map_err(|e| ReplicationError::broker("channel.open", e))
    }

    async fn declare(&self, channel: &Channel) -> Result<u32> {
        let queue = channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ReplicationError::broker("queue.declare", e))?;
        Ok(queue.message_count())
    }

    /// Declare the queue and start consuming on a fresh channel.
    ///
    /// The returned consumer yields deliveries that must each be settled by
    /// the caller; none are auto-acknowledged.
    pub async fn subscribe(&self) -> Result<Consumer> {
        let channel = self.channel().await?;
        let depth = self.declare(&channel).await?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
            .await
            .map_err(|e| ReplicationError::broker("basic.qos", e))?;

        let consumer = channel
            .basic_consume(
                &self.config.queue_name,
                &self.config.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ReplicationError::broker("basic.consume", e))?;

        info!(
            queue = %self.config.queue_name,
            consumer_tag = %self.config.consumer_tag,
            prefetch = PREFETCH_COUNT,
            pending = depth,
            "Subscribed to queue"
        );
        Ok(consumer)
    }

    /// Publish one persistent message to the queue and wait for the broker
    /// to confirm it.
    pub async fn publish(&self, payload: &[u8]) -> Result<()> {
        let channel = self.channel().await?;
        self.declare(&channel).await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| ReplicationError::broker("confirm.select", e))?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.config.queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| ReplicationError::broker("basic.publish", e))?
            .await
            .map_err(|e| ReplicationError::broker("basic.publish", e))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(ReplicationError::broker_msg("basic.publish", "broker refused message"));
        }

        debug!(queue = %self.config.queue_name, bytes = payload.len(), "Published message");
        if let Err(e) = channel.close(200, "published").await {
            warn!(error = %e, queue = %self.config.queue_name, "Error closing channel");
        }
        Ok(())
    }

    /// Number of ready messages in the queue.
    pub async fn queue_depth(&self) -> Result<u32> {
        let channel = self.channel().await?;
        let depth = self.declare(&channel).await?;
        if let Err(e) = channel.close(200, "inspected").await {
            warn!(error = %e, queue = %self.config.queue_name, "Error closing channel");
        }
        Ok(depth)
    }

    /// Abort a pending `connect()` retry loop.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Close the connection. Unacknowledged deliveries return to the queue.
    pub async fn close(&self) -> Result<()> {
        self.request_shutdown();
        let conn = self.conn.write().await.take();
        *self.state.write().await = BrokerState::Closed;

        if let Some(conn) = conn {
            if conn.status().connected() {
                conn.close(200, "shutdown")
                    .await
                    .map_err(|e| ReplicationError::broker("connection.close", e))?;
            }
            info!(host = %self.config.host, "Broker connection closed");
        }
        Ok(())
    }
}

/// Wait until `queue_depth()` reaches zero, polling every 100ms.
///
/// Returns the last observed depth if `limit` elapses first.
pub async fn wait_for_empty_queue(broker: &BrokerConnection, limit: Duration) -> Result<u32> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let depth = broker.queue_depth().await?;
        if depth == 0 || tokio::time::Instant::now() >= deadline {
            return Ok(depth);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
