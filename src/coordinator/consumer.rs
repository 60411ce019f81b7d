// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue consumer: one envelope at a time, acknowledged only after the copy.
//!
//! Per-envelope state machine:
//!
//! ```text
//! Received ──decode──┬── malformed ──→ Malformed  (never acked; rejected under dead_letter)
//!                    ├── ignored ────→ Ignored    (settled per InvalidMessagePolicy)
//!                    └── request ────→ Processing ──┬── ok ───→ Acknowledged (ack, multiple = false)
//!                                                   └── err ──→ Failed       (left pending)
//! ```
//!
//! # Concurrency
//!
//! The broker pushes at most one unacknowledged delivery (prefetch 1) and the
//! processor holds a one-permit [`Bulkhead`] for the whole of an envelope, so
//! even two loops sharing a processor never overlap copies. The loop does not
//! poll the next delivery until the current one has been settled.
//!
//! # Graceful Shutdown
//!
//! The shutdown signal is checked between envelopes with a biased
//! `tokio::select!`, so a copy in progress always runs to completion and is
//! settled before the loop exits.

use crate::broker::Envelope;
use crate::config::InvalidMessagePolicy;
use crate::error::{ReplicationError, Result};
use crate::event::{classify, Decoded};
use crate::metrics;
use crate::object_store::ObjectStore;
use crate::replicate::Replicator;
use crate::resilience::Bulkhead;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::types::{Outcome, Processed, ProcessingStats, Settlement};

/// Decodes, copies and settles envelopes.
pub struct EnvelopeProcessor<S: ObjectStore, D: ObjectStore> {
    replicator: Replicator<S, D>,
    policy: InvalidMessagePolicy,
    bulkhead: Bulkhead,
    stats: Arc<ProcessingStats>,
}

impl<S: ObjectStore, D: ObjectStore> EnvelopeProcessor<S, D> {
    pub fn new(replicator: Replicator<S, D>, policy: InvalidMessagePolicy) -> Self {
        Self {
            replicator,
            policy,
            bulkhead: Bulkhead::single(),
            stats: Arc::new(ProcessingStats::default()),
        }
    }

    pub fn replicator(&self) -> &Replicator<S, D> {
        &self.replicator
    }

    pub fn policy(&self) -> InvalidMessagePolicy {
        self.policy
    }

    pub fn stats(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    /// True while an envelope holds the permit.
    pub fn is_busy(&self) -> bool {
        self.bulkhead.is_full()
    }

    /// Process one envelope to its settlement.
    ///
    /// Copy failures and undecodable payloads are outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Only a failed `basic.ack` / `basic.reject` is returned: the channel is
    /// unusable and the consumer must stop.
    pub async fn process<E: Envelope>(&self, envelope: &E) -> Result<Processed> {
        let _permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|e| ReplicationError::Internal(e.to_string()))?;
        metrics::set_in_flight(1);

        let span = info_span!(
            "envelope",
            delivery_tag = envelope.delivery_tag(),
            redelivered = envelope.redelivered()
        );
        let result = self.process_inner(envelope).instrument(span).await;

        metrics::set_in_flight(0);
        if let Ok(ref processed) = result {
            self.stats.record(processed);
            metrics::record_envelope(processed.outcome.as_str(), processed.settlement.as_str());
        }
        result
    }

    async fn process_inner<E: Envelope>(&self, envelope: &E) -> Result<Processed> {
        let delivery_tag = envelope.delivery_tag();
        if envelope.redelivered() {
            metrics::record_redelivery();
            debug!("Processing redelivered message");
        }

        let request = match classify(envelope.payload()) {
            Ok(Decoded::Request(request)) => request,
            Ok(Decoded::Ignored(reason)) => {
                info!(reason = %reason, "Ignoring message that is not a supported replication request");
                metrics::record_ignored(reason.as_str());
                let settlement = match self.policy {
                    InvalidMessagePolicy::LeavePending => Settlement::LeftPending,
                    InvalidMessagePolicy::Acknowledge => settle_ack(envelope).await?,
                    InvalidMessagePolicy::DeadLetter => settle_reject(envelope).await?,
                };
                return Ok(Processed {
                    delivery_tag,
                    outcome: Outcome::Ignored,
                    settlement,
                    bytes: None,
                });
            }
            Err(e) => {
                warn!(error = %e, bytes = envelope.payload().len(), "Malformed message payload");
                metrics::record_malformed();
                let settlement = match self.policy {
                    InvalidMessagePolicy::DeadLetter => settle_reject(envelope).await?,
                    InvalidMessagePolicy::LeavePending | InvalidMessagePolicy::Acknowledge => {
                        Settlement::LeftPending
                    }
                };
                return Ok(Processed {
                    delivery_tag,
                    outcome: Outcome::Malformed,
                    settlement,
                    bytes: None,
                });
            }
        };

        debug!(bucket = %request.bucket, key = %request.object_key, "Replicating object");

        match self.replicator.replicate(&request).await {
            Ok(stats) => {
                let settlement = settle_ack(envelope).await?;
                Ok(Processed {
                    delivery_tag,
                    outcome: Outcome::Acknowledged,
                    settlement,
                    bytes: Some(stats.bytes),
                })
            }
            Err(e) => {
                error!(
                    bucket = %request.bucket,
                    key = %request.object_key,
                    error = %e,
                    "Replication failed, leaving message unacknowledged"
                );
                Ok(Processed {
                    delivery_tag,
                    outcome: Outcome::Failed,
                    settlement: Settlement::LeftPending,
                    bytes: None,
                })
            }
        }
    }
}

async fn settle_ack<E: Envelope>(envelope: &E) -> Result<Settlement> {
    envelope.ack().await.inspect_err(|e| {
        error!(error = %e, "Failed to acknowledge message");
        metrics::record_settlement_error("basic.ack");
    })?;
    Ok(Settlement::Acked)
}

async fn settle_reject<E: Envelope>(envelope: &E) -> Result<Settlement> {
    envelope.reject(false).await.inspect_err(|e| {
        error!(error = %e, "Failed to reject message");
        metrics::record_settlement_error("basic.reject");
    })?;
    Ok(Settlement::Rejected)
}

/// Drive `processor` from a delivery stream until shutdown or broker loss.
///
/// Returns `Ok(())` only when the shutdown signal is observed. A delivery
/// error or the end of the stream is a broker failure and is returned as
/// [`ReplicationError::Broker`].
pub async fn run_consumer<St, E, S, D>(
    deliveries: St,
    processor: Arc<EnvelopeProcessor<S, D>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    St: Stream<Item = Result<E>>,
    E: Envelope,
    S: ObjectStore,
    D: ObjectStore,
{
    let span = info_span!("consumer");

    async move {
        tokio::pin!(deliveries);
        info!("Listening for replication requests");

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, consumer stopping");
                return Ok(());
            }

            let next = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, consumer stopping");
                        return Ok(());
                    }
                    continue;
                }

                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    let processed = processor.process(&envelope).await?;
                    debug!(
                        delivery_tag = processed.delivery_tag,
                        outcome = processed.outcome.as_str(),
                        settlement = processed.settlement.as_str(),
                        "Envelope settled"
                    );
                }
                Some(Err(e)) => {
                    error!(error = %e, "Delivery stream failed");
                    return Err(e);
                }
                None => {
                    error!("Delivery stream closed by broker");
                    return Err(ReplicationError::broker_msg(
                        "basic.consume",
                        "consumer stream closed",
                    ));
                }
            }
        }
    }
    .instrument(span)
    .await
}
