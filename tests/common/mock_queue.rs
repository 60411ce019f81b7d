// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory delivery queue for consumer tests.
//!
//! Envelopes share a [`SettlementLog`] with the queue that produced them, so
//! tests can inspect acks and rejects after the consumer has taken ownership.

use backup_replicator::broker::{Envelope, SettleFuture};
use backup_replicator::{ReplicationError, Result};
use futures::channel::mpsc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A settlement call made by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleCall {
    Ack(u64),
    Reject { delivery_tag: u64, requeue: bool },
}

/// Every settlement call, in order.
#[derive(Debug, Default)]
pub struct SettlementLog {
    calls: Mutex<Vec<SettleCall>>,
    fail_settlements: AtomicBool,
}

impl SettlementLog {
    fn push(&self, call: SettleCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<SettleCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn acks_for(&self, delivery_tag: u64) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == SettleCall::Ack(delivery_tag))
            .count()
    }

    pub fn rejects_for(&self, delivery_tag: u64) -> Vec<bool> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                SettleCall::Reject { delivery_tag: t, requeue } if *t == delivery_tag => {
                    Some(*requeue)
                }
                _ => None,
            })
            .collect()
    }

    pub fn total_acks(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SettleCall::Ack(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.calls().is_empty()
    }
}

/// A delivery with a recording ack/reject handle.
#[derive(Debug)]
pub struct MockEnvelope {
    payload: Vec<u8>,
    delivery_tag: u64,
    redelivered: bool,
    log: Arc<SettlementLog>,
}

impl MockEnvelope {
    /// Flag as a broker redelivery.
    pub fn mark_redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }

    fn settle(&self, call: SettleCall, operation: &'static str) -> Result<()> {
        if self.log.fail_settlements.load(Ordering::SeqCst) {
            return Err(ReplicationError::broker_msg(operation, "channel closed"));
        }
        self.log.push(call);
        Ok(())
    }
}

impl Envelope for MockEnvelope {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    fn ack(&self) -> SettleFuture<'_> {
        Box::pin(async move { self.settle(SettleCall::Ack(self.delivery_tag), "basic.ack") })
    }

    fn reject(&self, requeue: bool) -> SettleFuture<'_> {
        Box::pin(async move {
            self.settle(
                SettleCall::Reject {
                    delivery_tag: self.delivery_tag,
                    requeue,
                },
                "basic.reject",
            )
        })
    }
}

/// Stream half handed to `run_consumer`.
pub type MockDeliveries = mpsc::UnboundedReceiver<Result<MockEnvelope>>;

/// Producer half of an in-memory queue.
///
/// # Example
/// ```rust,ignore
/// let (queue, deliveries) = MockQueue::new();
/// let tag = queue.push(br#"{"version":1,"bucketname":"b1","fileguid":"f1"}"#);
/// queue.close();
///
/// run_consumer(deliveries, processor, shutdown_rx).await;
/// assert_eq!(queue.log().acks_for(tag), 1);
/// ```
pub struct MockQueue {
    tx: mpsc::UnboundedSender<Result<MockEnvelope>>,
    next_tag: AtomicU64,
    log: Arc<SettlementLog>,
}

impl MockQueue {
    pub fn new() -> (Self, MockDeliveries) {
        let (tx, rx) = mpsc::unbounded();
        let queue = Self {
            tx,
            next_tag: AtomicU64::new(1),
            log: Arc::new(SettlementLog::default()),
        };
        (queue, rx)
    }

    pub fn log(&self) -> &Arc<SettlementLog> {
        &self.log
    }

    /// Build an envelope without queueing it, for direct `process()` calls.
    pub fn envelope(&self, payload: impl Into<Vec<u8>>) -> MockEnvelope {
        MockEnvelope {
            payload: payload.into(),
            delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
            redelivered: false,
            log: Arc::clone(&self.log),
        }
    }

    /// Queue a delivery and return its tag.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> u64 {
        let envelope = self.envelope(payload);
        let tag = envelope.delivery_tag;
        let _ = self.tx.unbounded_send(Ok(envelope));
        tag
    }

    /// Queue a stream-level failure, as when the channel drops.
    pub fn push_error(&self, message: &str) {
        let _ = self
            .tx
            .unbounded_send(Err(ReplicationError::broker_msg("basic.consume", message)));
    }

    /// Make every subsequent ack/reject fail.
    pub fn fail_settlements(&self) {
        self.log.fail_settlements.store(true, Ordering::SeqCst);
    }

    /// End the stream.
    pub fn close(&self) {
        self.tx.close_channel();
    }
}

/// Wire payload for a valid request.
pub fn request_payload(bucket: &str, key: &str) -> Vec<u8> {
    serde_json::json!({ "version": 1, "bucketname": bucket, "fileguid": key })
        .to_string()
        .into_bytes()
}
