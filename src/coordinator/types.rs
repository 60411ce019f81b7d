// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Worker state and per-envelope outcome types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Connecting
//!    │                              │
//!    │ shutdown()                   │ (subscribed)        (retries exhausted)
//!    ↓                              ↓                           ↓
//! Stopped ←── ShuttingDown ←──── Running ──── (broker lost) ──→ Failed
//!                        shutdown()
//! ```
//!
//! - **Created**: after `BackupWorker::new()`. No connections.
//! - **Connecting**: `start()` called, connecting to the broker.
//! - **Running**: consumer task owns the subscription.
//! - **ShuttingDown**: `shutdown()` called, waiting for the in-flight envelope.
//! - **Stopped**: clean shutdown complete.
//! - **Failed**: could not connect, or the delivery stream ended.

use std::sync::atomic::{AtomicU64, Ordering};

/// State of the backup worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Connecting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Created => write!(f, "Created"),
            WorkerState::Connecting => write!(f, "Connecting"),
            WorkerState::Running => write!(f, "Running"),
            WorkerState::ShuttingDown => write!(f, "ShuttingDown"),
            WorkerState::Stopped => write!(f, "Stopped"),
            WorkerState::Failed => write!(f, "Failed"),
        }
    }
}

/// What processing concluded about one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Object copied.
    Acknowledged,
    /// Well-formed payload that is not a supported request.
    Ignored,
    /// Payload is not a JSON object.
    Malformed,
    /// Copy attempted and failed.
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Acknowledged => "acknowledged",
            Outcome::Ignored => "ignored",
            Outcome::Malformed => "malformed",
            Outcome::Failed => "failed",
        }
    }
}

/// What happened to the delivery handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// `basic.ack` sent for this delivery tag only.
    Acked,
    /// `basic.reject` sent with `requeue = false`.
    Rejected,
    /// Nothing sent. The broker redelivers once the channel closes.
    LeftPending,
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Acked => "acked",
            Settlement::Rejected => "rejected",
            Settlement::LeftPending => "left_pending",
        }
    }
}

/// Result of processing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processed {
    pub delivery_tag: u64,
    pub outcome: Outcome,
    pub settlement: Settlement,
    /// Bytes copied, for `Acknowledged` only.
    pub bytes: Option<usize>,
}

/// Monotonic counters shared between the consumer task and observers.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    received: AtomicU64,
    acknowledged: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
    bytes_copied: AtomicU64,
}

impl ProcessingStats {
    pub fn record(&self, processed: &Processed) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match processed.outcome {
            Outcome::Acknowledged => &self.acknowledged,
            Outcome::Ignored => &self.ignored,
            Outcome::Malformed => &self.malformed,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(bytes) = processed.bytes {
            self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub failed: u64,
    pub bytes_copied: u64,
}

/// Health status for monitoring.
///
/// Collected from cached state only; no network I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: WorkerState,
    /// Running with an open broker connection.
    pub ready: bool,
    pub broker_connected: bool,
    /// True while an envelope is being processed.
    pub busy: bool,
    pub stats: StatsSnapshot,
}
