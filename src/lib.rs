// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Backup Replicator
//!
//! A queue-driven worker that copies objects from a primary S3-compatible
//! store to a backup store, one object per message.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           backup-replicator                              │
//! │                                                                          │
//! │  ┌──────────────────┐   ┌───────────────┐   ┌─────────────────────────┐  │
//! │  │ BrokerConnection │──►│ run_consumer  │──►│ EnvelopeProcessor       │  │
//! │  │ (AMQP, prefetch 1)│   │ (one task)    │   │ decode → copy → settle  │  │
//! │  └──────────────────┘   └───────────────┘   └────────────┬────────────┘  │
//! │                                                          │               │
//! │                                              ┌───────────▼───────────┐   │
//! │                                              │ Replicator            │   │
//! │                                              │ source ──► destination│   │
//! │                                              └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Contract
//!
//! - A message is acknowledged only after its object is on the destination.
//! - A failed copy leaves the message unacknowledged; the broker redelivers
//!   it when the channel closes.
//! - At most one message is in flight at any time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backup_replicator::{BackupConfig, BackupWorker, S3ObjectStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> backup_replicator::Result<()> {
//!     let config = BackupConfig::for_testing("localhost");
//!     let source = Arc::new(S3ObjectStore::new(&config.source));
//!     let destination = Arc::new(S3ObjectStore::new(&config.destination));
//!
//!     let mut worker = BackupWorker::new(config, source, destination);
//!     worker.start().await?;
//!
//!     // Runs until the broker goes away or shutdown is requested
//!     let result = worker.wait().await;
//!     worker.shutdown().await;
//!     result
//! }
//! ```

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod object_store;
pub mod replicate;
pub mod resilience;
pub mod s3;

// Re-exports for convenience
pub use broker::{BrokerConnection, Envelope};
pub use config::{BackupConfig, BrokerConfig, InvalidMessagePolicy, StoreConfig, WorkerSettings};
pub use coordinator::{BackupWorker, EnvelopeProcessor, WorkerState};
pub use error::{ReplicationError, Result};
pub use event::{classify, decode, Decoded, IgnoreReason, ReplicationRequest};
pub use object_store::{MemoryObjectStore, ObjectStore, StoreError};
pub use replicate::{CopyStats, Replicator};
pub use s3::S3ObjectStore;
