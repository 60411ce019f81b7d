// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the backup replicator.
//!
//! Errors are categorized by where they originate (payload decoding, the
//! source or destination store, the broker) and carry enough context to be
//! logged on their own: every copy failure names the bucket and object key.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Decode` | No | Payload is not UTF-8 JSON object text |
//! | `Download` | Yes | Source store failed or object missing |
//! | `Upload` | Yes | Destination store rejected the write |
//! | `Timeout` | Yes | A store call exceeded its bounded wait |
//! | `Broker` | Yes | AMQP connection or channel failure |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Worker state machine violation |
//! | `Shutdown` | No | Worker is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! "Retryable" describes the nature of the failure only. The consumer never
//! retries a copy on its own; an unacknowledged message is redelivered by the
//! broker when the channel is closed.

use crate::object_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Which half of a copy was running when a bounded wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Download,
    Upload,
}

impl std::fmt::Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Errors that can occur while consuming and replicating.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Payload could not be parsed as structured text at all.
    ///
    /// Distinct from a well-formed message that simply does not match the
    /// expected schema, which is not an error (see [`crate::event::classify`]).
    #[error("Decode error: {0}")]
    Decode(String),

    /// Reading the object from the source store failed.
    ///
    /// No destination mutation has happened when this is returned.
    #[error("Download of {bucket}/{key} failed: {source}")]
    Download {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Writing the object to the destination store failed.
    #[error("Upload of {bucket}/{key} failed: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    /// A store call did not resolve within its bounded wait.
    #[error("{stage} of {bucket}/{key} timed out after {after:?}")]
    Timeout {
        stage: TransferStage,
        bucket: String,
        key: String,
        after: Duration,
    },

    /// AMQP connection, channel or delivery stream failure.
    ///
    /// This is the only error that stops the consumer loop.
    #[error("Broker error ({operation}): {message}")]
    Broker {
        operation: String,
        message: String,
        #[source]
        source: Option<lapin::Error>,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker state machine violation (e.g. `start()` twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a broker error from a `lapin::Error`.
    pub fn broker(operation: impl Into<String>, source: lapin::Error) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a broker error without source.
    pub fn broker_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Download { .. } => true,
            Self::Upload { .. } => true,
            Self::Timeout { .. } => true,
            Self::Broker { .. } => true,
            Self::Decode(_) => false, // Payload is corrupt at the producer
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Bucket and key of the object this error is about, if any.
    pub fn object(&self) -> Option<(&str, &str)> {
        match self {
            Self::Download { bucket, key, .. }
            | Self::Upload { bucket, key, .. }
            | Self::Timeout { bucket, key, .. } => Some((bucket, key)),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Download { .. } => "download",
            Self::Upload { .. } => "upload",
            Self::Timeout { .. } => "timeout",
            Self::Broker { .. } => "broker",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}
