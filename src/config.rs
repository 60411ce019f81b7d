// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the backup worker.
//!
//! Configuration is passed to [`BackupWorker::new()`](crate::BackupWorker::new)
//! and can be constructed programmatically, from the binary's CLI/env surface,
//! or deserialized from JSON.
//!
//! # Configuration Structure
//!
//! ```text
//! BackupConfig
//! ├── source: StoreConfig          # primary object store (read)
//! ├── destination: StoreConfig     # backup object store (write)
//! ├── broker: BrokerConfig         # AMQP host, credentials, queue name
//! └── settings: WorkerSettings
//!     ├── download_timeout: "5m"
//!     ├── upload_timeout: "5m"
//!     ├── invalid_messages: dead_letter
//!     └── shutdown_timeout: "10s"
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source":      { "endpoint": "http://minio-main:9000", "access_key": "a", "secret_key": "s" },
//!   "destination": { "endpoint": "http://minio-backup:9000", "access_key": "b", "secret_key": "t" },
//!   "broker":      { "host": "rabbitmq" },
//!   "settings":    { "invalid_messages": "leave_pending" }
//! }
//! ```

use crate::error::ReplicationError;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `BackupWorker::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Store objects are read from.
    pub source: StoreConfig,

    /// Store objects are written to, under the same bucket and key.
    pub destination: StoreConfig,

    /// Broker the replication requests arrive on.
    pub broker: BrokerConfig,

    /// Timeouts and message handling.
    #[serde(default)]
    pub settings: WorkerSettings,
}

impl BackupConfig {
    /// Create a config pointing at local services, for tests.
    pub fn for_testing(broker_host: &str) -> Self {
        Self {
            source: StoreConfig::for_testing("http://localhost:9000"),
            destination: StoreConfig::for_testing("http://localhost:9001"),
            broker: BrokerConfig::for_testing(broker_host),
            settings: WorkerSettings::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: one per object store
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for an S3-compatible object store.
///
/// Endpoint and credentials are bound once, when the client is built.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL, e.g. `http://minio-main:9000`.
    pub endpoint: String,

    pub access_key: String,

    pub secret_key: String,

    /// Signing region. MinIO accepts any value.
    #[serde(default = "default_region")]
    pub region: String,

    /// Use `endpoint/bucket/key` addressing instead of virtual hosts.
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

impl StoreConfig {
    /// Build from a plain host name and port, as the deployment passes them.
    pub fn from_host_port(
        host: &str,
        port: u16,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: format!("http://{}:{}", host, port),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            force_path_style: true,
        }
    }

    /// Create a store config with MinIO's default credentials.
    pub fn for_testing(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            region: default_region(),
            force_path_style: true,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BrokerConfig: AMQP connection and queue
// ═══════════════════════════════════════════════════════════════════════════════

/// AMQP broker connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,

    #[serde(default = "default_amqp_port")]
    pub port: u16,

    #[serde(default = "default_guest")]
    pub username: String,

    #[serde(default = "default_guest")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Durable queue carrying replication requests.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Consumer tag shown in the broker's management UI.
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue_name() -> String {
    "file_transfer_queue".to_string()
}

fn default_consumer_tag() -> String {
    "backup-replicator".to_string()
}

impl BrokerConfig {
    /// Config with every default except the host.
    pub fn for_testing(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: default_amqp_port(),
            username: default_guest(),
            password: default_guest(),
            vhost: default_vhost(),
            queue_name: default_queue_name(),
            consumer_tag: default_consumer_tag(),
        }
    }

    /// AMQP URI for this broker.
    ///
    /// Built field by field, so credentials and vhost are passed through
    /// verbatim and need no escaping.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            ..AMQPUri::default()
        }
    }

    /// Connection target without credentials, for logs.
    pub fn display_uri(&self) -> String {
        format!(
            "amqp://{}@{}:{} vhost={}",
            self.username, self.host, self.port, self.vhost
        )
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("vhost", &self.vhost)
            .field("queue_name", &self.queue_name)
            .field("consumer_tag", &self.consumer_tag)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WorkerSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// What the consumer does with a delivery it will never be able to copy.
///
/// Covers payloads that are not JSON objects and well-formed requests that
/// fail validation (wrong version, missing bucket or key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidMessagePolicy {
    /// Leave the delivery unacknowledged. With prefetch 1 this stalls the
    /// consumer until the channel is closed.
    LeavePending,
    /// Acknowledge and drop well-formed requests that fail validation.
    /// Malformed payloads are still left pending.
    Acknowledge,
    /// Reject without requeue so a broker dead-letter exchange can catch it.
    #[default]
    DeadLetter,
}

impl InvalidMessagePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeavePending => "leave_pending",
            Self::Acknowledge => "acknowledge",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for InvalidMessagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidMessagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "leave_pending" => Ok(Self::LeavePending),
            "acknowledge" | "ack" => Ok(Self::Acknowledge),
            "dead_letter" | "reject" => Ok(Self::DeadLetter),
            other => Err(format!(
                "unknown invalid-message policy '{}' (expected leave_pending, acknowledge or dead_letter)",
                other
            )),
        }
    }
}

/// Tunables for the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Bounded wait for opening and fully reading a source object.
    #[serde(default = "default_transfer_timeout")]
    pub download_timeout: String,

    /// Bounded wait for bucket creation plus the put.
    #[serde(default = "default_transfer_timeout")]
    pub upload_timeout: String,

    #[serde(default)]
    pub invalid_messages: InvalidMessagePolicy,

    /// How long `shutdown()` waits for the in-flight envelope.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

fn default_transfer_timeout() -> String {
    "5m".to_string()
}

fn default_shutdown_timeout() -> String {
    "10s".to_string()
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            download_timeout: default_transfer_timeout(),
            upload_timeout: default_transfer_timeout(),
            invalid_messages: InvalidMessagePolicy::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl WorkerSettings {
    /// Parse the download timeout, falling back to 5 minutes.
    pub fn download_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.download_timeout).unwrap_or(Duration::from_secs(300))
    }

    /// Parse the upload timeout, falling back to 5 minutes.
    pub fn upload_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.upload_timeout).unwrap_or(Duration::from_secs(300))
    }

    /// Parse the shutdown timeout, falling back to 10 seconds.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.shutdown_timeout).unwrap_or(Duration::from_secs(10))
    }

    /// Reject timeouts that would otherwise fall back or expire instantly.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Config`] naming the first bad setting.
    pub fn validate(&self) -> crate::error::Result<()> {
        let timeouts = [
            ("download_timeout", &self.download_timeout),
            ("upload_timeout", &self.upload_timeout),
            ("shutdown_timeout", &self.shutdown_timeout),
        ];
        for (name, value) in timeouts {
            parse_timeout(value).map_err(|e| ReplicationError::Config(format!("{}: {}", name, e)))?;
        }
        Ok(())
    }
}

/// Parse a humantime duration that must be greater than zero.
///
/// A bare number such as `30` has no unit and is rejected.
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| format!("invalid duration '{}': {}", value, e))?;
    if duration.is_zero() {
        return Err(format!("duration '{}' must be greater than zero", value));
    }
    Ok(duration)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
