// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use anyhow::{Context, Result};
use backup_replicator::broker::BrokerConnection;
use backup_replicator::config::{
    parse_timeout, BackupConfig, BrokerConfig, InvalidMessagePolicy, StoreConfig, WorkerSettings,
};
use backup_replicator::resilience::RetryConfig;
use backup_replicator::{BackupWorker, ReplicationRequest, S3ObjectStore};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "backup-replicator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    stores: StoreArgs,

    #[arg(long, env = "BACKUP_DOWNLOAD_TIMEOUT", default_value = "5m", value_parser = parse_timeout)]
    download_timeout: Duration,
    #[arg(long, env = "BACKUP_UPLOAD_TIMEOUT", default_value = "5m", value_parser = parse_timeout)]
    upload_timeout: Duration,
    #[arg(long, env = "BACKUP_INVALID_MESSAGES", default_value = "dead_letter")]
    invalid_messages: InvalidMessagePolicy,
}

#[derive(Args)]
struct BrokerArgs {
    #[arg(long = "rabbitmq", env = "RABBITMQ")]
    host: String,
    #[arg(long = "rabbitmq-port", env = "RABBITMQ_PORT", default_value = "5672")]
    port: u16,
    #[arg(long = "rabbitmq-user", env = "RABBITMQ_USER", default_value = "guest")]
    username: String,
    #[arg(long = "rabbitmq-password", env = "RABBITMQ_PASSWORD", default_value = "guest", hide_env_values = true)]
    password: String,
    #[arg(long = "queue", env = "BACKUP_QUEUE", default_value = "file_transfer_queue")]
    queue_name: String,
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, env = "MINIO_SRC_NAME")]
    src_name: Option<String>,
    #[arg(long, env = "MINIO_SRC_PORT")]
    src_port: Option<u16>,
    #[arg(long, env = "MINIO_SRC_ACCESS_KEY")]
    src_access_key: Option<String>,
    #[arg(long, env = "MINIO_SRC_SECRET_KEY", hide_env_values = true)]
    src_secret_key: Option<String>,

    #[arg(long, env = "MINIO_DST_NAME")]
    dst_name: Option<String>,
    #[arg(long, env = "MINIO_DST_PORT")]
    dst_port: Option<u16>,
    #[arg(long, env = "MINIO_DST_ACCESS_KEY")]
    dst_access_key: Option<String>,
    #[arg(long, env = "MINIO_DST_SECRET_KEY", hide_env_values = true)]
    dst_secret_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue one replication request and exit
    Publish {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
    },
}

impl BrokerArgs {
    fn to_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            queue_name: self.queue_name.clone(),
            ..BrokerConfig::for_testing(&self.host)
        }
    }
}

fn required<T: Clone>(value: &Option<T>, env: &str) -> Result<T> {
    value
        .clone()
        .with_context(|| format!("{} is required", env))
}

impl StoreArgs {
    fn source(&self) -> Result<StoreConfig> {
        Ok(StoreConfig::from_host_port(
            &required(&self.src_name, "MINIO_SRC_NAME")?,
            required(&self.src_port, "MINIO_SRC_PORT")?,
            required(&self.src_access_key, "MINIO_SRC_ACCESS_KEY")?,
            required(&self.src_secret_key, "MINIO_SRC_SECRET_KEY")?,
        ))
    }

    fn destination(&self) -> Result<StoreConfig> {
        Ok(StoreConfig::from_host_port(
            &required(&self.dst_name, "MINIO_DST_NAME")?,
            required(&self.dst_port, "MINIO_DST_PORT")?,
            required(&self.dst_access_key, "MINIO_DST_ACCESS_KEY")?,
            required(&self.dst_secret_key, "MINIO_DST_SECRET_KEY")?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Publish { ref bucket, ref key }) => publish(&cli, bucket, key).await,
        None => run(&cli).await,
    }
}

async fn publish(cli: &Cli, bucket: &str, key: &str) -> Result<()> {
    let broker = BrokerConnection::new(cli.broker.to_config());
    broker
        .connect(&RetryConfig::startup())
        .await
        .context("connecting to broker")?;

    let request = ReplicationRequest::new(bucket, key);
    broker
        .publish(&request.to_payload())
        .await
        .context("publishing request")?;
    info!(bucket = %bucket, key = %key, queue = %broker.queue_name(), "Request published");

    broker.close().await?;
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    info!("Initializing backup manager v{}", env!("CARGO_PKG_VERSION"));

    let config = BackupConfig {
        source: cli.stores.source()?,
        destination: cli.stores.destination()?,
        broker: cli.broker.to_config(),
        settings: WorkerSettings {
            download_timeout: humantime::format_duration(cli.download_timeout).to_string(),
            upload_timeout: humantime::format_duration(cli.upload_timeout).to_string(),
            invalid_messages: cli.invalid_messages,
            ..WorkerSettings::default()
        },
    };

    info!(
        source = %config.source.endpoint,
        destination = %config.destination.endpoint,
        broker = %config.broker.display_uri(),
        queue = %config.broker.queue_name,
        "Configuration loaded, objects will be copied from source to destination on each request"
    );

    let source = Arc::new(S3ObjectStore::new(&config.source));
    let destination = Arc::new(S3ObjectStore::new(&config.destination));
    let mut worker = BackupWorker::new(config, source, destination);

    worker.start().await.context("starting backup worker")?;

    let outcome = tokio::select! {
        result = worker.wait() => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    worker.shutdown().await;

    if let Err(ref e) = outcome {
        error!(error = %e, "Backup worker stopped unexpectedly");
    }
    outcome.context("backup worker failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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
