// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for RabbitMQ and MinIO.
//!
//! Provides helpers to spin up a broker and a pair of object stores for
//! end-to-end tests.

use backup_replicator::config::{BackupConfig, BrokerConfig, StoreConfig, WorkerSettings};
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage, RunnableImage};

pub const MINIO_USER: &str = "minioadmin";
pub const MINIO_PASSWORD: &str = "minioadmin";

/// Create a RabbitMQ container with the default guest account.
///
/// Waits for "Server startup complete".
pub fn rabbitmq_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("rabbitmq", "3-alpine")
        .with_exposed_port(5672)
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"));
    docker.run(image)
}

/// Create a MinIO server container.
///
/// Waits for the "API:" banner line.
pub fn minio_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("minio/minio", "latest")
        .with_env_var("MINIO_ROOT_USER", MINIO_USER)
        .with_env_var("MINIO_ROOT_PASSWORD", MINIO_PASSWORD)
        .with_exposed_port(9000)
        .with_wait_for(WaitFor::message_on_stdout("API:"));
    let args = vec!["server".to_string(), "/data".to_string()];
    docker.run(RunnableImage::from((image, args)))
}

/// Broker settings for a running RabbitMQ container.
pub fn broker_config(container: &Container<'_, GenericImage>, queue_name: &str) -> BrokerConfig {
    BrokerConfig {
        port: container.get_host_port_ipv4(5672),
        queue_name: queue_name.to_string(),
        ..BrokerConfig::for_testing("127.0.0.1")
    }
}

/// Store settings for a running MinIO container.
pub fn store_config(container: &Container<'_, GenericImage>) -> StoreConfig {
    StoreConfig::from_host_port(
        "127.0.0.1",
        container.get_host_port_ipv4(9000),
        MINIO_USER,
        MINIO_PASSWORD,
    )
}

/// A broker plus source and destination stores, torn down on drop.
pub struct TestEnvironment<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    rabbitmq: Container<'a, GenericImage>,
    #[allow(dead_code)]
    source: Container<'a, GenericImage>,
    #[allow(dead_code)]
    destination: Container<'a, GenericImage>,
    pub config: BackupConfig,
}

impl<'a> TestEnvironment<'a> {
    pub fn new(docker: &'a Cli, queue_name: &str) -> Self {
        let rabbitmq = rabbitmq_container(docker);
        let source = minio_container(docker);
        let destination = minio_container(docker);

        let config = BackupConfig {
            source: store_config(&source),
            destination: store_config(&destination),
            broker: broker_config(&rabbitmq, queue_name),
            settings: WorkerSettings {
                download_timeout: "30s".to_string(),
                upload_timeout: "30s".to_string(),
                ..WorkerSettings::default()
            },
        };

        Self {
            rabbitmq,
            source,
            destination,
            config,
        }
    }
}
