// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! S3-compatible object store client.
//!
//! Wraps `aws-sdk-s3` with path-style addressing so it works against MinIO
//! as well as AWS. Each instance is bound to one endpoint and one set of
//! credentials; the source and destination stores are separate instances.

use crate::config::StoreConfig;
use crate::object_store::{BoxFuture, ObjectStore, ObjectStream, StoreError, StoreResult};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

const NO_SUCH_KEY: &str = "NoSuchKey";
const NO_SUCH_BUCKET: &str = "NoSuchBucket";

/// [`ObjectStore`] backed by an S3-compatible service.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    endpoint: String,
}

impl S3ObjectStore {
    /// Build a client bound to the given endpoint and credentials.
    pub fn new(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "backup-replicator",
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            endpoint: config.endpoint.clone(),
        }
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Create `bucket` unless it already exists.
    ///
    /// A concurrent creation by another writer is treated as success.
    pub async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err)
                if is_not_found(&err)
                    || err.as_service_error().is_some_and(|e| e.is_not_found()) => {}
            Err(err) => {
                return Err(StoreError::request(
                    "HeadBucket",
                    DisplayErrorContext(&err).to_string(),
                ))
            }
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(endpoint = %self.endpoint, bucket = %bucket, "Created bucket");
                Ok(())
            }
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) =>
            {
                debug!(bucket = %bucket, "Bucket created concurrently");
                Ok(())
            }
            Err(err) => Err(StoreError::request(
                "CreateBucket",
                DisplayErrorContext(&err).to_string(),
            )),
        }
    }

    async fn get(&self, bucket: String, key: String) -> StoreResult<ObjectStream> {
        let output = match self.client.get_object().bucket(&bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) => {
                let missing = is_not_found(&err)
                    || err.as_service_error().is_some_and(|e| {
                        e.is_no_such_key() || matches!(e.code(), Some(NO_SUCH_KEY | NO_SUCH_BUCKET))
                    });
                if missing {
                    return Err(StoreError::NotFound { bucket, key });
                }
                return Err(StoreError::request(
                    "GetObject",
                    DisplayErrorContext(&err).to_string(),
                ));
            }
        };

        Ok(body_stream(output.body))
    }

    async fn put(&self, bucket: String, key: String, data: Bytes) -> StoreResult<()> {
        self.ensure_bucket(&bucket).await?;

        let len = data.len();
        self.client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .content_length(len as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StoreError::request("PutObject", DisplayErrorContext(&err).to_string()))?;

        debug!(endpoint = %self.endpoint, bucket = %bucket, key = %key, bytes = len, "Put object");
        Ok(())
    }
}

impl ObjectStore for S3ObjectStore {
    fn download(&self, bucket: &str, key: &str) -> BoxFuture<'_, ObjectStream> {
        Box::pin(self.get(bucket.to_string(), key.to_string()))
    }

    fn upload(&self, bucket: &str, key: &str, data: Bytes) -> BoxFuture<'_, ()> {
        Box::pin(self.put(bucket.to_string(), key.to_string(), data))
    }
}

/// Turn the SDK body into a chunk stream.
fn body_stream(body: ByteStream) -> ObjectStream {
    stream::try_unfold(body, |mut body| async move {
        match body.try_next().await {
            Ok(Some(chunk)) => Ok(Some((chunk, body))),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Stream(e.to_string())),
        }
    })
    .boxed()
}

/// HTTP 404 without a modeled error body (HEAD responses carry none).
fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().is_some_and(|r| r.status().as_u16() == 404)
}
