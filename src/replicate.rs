// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-object copy between two stores.
//!
//! The copy is download-then-upload: the whole object is buffered in memory
//! before the destination sees a single byte. That keeps the destination free
//! of partial objects when the source fails mid-stream, at the cost of memory
//! proportional to the object size.
//!
//! Both halves run under their own bounded wait. Expiry surfaces as
//! [`ReplicationError::Timeout`], distinct from a store error.

use crate::error::{ReplicationError, Result, TransferStage};
use crate::event::ReplicationRequest;
use crate::metrics;
use crate::object_store::{ObjectStore, StoreError};
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Summary of a completed copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub bytes: usize,
    pub elapsed: Duration,
}

/// Copies objects from `source` to `destination` under the same bucket/key.
pub struct Replicator<S: ObjectStore, D: ObjectStore> {
    source: Arc<S>,
    destination: Arc<D>,
    download_timeout: Duration,
    upload_timeout: Duration,
}

impl<S: ObjectStore, D: ObjectStore> Replicator<S, D> {
    pub fn new(
        source: Arc<S>,
        destination: Arc<D>,
        download_timeout: Duration,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            download_timeout,
            upload_timeout,
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<D> {
        &self.destination
    }

    /// Copy one object.
    ///
    /// # Errors
    ///
    /// - [`ReplicationError::Download`] if the source object is missing or the
    ///   read fails. The destination is not touched.
    /// - [`ReplicationError::Upload`] if the destination rejects the write.
    /// - [`ReplicationError::Timeout`] if either half exceeds its bound.
    ///
    /// No retry is attempted.
    pub async fn replicate(&self, request: &ReplicationRequest) -> Result<CopyStats> {
        let start = Instant::now();
        let bucket = request.bucket.as_str();
        let key = request.object_key.as_str();

        let data = self
            .bounded(TransferStage::Download, self.download_timeout, request, self.fetch(bucket, key))
            .await?;
        let bytes = data.len();
        debug!(bucket = %bucket, key = %key, bytes, "Downloaded object");

        self.bounded(
            TransferStage::Upload,
            self.upload_timeout,
            request,
            self.destination.upload(bucket, key, data),
        )
        .await?;

        let elapsed = start.elapsed();
        metrics::record_copy(bytes, elapsed);
        info!(
            bucket = %bucket,
            key = %key,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Object replicated"
        );

        Ok(CopyStats { bytes, elapsed })
    }

    /// Open the source object and buffer it fully.
    async fn fetch(&self, bucket: &str, key: &str) -> std::result::Result<Bytes, StoreError> {
        let stream = self.source.download(bucket, key).await?;
        let buffer = stream
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(buffer.freeze())
    }

    /// Run one half of the copy under its timeout, attaching object context
    /// to whatever goes wrong.
    async fn bounded<T>(
        &self,
        stage: TransferStage,
        limit: Duration,
        request: &ReplicationRequest,
        op: impl std::future::Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(limit, op).await;
        metrics::record_store_latency(&stage.to_string(), started.elapsed());

        let bucket = request.bucket.clone();
        let key = request.object_key.clone();
        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(source)) => match stage {
                TransferStage::Download => ReplicationError::Download { bucket, key, source },
                TransferStage::Upload => ReplicationError::Upload { bucket, key, source },
            },
            Err(_) => ReplicationError::Timeout {
                stage,
                bucket,
                key,
                after: limit,
            },
        };

        warn!(
            bucket = %request.bucket,
            key = %request.object_key,
            stage = %stage,
            error = %err,
            "Copy failed"
        );
        metrics::record_copy_failure(&stage.to_string(), err.kind());
        Err(err)
    }
}
