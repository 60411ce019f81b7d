// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Object store integration traits.
//!
//! Defines the interface the replicator needs from a bucket/key addressed
//! blob store. Production uses [`S3ObjectStore`](crate::s3::S3ObjectStore);
//! tests and local runs can use [`MemoryObjectStore`].
//!
//! # Example
//!
//! ```rust,no_run
//! use backup_replicator::object_store::{BoxFuture, ObjectStore, ObjectStream};
//! use bytes::Bytes;
//! use futures::stream::{self, StreamExt};
//!
//! struct MyBackend { /* ... */ }
//!
//! impl ObjectStore for MyBackend {
//!     fn download(&self, _bucket: &str, _key: &str) -> BoxFuture<'_, ObjectStream> {
//!         Box::pin(async move {
//!             Ok(stream::once(async { Ok(Bytes::from_static(b"hello")) }).boxed())
//!         })
//!     }
//!
//!     fn upload(&self, _bucket: &str, _key: &str, _data: Bytes) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;

/// Result type for object store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Body of a downloaded object, delivered in chunks.
pub type ObjectStream = BoxStream<'static, StoreResult<Bytes>>;

/// Chunk size used by [`MemoryObjectStore`] downloads.
const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

/// Store-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The bucket or the object does not exist.
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    /// The store answered with something other than success, or the request
    /// never reached it.
    #[error("{operation} failed: {message}")]
    Request { operation: String, message: String },

    /// The body stream broke after the download started.
    #[error("object stream interrupted: {0}")]
    Stream(String),
}

impl StoreError {
    /// Create a request error.
    pub fn request(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Trait defining what we need from an object store.
///
/// Implementations bind credentials and endpoint at construction, so a single
/// instance is reused across envelopes without locking.
pub trait ObjectStore: Send + Sync + 'static {
    /// Open the object at `(bucket, key)` as a byte stream.
    ///
    /// Fails with [`StoreError::NotFound`] when the bucket or key is absent.
    fn download(&self, bucket: &str, key: &str) -> BoxFuture<'_, ObjectStream>;

    /// Write `data` at `(bucket, key)`, creating the bucket first if needed.
    ///
    /// Bucket creation is idempotent: an already-existing bucket never fails
    /// the upload. Overwrites any existing object.
    fn upload(&self, bucket: &str, key: &str, data: Bytes) -> BoxFuture<'_, ()>;
}

/// In-memory object store.
///
/// Keeps buckets in a map guarded by an async lock. Downloads are served in
/// fixed-size chunks so callers exercise the same buffering path as with a
/// real store.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object directly, creating the bucket if needed.
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    /// Create an empty bucket.
    pub async fn create_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
    }

    /// Read an object back.
    pub async fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    /// Check whether a bucket exists.
    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }

    /// Total number of objects across all buckets.
    pub async fn object_count(&self) -> usize {
        self.buckets.read().await.values().map(HashMap::len).sum()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn download(&self, bucket: &str, key: &str) -> BoxFuture<'_, ObjectStream> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let data = self
                .get(&bucket, &key)
                .await
                .ok_or(StoreError::NotFound { bucket, key })?;

            let chunks: Vec<StoreResult<Bytes>> = data
                .chunks(MEMORY_CHUNK_SIZE)
                .map(|chunk| Ok(data.slice_ref(chunk)))
                .collect();
            Ok(stream::iter(chunks).boxed())
        })
    }

    fn upload(&self, bucket: &str, key: &str, data: Bytes) -> BoxFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            tracing::trace!(bucket = %bucket, key = %key, len = data.len(), "Memory store: put object");
            self.insert(&bucket, &key, data).await;
            Ok(())
        })
    }
}
