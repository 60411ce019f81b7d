// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recording ObjectStore for testing.
//!
//! Records every download/upload, tracks how many calls overlap, and can be
//! told to fail or stall.

use backup_replicator::object_store::{BoxFuture, ObjectStore, ObjectStream, StoreError};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// A recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub bucket: String,
    pub key: String,
}

#[derive(Default)]
struct Concurrency {
    current: AtomicUsize,
    max: AtomicUsize,
}

/// Decrements the in-flight count when dropped, even on cancellation.
struct InFlight(Arc<Concurrency>);

impl InFlight {
    fn enter(c: &Arc<Concurrency>) -> Self {
        let now = c.current.fetch_add(1, Ordering::SeqCst) + 1;
        c.max.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(c))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock object store that records all calls.
///
/// # Example
/// ```rust,ignore
/// let store = MockObjectStore::new();
/// store.put_object("b1", "f1", "hello").await;
///
/// // Use as source or destination...
///
/// assert_eq!(store.downloads().await.len(), 1);
/// ```
#[derive(Default)]
pub struct MockObjectStore {
    objects: RwLock<HashMap<(String, String), Bytes>>,
    buckets: RwLock<HashSet<String>>,
    downloads: RwLock<Vec<StoreCall>>,
    uploads: RwLock<Vec<StoreCall>>,
    buckets_created: AtomicUsize,
    concurrency: Arc<Concurrency>,
    delay_ms: AtomicU64,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object (and its bucket) without recording a call.
    pub async fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.buckets.write().await.insert(bucket.to_string());
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Seed an empty bucket.
    pub async fn add_bucket(&self, bucket: &str) {
        self.buckets.write().await.insert(bucket.to_string());
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains(bucket)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn downloads(&self) -> Vec<StoreCall> {
        self.downloads.read().await.clone()
    }

    pub async fn uploads(&self) -> Vec<StoreCall> {
        self.uploads.read().await.clone()
    }

    /// Number of buckets created by uploads.
    pub fn buckets_created(&self) -> usize {
        self.buckets_created.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.concurrency.max.load(Ordering::SeqCst)
    }

    /// Make every call wait this long before doing anything.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

impl ObjectStore for MockObjectStore {
    fn download(&self, bucket: &str, key: &str) -> BoxFuture<'_, ObjectStream> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let _guard = InFlight::enter(&self.concurrency);
            self.downloads.write().await.push(StoreCall {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            self.stall().await;

            if self.fail_downloads.load(Ordering::SeqCst) {
                return Err(StoreError::request("GetObject", "injected failure"));
            }

            let data = self
                .object(&bucket, &key)
                .await
                .ok_or(StoreError::NotFound { bucket, key })?;

            // Two chunks so the buffering path is exercised
            let mid = data.len() / 2;
            let chunks = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
            Ok(stream::iter(chunks).boxed())
        })
    }

    fn upload(&self, bucket: &str, key: &str, data: Bytes) -> BoxFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let _guard = InFlight::enter(&self.concurrency);
            self.uploads.write().await.push(StoreCall {
                bucket: bucket.clone(),
                key: key.clone(),
            });
            self.stall().await;

            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(StoreError::request("PutObject", "injected failure"));
            }

            if self.buckets.write().await.insert(bucket.clone()) {
                self.buckets_created.fetch_add(1, Ordering::SeqCst);
            }
            self.objects.write().await.insert((bucket, key), data);
            Ok(())
        })
    }
}
