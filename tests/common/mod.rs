// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for consumer and integration tests.
//!
//! This module provides:
//! - RabbitMQ and MinIO testcontainer setup
//! - A recording object store with latency and failure injection
//! - An in-memory delivery queue with settlement tracking

#![allow(dead_code)] // Each test binary uses a different subset

pub mod containers;
pub mod mock_queue;
pub mod mock_store;

pub use containers::*;
pub use mock_queue::*;
pub use mock_store::*;
