// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Resource Store Interfaces
//!
//! Persistence contract for the watch-based resource store, following the
//! repository pattern: interface in the domain layer, implementations in
//! `crate::infrastructure::store`.
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|-----------------|
//! | `ResourceStore<R>` | typed reads, writes and watch | `InMemoryResourceStore` |
//! | `Enqueue` | force redelivery of an object key | `WorkQueue` |
//!
//! The store offers per-object optimistic concurrency only: every write is
//! fenced on `metadata.resource_version` and fails with
//! [`StoreError::Conflict`] when the object changed since it was read. There
//! are no multi-object transactions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::domain::meta::{ObjectKey, Resource};

/// Change notification emitted by a store on every successful write.
#[derive(Debug, Clone)]
pub enum WatchEvent<R> {
    /// Object created or updated; carries the new state
    Applied(R),
    /// Object removed; carries the last state with `deletion_timestamp` set
    Deleted(R),
}

impl<R: Resource> WatchEvent<R> {
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Applied(obj) | Self::Deleted(obj) => obj.key(),
        }
    }
}

/// Equality-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Typed store client for one resource kind.
#[async_trait]
pub trait ResourceStore<R: Resource>: Send + Sync {
    /// Fetch one object. `Ok(None)` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<R>, StoreError>;

    /// List objects, across all namespaces when `namespace` is `None`.
    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<R>, StoreError>;

    /// Create an object. The store assigns uid, resource version and
    /// generation, and the creation timestamp if unset.
    async fn create(&self, obj: &R) -> Result<R, StoreError>;

    /// Replace metadata and spec. The persisted status is preserved.
    async fn update(&self, obj: &R) -> Result<R, StoreError>;

    /// Replace the status only.
    async fn update_status(&self, obj: &R) -> Result<R, StoreError>;

    /// Remove an object. Missing objects yield `StoreError::NotFound`.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Subscribe to change events emitted after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}

/// Forces redelivery of an object to its controller.
pub trait Enqueue: Send + Sync {
    fn enqueue(&self, key: ObjectKey);
}

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error(
        "{kind} {key} was modified concurrently \
         (expected resource version {expected}, found {actual})"
    )]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
