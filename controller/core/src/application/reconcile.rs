// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Reconcile Handler Contract
//!
//! Handlers registered on a controller return `Ok(Unchanged)` (no-op),
//! `Ok(Updated(obj))` (one store write happened; `obj` is the persisted
//! state) or `Err`. Only errors requeue the key with backoff.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome<R> {
    Unchanged,
    Updated(R),
}

impl<R> ReconcileOutcome<R> {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }

    pub fn into_updated(self) -> Option<R> {
        match self {
            Self::Updated(obj) => Some(obj),
            Self::Unchanged => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Referenced object missing; retried
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// Stale write; retried after a fresh read
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: &'static str, key: ObjectKey },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Store(StoreError),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => Self::NotFound { kind, key },
            StoreError::Conflict { kind, key, .. } => Self::Conflict { kind, key },
            other => Self::Store(other),
        }
    }
}

/// Invoked for every delivery of a live object.
#[async_trait]
pub trait ChangeHandler<R: Resource>: Send + Sync {
    async fn on_change(
        &self,
        key: &ObjectKey,
        obj: &R,
    ) -> Result<ReconcileOutcome<R>, ReconcileError>;
}

/// Invoked once an object is gone, with its last observed state.
#[async_trait]
pub trait RemoveHandler<R: Resource>: Send + Sync {
    async fn on_remove(&self, key: &ObjectKey, obj: &R) -> Result<(), ReconcileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_one_to_one() {
        let key = ObjectKey::new("default", "llama");
        let conflict: ReconcileError = StoreError::Conflict {
            kind: "ModelTemplate",
            key: key.clone(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(conflict.is_conflict());

        let missing: ReconcileError = StoreError::NotFound {
            kind: "ModelTemplate",
            key,
        }
        .into();
        assert!(matches!(missing, ReconcileError::NotFound { .. }));

        let backend: ReconcileError = StoreError::Backend("down".to_string()).into();
        assert_eq!(backend.to_string(), "Store backend error: down");
    }

    #[test]
    fn test_outcome_accessors() {
        assert!(ReconcileOutcome::Updated(1).is_updated());
        assert_eq!(ReconcileOutcome::<i32>::Unchanged.into_updated(), None);
    }
}
