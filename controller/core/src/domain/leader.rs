// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Leader Election Contract
//!
//! Guarantees a single active writer process. Standby replicas keep trying
//! to acquire the lease and run no reconcilers until they hold it. Leaders
//! hold time-bounded leases and must renew them before expiry.

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipResult {
    Acquired {
        /// Token required for renewal and release
        lease_token: String,
        lease_duration: Duration,
    },
    NotLeader {
        current_leader: Option<String>,
    },
}

impl LeadershipResult {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    pub fn lease_token(&self) -> Option<&str> {
        match self {
            Self::Acquired { lease_token, .. } => Some(lease_token),
            Self::NotLeader { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalResult {
    Renewed { lease_duration: Duration },
    /// Lease expired or was taken by another instance
    Lost,
    InvalidToken,
}

impl RenewalResult {
    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}

#[async_trait]
pub trait LeaderElector: Send + Sync {
    async fn try_acquire(
        &self,
        lock_key: &str,
        instance_id: &str,
    ) -> Result<LeadershipResult, LeaderElectionError>;

    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
    ) -> Result<RenewalResult, LeaderElectionError>;

    /// Returns `false` if the lease had already expired or belongs to someone else.
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool, LeaderElectionError>;

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, LeaderElectionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LeaderElectionError {
    #[error("Leader election backend error: {0}")]
    Backend(String),

    #[error("Leadership of '{0}' was lost")]
    LeadershipLost(String),
}
