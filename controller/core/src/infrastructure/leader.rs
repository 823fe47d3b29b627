// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory leader elector.
//!
//! Leases live in a process-local table, so this only coordinates tasks of
//! one process. Used by `vela run` for single-replica deployments and by tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::leader::{LeaderElectionError, LeaderElector, LeadershipResult, RenewalResult};

#[derive(Debug, Clone)]
struct Lease {
    instance_id: String,
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryLeaderElector {
    leases: RwLock<HashMap<String, Lease>>,
    lease_duration: Duration,
}

impl Default for InMemoryLeaderElector {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl InMemoryLeaderElector {
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            lease_duration,
        }
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_duration)
            .unwrap_or(chrono::Duration::seconds(15))
    }

    /// Expire the lease of `lock_key` immediately, as if its holder stalled.
    pub fn expire(&self, lock_key: &str) {
        if let Some(lease) = self.leases.write().get_mut(lock_key) {
            lease.expires_at = Utc::now();
        }
    }
}

#[async_trait]
impl LeaderElector for InMemoryLeaderElector {
    async fn try_acquire(
        &self,
        lock_key: &str,
        instance_id: &str,
    ) -> Result<LeadershipResult, LeaderElectionError> {
        let mut leases = self.leases.write();
        let now = Utc::now();

        if let Some(lease) = leases.get(lock_key) {
            if lease.expires_at > now && lease.instance_id != instance_id {
                return Ok(LeadershipResult::NotLeader {
                    current_leader: Some(lease.instance_id.clone()),
                });
            }
        }

        // Free, expired, or already ours: take a fresh lease
        let lease = Lease {
            instance_id: instance_id.to_string(),
            token: Uuid::new_v4().to_string(),
            expires_at: self.expiry(now),
        };
        let lease_token = lease.token.clone();
        leases.insert(lock_key.to_string(), lease);

        Ok(LeadershipResult::Acquired {
            lease_token,
            lease_duration: self.lease_duration,
        })
    }

    async fn renew(
        &self,
        lock_key: &str,
        lease_token: &str,
    ) -> Result<RenewalResult, LeaderElectionError> {
        let mut leases = self.leases.write();
        let now = Utc::now();

        let Some(lease) = leases.get_mut(lock_key) else {
            return Ok(RenewalResult::Lost);
        };
        if lease.token != lease_token {
            return Ok(RenewalResult::InvalidToken);
        }
        if lease.expires_at <= now {
            return Ok(RenewalResult::Lost);
        }

        lease.expires_at = self.expiry(now);
        Ok(RenewalResult::Renewed {
            lease_duration: self.lease_duration,
        })
    }

    async fn release(
        &self,
        lock_key: &str,
        lease_token: &str,
    ) -> Result<bool, LeaderElectionError> {
        let mut leases = self.leases.write();
        match leases.get(lock_key) {
            Some(lease) if lease.token == lease_token => {
                leases.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_leader(&self, lock_key: &str) -> Result<Option<String>, LeaderElectionError> {
        let leases = self.leases.read();
        let now = Utc::now();
        Ok(leases
            .get(lock_key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.instance_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = "vela-controllers";

    #[tokio::test]
    async fn test_single_leader() {
        let elector = InMemoryLeaderElector::new(Duration::from_secs(30));

        let first = elector.try_acquire(LOCK, "replica-0").await.unwrap();
        assert!(first.is_leader());

        let second = elector.try_acquire(LOCK, "replica-1").await.unwrap();
        assert_eq!(
            second,
            LeadershipResult::NotLeader {
                current_leader: Some("replica-0".to_string())
            }
        );
        assert_eq!(elector.current_leader(LOCK).await.unwrap().as_deref(), Some("replica-0"));
    }

    #[tokio::test]
    async fn test_renew_and_release_require_token() {
        let elector = InMemoryLeaderElector::new(Duration::from_secs(30));
        let acquired = elector.try_acquire(LOCK, "replica-0").await.unwrap();
        let token = acquired.lease_token().unwrap().to_string();

        assert!(elector.renew(LOCK, &token).await.unwrap().is_renewed());
        assert_eq!(elector.renew(LOCK, "bogus").await.unwrap(), RenewalResult::InvalidToken);

        assert!(!elector.release(LOCK, "bogus").await.unwrap());
        assert!(elector.release(LOCK, &token).await.unwrap());
        assert_eq!(elector.renew(LOCK, &token).await.unwrap(), RenewalResult::Lost);
        assert_eq!(elector.current_leader(LOCK).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let elector = InMemoryLeaderElector::new(Duration::from_secs(30));
        let old = elector.try_acquire(LOCK, "replica-0").await.unwrap();
        let old_token = old.lease_token().unwrap().to_string();

        elector.expire(LOCK);
        assert_eq!(elector.current_leader(LOCK).await.unwrap(), None);
        assert_eq!(elector.renew(LOCK, &old_token).await.unwrap(), RenewalResult::Lost);

        assert!(elector.try_acquire(LOCK, "replica-1").await.unwrap().is_leader());
        assert_eq!(elector.renew(LOCK, &old_token).await.unwrap(), RenewalResult::InvalidToken);
    }
}
