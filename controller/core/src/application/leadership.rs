// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Leader Election Runner
//!
//! Runs a unit of work only while this process holds the lease. Standby
//! processes keep retrying acquisition. A leader that cannot renew cancels
//! its work and returns `LeadershipLost`; the process is expected to exit
//! and be restarted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::controller_config::LeaderElectionConfig;
use crate::domain::leader::{LeaderElectionError, LeaderElector, LeadershipResult};

pub struct LeaderElection {
    elector: Arc<dyn LeaderElector>,
    lock_key: String,
    instance_id: String,
    renew_period: Duration,
    retry_period: Duration,
}

impl LeaderElection {
    pub fn new(
        elector: Arc<dyn LeaderElector>,
        lock_key: impl Into<String>,
        instance_id: impl Into<String>,
        renew_period: Duration,
        retry_period: Duration,
    ) -> Self {
        Self {
            elector,
            lock_key: lock_key.into(),
            instance_id: instance_id.into(),
            renew_period,
            retry_period,
        }
    }

    pub fn from_config(
        elector: Arc<dyn LeaderElector>,
        config: &LeaderElectionConfig,
        instance_id: impl Into<String>,
    ) -> Self {
        Self::new(
            elector,
            config.lock_name.clone(),
            instance_id,
            config.renew_period(),
            config.retry_period(),
        )
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wait for the lease, then run `work` with a token that is cancelled
    /// when `shutdown` fires or the lease is lost. Returns without running
    /// `work` if `shutdown` fires first.
    pub async fn run_while_leader<F, Fut>(
        &self,
        shutdown: CancellationToken,
        work: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(lease_token) = self.acquire(&shutdown).await? else {
            return Ok(());
        };
        info!(lock = %self.lock_key, instance = %self.instance_id, "Acquired leadership");

        let leading = shutdown.child_token();
        let work = work(leading.clone());
        tokio::pin!(work);

        let mut renew = tokio::time::interval(self.renew_period);
        renew.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        renew.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renew.tick() => {
                    if !self.renew(&lease_token).await {
                        leading.cancel();
                        if let Err(e) = (&mut work).await {
                            warn!(error = %e, "Work failed while stepping down");
                        }
                        let lost = LeaderElectionError::LeadershipLost(self.lock_key.clone());
                        return Err(lost.into());
                    }
                }
            }
        };

        match self.elector.release(&self.lock_key, &lease_token).await {
            Ok(true) => info!(lock = %self.lock_key, "Released leadership"),
            Ok(false) => debug!(lock = %self.lock_key, "Lease already gone at release"),
            Err(e) => warn!(lock = %self.lock_key, error = %e, "Failed to release leadership"),
        }
        result
    }

    async fn acquire(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<String>, LeaderElectionError> {
        loop {
            match self.elector.try_acquire(&self.lock_key, &self.instance_id).await {
                Ok(LeadershipResult::Acquired { lease_token, .. }) => return Ok(Some(lease_token)),
                Ok(LeadershipResult::NotLeader { current_leader }) => {
                    debug!(lock = %self.lock_key, leader = ?current_leader, "Standing by");
                }
                Err(e) => {
                    warn!(lock = %self.lock_key, error = %e, "Leader election attempt failed")
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.retry_period) => {}
            }
        }
    }

    async fn renew(&self, lease_token: &str) -> bool {
        match self.elector.renew(&self.lock_key, lease_token).await {
            Ok(result) if result.is_renewed() => true,
            Ok(result) => {
                warn!(lock = %self.lock_key, ?result, "Leadership lost");
                false
            }
            Err(e) => {
                warn!(lock = %self.lock_key, error = %e, "Failed to renew leadership");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::leader::InMemoryLeaderElector;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn election(elector: &Arc<InMemoryLeaderElector>, instance: &str) -> LeaderElection {
        LeaderElection::new(
            elector.clone(),
            "vela-controllers",
            instance,
            Duration::from_millis(20),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_runs_work_and_releases() {
        let elector = Arc::new(InMemoryLeaderElector::new(Duration::from_secs(5)));
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        election(&elector, "replica-0")
            .run_while_leader(CancellationToken::new(), |_token| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(elector.current_leader("vela-controllers").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_standby_does_not_run_until_shutdown() {
        let elector = Arc::new(InMemoryLeaderElector::new(Duration::from_secs(5)));
        elector.try_acquire("vela-controllers", "replica-0").await.unwrap();

        let shutdown = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let standby = {
            let election = election(&elector, "replica-1");
            let shutdown = shutdown.clone();
            let flag = ran.clone();
            tokio::spawn(async move {
                election
                    .run_while_leader(shutdown, |_token| async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        standby.await.unwrap().unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_leader_work() {
        let elector = Arc::new(InMemoryLeaderElector::new(Duration::from_secs(5)));
        let shutdown = CancellationToken::new();

        let leader = {
            let election = election(&elector, "replica-0");
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                election
                    .run_while_leader(shutdown, |token| async move {
                        token.cancelled().await;
                        Ok(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            elector.current_leader("vela-controllers").await.unwrap().as_deref(),
            Some("replica-0")
        );
        shutdown.cancel();
        leader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_work() {
        let elector = Arc::new(InMemoryLeaderElector::new(Duration::from_secs(5)));
        let leader = {
            let election = election(&elector, "replica-0");
            let elector = elector.clone();
            tokio::spawn(async move {
                election
                    .run_while_leader(CancellationToken::new(), |token| async move {
                        // Lease stolen out from under us
                        elector.expire("vela-controllers");
                        elector.try_acquire("vela-controllers", "replica-1").await?;
                        token.cancelled().await;
                        Ok(())
                    })
                    .await
            })
        };

        let err = tokio::time::timeout(Duration::from_secs(2), leader)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("was lost"));
    }
}
