// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deduplicating, rate-limited work queue of object keys.
//!
//! - A key is queued at most once; adding a queued key is a no-op.
//! - A key handed out by [`WorkQueue::get`] is not handed out again until
//!   [`WorkQueue::done`]. Keys added while processing are queued again by
//!   `done`, so delivery per key is serialized and at-least-once.
//! - Failed keys come back through [`WorkQueue::add_rate_limited`] after an
//!   exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::controller_config::RetryConfig;
use crate::domain::meta::ObjectKey;
use crate::domain::store::Enqueue;

/// Per-key exponential backoff: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting to be processed, queued or not
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    /// Backoff timers not yet fired
    pending_retries: usize,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    retry: RetryPolicy,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            // Requeued by done()
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key. `None` once the queue is shut down or
    /// `shutdown` is cancelled.
    pub async fn get(&self, shutdown: &CancellationToken) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    /// Mark `key` as processed.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-add `key` after its backoff delay.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let delay = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            let delay = self.retry.delay(*failures);
            state.pending_retries += 1;
            delay
        };

        debug!(queue = %self.name, key = %key, ?delay, "Requeueing after backoff");
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.state.lock().pending_retries -= 1;
            queue.add(key);
        });
    }

    /// Reset the backoff of `key` after a successful attempt.
    pub fn forget(&self, key: &ObjectKey) {
        self.state.lock().failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued, in flight or waiting on a backoff timer.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.processing.is_empty() && state.pending_retries == 0
    }

    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

impl Enqueue for WorkQueue {
    fn enqueue(&self, key: ObjectKey) {
        self.add(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            "test",
            RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(40)),
        ))
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(40));
        assert_eq!(policy.delay(1), Duration::from_millis(5));
        assert_eq!(policy.delay(2), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(20));
        assert_eq!(policy.delay(10), Duration::from_millis(40));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let queue = queue();
        let token = CancellationToken::new();
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get(&token).await, Some(key("a")));
        assert_eq!(queue.get(&token).await, Some(key("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = queue();
        let token = CancellationToken::new();
        queue.add(key("a"));
        let first = queue.get(&token).await.unwrap();

        queue.add(key("a"));
        assert!(queue.is_empty());
        assert!(!queue.is_idle());

        queue.done(&first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(&token).await, Some(key("a")));
        queue.done(&key("a"));
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_rate_limited_requeue() {
        let queue = queue();
        let token = CancellationToken::new();
        queue.add_rate_limited(key("a"));
        assert_eq!(queue.failures(&key("a")), 1);
        assert!(!queue.is_idle());

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get(&token))
            .await
            .unwrap();
        assert_eq!(got, Some(key("a")));

        queue.forget(&key("a"));
        assert_eq!(queue.failures(&key("a")), 0);
    }

    #[tokio::test]
    async fn test_get_returns_none_on_cancel_and_shutdown() {
        let queue = queue();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(queue.get(&token).await, None);

        let live = CancellationToken::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            let live = live.clone();
            tokio::spawn(async move { queue.get(&live).await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("a"));
        assert!(queue.is_empty());
    }
}
