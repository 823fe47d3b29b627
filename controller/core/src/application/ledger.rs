// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Version Ledger
//!
//! Highest assigned version number per template key. The map sits behind a
//! single mutex that is never held across an `.await`.
//!
//! Each entry remembers the uid of the template incarnation it counts for.
//! A template deleted and recreated under the same name gets a fresh count
//! from its first assignment, whichever of that assignment and the old
//! incarnation's cleanup runs first. Entries rebuilt from versions of more
//! than one incarnation have no owner and keep counting from their maximum.
//!
//! Assignment for one key is serialized by that key's async lock from
//! [`VersionLedger::lock_assignment`]: the holder reads the ledger, persists
//! the next number and increments while holding it, so no two workers read
//! the same value for the same template. Different keys do not contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use crate::domain::meta::ObjectKey;
use crate::domain::version::ModelTemplateVersion;

type AssignmentLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LedgerEntry {
    /// Template incarnation the count belongs to, `None` when unknown
    owner: Option<Uuid>,
    latest: u32,
}

impl LedgerEntry {
    fn counts_for(&self, owner: Option<Uuid>) -> bool {
        self.owner.is_none() || owner.is_none() || self.owner == owner
    }
}

#[derive(Debug, Default)]
pub struct VersionLedger {
    entries: Mutex<HashMap<ObjectKey, LedgerEntry>>,
    assignment_locks: Mutex<HashMap<ObjectKey, AssignmentLock>>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest assigned number for `key`, 0 if absent.
    pub fn get(&self, key: &ObjectKey) -> u32 {
        self.get_for(key, None)
    }

    /// Highest number assigned under the template incarnation `owner`.
    /// 0 if absent or if the entry counts for another incarnation.
    pub fn get_for(&self, key: &ObjectKey, owner: Option<Uuid>) -> u32 {
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.counts_for(owner))
            .map_or(0, |entry| entry.latest)
    }

    /// Advance `key` by one and return the new value.
    pub fn increment(&self, key: &ObjectKey) -> u32 {
        self.increment_for(key, None)
    }

    /// Advance `key` by one on behalf of `owner` and return the new value.
    /// An entry left by another incarnation is replaced and starts from 0.
    pub fn increment_for(&self, key: &ObjectKey, owner: Option<Uuid>) -> u32 {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert(LedgerEntry { owner, latest: 0 });
        if !entry.counts_for(owner) {
            debug!(template = %key, "Replacing ledger entry of an earlier template");
            *entry = LedgerEntry { owner, latest: 0 };
        }
        if owner.is_some() {
            entry.owner = owner;
        }
        entry.latest += 1;
        entry.latest
    }

    /// Remove the entry of `key`. Returns whether one existed.
    pub fn delete(&self, key: &ObjectKey) -> bool {
        self.delete_for(key, None)
    }

    /// Remove the entry of `key` if it counts for `owner`. An entry that a
    /// newer incarnation already took over is kept. Returns whether one was
    /// removed.
    pub fn delete_for(&self, key: &ObjectKey, owner: Option<Uuid>) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let matches = entries.get(key).is_some_and(|entry| entry.counts_for(owner));
            matches && entries.remove(key).is_some()
        };

        let mut locks = self.assignment_locks.lock();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
        removed
    }

    /// Fold persisted versions into the ledger: every `Assigned=true` version
    /// raises its key to at least its number. Returns the number of keys.
    pub fn rebuild(&self, versions: &[ModelTemplateVersion]) -> usize {
        let mut entries = self.entries.lock();
        for version in versions {
            let Some(number) = version.assigned_version() else {
                continue;
            };
            let owner = version.owner_uid();
            let entry = entries
                .entry(version.template_key())
                .or_insert(LedgerEntry { owner, latest: 0 });
            if entry.owner != owner {
                entry.owner = None;
            }
            entry.latest = entry.latest.max(number);
        }
        debug!(entries = entries.len(), "Version ledger rebuilt");
        entries.len()
    }

    /// Acquire the assignment lock of `key`.
    pub async fn lock_assignment(&self, key: &ObjectKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.assignment_locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{ConditionType, Conditioned};
    use crate::domain::meta::{OwnerReference, Resource, ML_API_VERSION};
    use crate::domain::template::ModelTemplate;
    use std::time::Duration;

    fn assigned(name: &str, template: &str, number: u32) -> ModelTemplateVersion {
        let mut version = ModelTemplateVersion::new("default", name, template);
        version.status.version = number;
        version.set_condition(ConditionType::Assigned, true, "", "");
        version
    }

    #[test]
    fn test_get_increment_delete() {
        let ledger = VersionLedger::new();
        let key = ObjectKey::new("default", "llama");
        assert_eq!(ledger.get(&key), 0);

        assert_eq!(ledger.increment(&key), 1);
        assert_eq!(ledger.increment(&key), 2);
        assert_eq!(ledger.get(&key), 2);

        assert!(ledger.delete(&key));
        assert!(!ledger.delete(&key));
        assert_eq!(ledger.get(&key), 0);
    }

    #[test]
    fn test_entry_of_another_template_uid_restarts_numbering() {
        let ledger = VersionLedger::new();
        let key = ObjectKey::new("default", "llama");
        let (deleted, recreated) = (Uuid::new_v4(), Uuid::new_v4());

        ledger.increment_for(&key, Some(deleted));
        ledger.increment_for(&key, Some(deleted));
        assert_eq!(ledger.get_for(&key, Some(recreated)), 0);
        assert_eq!(ledger.increment_for(&key, Some(recreated)), 1);

        // The late cleanup of the deleted template leaves the entry alone
        assert!(!ledger.delete_for(&key, Some(deleted)));
        assert_eq!(ledger.get_for(&key, Some(recreated)), 1);
        assert!(ledger.delete_for(&key, Some(recreated)));
    }

    #[test]
    fn test_entry_without_uid_counts_for_any_template() {
        let ledger = VersionLedger::new();
        let key = ObjectKey::new("default", "llama");
        let uid = Uuid::new_v4();

        ledger.increment(&key);
        ledger.increment(&key);
        assert_eq!(ledger.get_for(&key, Some(uid)), 2);
        assert_eq!(ledger.increment_for(&key, Some(uid)), 3);

        // Claimed by the first uid that advanced it
        assert_eq!(ledger.get_for(&key, Some(Uuid::new_v4())), 0);
        assert_eq!(ledger.get(&key), 3);
    }

    #[test]
    fn test_rebuild_records_owner_uid() {
        let ledger = VersionLedger::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let owned = |name: &str, template: &str, number: u32, uid: Uuid| {
            let mut version = assigned(name, template, number);
            version.metadata.owner_references.push(OwnerReference {
                api_version: ML_API_VERSION.to_string(),
                kind: ModelTemplate::KIND.to_string(),
                name: template.to_string(),
                uid,
            });
            version
        };

        ledger.rebuild(&[
            owned("v1", "llama", 1, first),
            owned("v2", "llama", 2, first),
            owned("m1", "mistral", 1, first),
            owned("m2", "mistral", 4, second),
        ]);

        let llama = ObjectKey::new("default", "llama");
        assert_eq!(ledger.get_for(&llama, Some(first)), 2);
        assert_eq!(ledger.get_for(&llama, Some(second)), 0);

        // Versions of two incarnations: the entry counts for either
        let mistral = ObjectKey::new("default", "mistral");
        assert_eq!(ledger.get_for(&mistral, Some(first)), 4);
        assert_eq!(ledger.get_for(&mistral, Some(second)), 4);
    }

    #[test]
    fn test_rebuild_takes_max_of_assigned_versions() {
        let ledger = VersionLedger::new();
        let mut unassigned = ModelTemplateVersion::new("default", "v9", "llama");
        unassigned.status.version = 9;

        let entries = ledger.rebuild(&[
            assigned("v1", "llama", 1),
            assigned("v3", "llama", 3),
            assigned("v2", "llama", 2),
            assigned("m1", "mistral", 1),
            unassigned,
        ]);

        assert_eq!(entries, 2);
        assert_eq!(ledger.get(&ObjectKey::new("default", "llama")), 3);
        assert_eq!(ledger.get(&ObjectKey::new("default", "mistral")), 1);
    }

    #[test]
    fn test_rebuild_never_lowers_an_entry() {
        let ledger = VersionLedger::new();
        let key = ObjectKey::new("default", "llama");
        for _ in 0..5 {
            ledger.increment(&key);
        }
        ledger.rebuild(&[assigned("v2", "llama", 2)]);
        assert_eq!(ledger.get(&key), 5);
    }

    #[tokio::test]
    async fn test_assignment_lock_is_per_key() {
        let ledger = Arc::new(VersionLedger::new());
        let llama = ObjectKey::new("default", "llama");
        let mistral = ObjectKey::new("default", "mistral");

        let held = ledger.lock_assignment(&llama).await;

        // Another key is not blocked
        tokio::time::timeout(Duration::from_millis(100), ledger.lock_assignment(&mistral))
            .await
            .unwrap();

        let contender = {
            let ledger = Arc::clone(&ledger);
            let llama = llama.clone();
            tokio::spawn(async move {
                let _guard = ledger.lock_assignment(&llama).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_keeps_lock_while_held() {
        let ledger = VersionLedger::new();
        let key = ObjectKey::new("default", "llama");
        let guard = ledger.lock_assignment(&key).await;
        ledger.increment(&key);

        assert!(ledger.delete(&key));
        assert_eq!(ledger.assignment_locks.lock().len(), 1);

        drop(guard);
        ledger.delete(&key);
        assert!(ledger.assignment_locks.lock().is_empty());
    }
}
