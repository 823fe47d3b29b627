// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory resource store.
//!
//! Single-process only. State is lost when the process exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::store::{LabelSelector, ResourceStore, StoreError, WatchEvent};

const DEFAULT_WATCH_CAPACITY: usize = 1024;

struct Objects<R> {
    by_key: HashMap<ObjectKey, R>,
    /// Last resource version handed out; shared across all objects of the kind
    resource_version: u64,
}

impl<R> Objects<R> {
    fn next_resource_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }
}

pub struct InMemoryResourceStore<R: Resource> {
    objects: RwLock<Objects<R>>,
    events: broadcast::Sender<WatchEvent<R>>,
    writes: AtomicU64,
}

impl<R: Resource> InMemoryResourceStore<R> {
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Watchers further behind than `capacity` events observe a lag and must relist.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            objects: RwLock::new(Objects {
                by_key: HashMap::new(),
                resource_version: 0,
            }),
            events,
            writes: AtomicU64::new(0),
        }
    }

    /// Successful create/update/update_status/delete calls so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fence(current: &R, incoming: &R) -> Result<(), StoreError> {
        let expected = incoming.meta().resource_version;
        let actual = current.meta().resource_version;
        if expected != actual {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                key: incoming.key(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn not_found(key: ObjectKey) -> StoreError {
        StoreError::NotFound { kind: R::KIND, key }
    }

    fn emit(&self, event: WatchEvent<R>) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // No watchers is fine
        let _ = self.events.send(event);
    }
}

impl<R: Resource> Default for InMemoryResourceStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for InMemoryResourceStore<R> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<R>, StoreError> {
        let objects = self.objects.read();
        Ok(objects.by_key.get(&ObjectKey::new(namespace, name)).cloned())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<R>, StoreError> {
        let objects = self.objects.read();
        let mut matched: Vec<R> = objects
            .by_key
            .values()
            .filter(|obj| namespace.is_none_or(|ns| obj.meta().namespace == ns))
            .filter(|obj| selector.matches(&obj.meta().labels))
            .cloned()
            .collect();
        matched.sort_by_key(|obj| obj.key());
        Ok(matched)
    }

    async fn create(&self, obj: &R) -> Result<R, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write();
        if objects.by_key.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: R::KIND, key });
        }

        let mut created = obj.clone();
        let resource_version = objects.next_resource_version();
        let meta = created.meta_mut();
        meta.uid = Some(Uuid::new_v4());
        meta.resource_version = resource_version;
        meta.generation = 1;
        meta.deletion_timestamp = None;
        meta.creation_timestamp.get_or_insert_with(Utc::now);

        objects.by_key.insert(key, created.clone());
        self.emit(WatchEvent::Applied(created.clone()));
        Ok(created)
    }

    async fn update(&self, obj: &R) -> Result<R, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write();
        let current = objects
            .by_key
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(key.clone()))?;
        Self::fence(&current, obj)?;

        let mut updated = obj.clone();
        *updated.status_mut() = current.status().clone();
        let resource_version = objects.next_resource_version();
        let spec_changed = updated.spec() != current.spec();
        let meta = updated.meta_mut();
        meta.uid = current.meta().uid;
        meta.creation_timestamp = current.meta().creation_timestamp;
        meta.resource_version = resource_version;
        meta.generation = current.meta().generation + i64::from(spec_changed);

        objects.by_key.insert(key, updated.clone());
        self.emit(WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }

    async fn update_status(&self, obj: &R) -> Result<R, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write();
        let current = objects
            .by_key
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(key.clone()))?;
        Self::fence(&current, obj)?;

        let mut updated = current;
        *updated.status_mut() = obj.status().clone();
        updated.meta_mut().resource_version = objects.next_resource_version();

        objects.by_key.insert(key, updated.clone());
        self.emit(WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = ObjectKey::new(namespace, name);
        let mut objects = self.objects.write();
        let mut removed = objects
            .by_key
            .remove(&key)
            .ok_or_else(|| Self::not_found(key))?;
        removed.meta_mut().deletion_timestamp = Some(Utc::now());
        self.emit(WatchEvent::Deleted(removed));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}
