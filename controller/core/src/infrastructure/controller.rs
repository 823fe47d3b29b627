// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Controller
//!
//! Watch-driven dispatcher for one resource kind.
//!
//! - An initial list and the store's watch stream feed object keys into a
//!   [`WorkQueue`]. A lagging watch triggers a full relist.
//! - Worker tasks fetch the live object for each key and run the change
//!   handlers in registration order. An `Updated` object is handed to the
//!   next handler so it does not write against a stale resource version.
//! - Keys whose object is gone run the remove handlers with the last state
//!   seen (tombstone). A tombstone whose uid differs from the live object is
//!   processed too, so a delete followed by a quick recreate is not missed.
//! - Any handler error requeues the key with backoff; the remaining
//!   handlers still run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::application::reconcile::{ChangeHandler, ReconcileOutcome, RemoveHandler};
use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::store::{LabelSelector, ResourceStore, StoreError, WatchEvent};
use crate::infrastructure::work_queue::{RetryPolicy, WorkQueue};

type NamedChangeHandler<R> = (String, Arc<dyn ChangeHandler<R>>);
type NamedRemoveHandler<R> = (String, Arc<dyn RemoveHandler<R>>);

pub struct Controller<R: Resource> {
    name: String,
    store: Arc<dyn ResourceStore<R>>,
    queue: Arc<WorkQueue>,
    change_handlers: Vec<NamedChangeHandler<R>>,
    remove_handlers: Vec<NamedRemoveHandler<R>>,
    /// Last observed state of live objects
    known: Mutex<HashMap<ObjectKey, R>>,
    tombstones: Mutex<HashMap<ObjectKey, R>>,
}

impl<R: Resource> Controller<R> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ResourceStore<R>>,
        retry: RetryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            queue: Arc::new(WorkQueue::new(name.clone(), retry)),
            name,
            store,
            change_handlers: Vec::new(),
            remove_handlers: Vec::new(),
            known: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn on_change(
        &mut self,
        handler_name: impl Into<String>,
        handler: Arc<dyn ChangeHandler<R>>,
    ) {
        self.change_handlers.push((handler_name.into(), handler));
    }

    pub fn on_remove(
        &mut self,
        handler_name: impl Into<String>,
        handler: Arc<dyn RemoveHandler<R>>,
    ) {
        self.remove_handlers.push((handler_name.into(), handler));
    }

    /// List existing objects, then spawn the watch feeder and `workers`
    /// worker tasks. All of them stop when `shutdown` is cancelled.
    pub async fn start(
        self,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let controller = Arc::new(self);

        // Subscribe before listing so no write falls in between
        let watch = controller.store.watch();
        controller.relist().await?;

        let mut handles = Vec::with_capacity(workers + 1);
        handles.push(tokio::spawn(Arc::clone(&controller).feed(watch, shutdown.clone())));
        for _ in 0..workers.max(1) {
            let controller = Arc::clone(&controller);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { controller.work(shutdown).await }));
        }
        debug!(controller = %controller.name, workers, "Controller started");
        Ok(handles)
    }

    /// Enqueue every live object, and tombstone known objects that are gone.
    /// Their last seen state is marked deleted.
    async fn relist(&self) -> Result<(), StoreError> {
        let objects = self.store.list(None, &LabelSelector::everything()).await?;
        let live: HashMap<ObjectKey, R> =
            objects.into_iter().map(|obj| (obj.key(), obj)).collect();

        let vanished: Vec<(ObjectKey, R)> = {
            let mut known = self.known.lock();
            let vanished = known
                .iter()
                .filter(|(key, _)| !live.contains_key(*key))
                .map(|(key, obj)| (key.clone(), obj.clone()))
                .collect();
            known.extend(live.iter().map(|(key, obj)| (key.clone(), obj.clone())));
            vanished
        };

        for (key, mut obj) in vanished {
            debug!(controller = %self.name, key = %key, "Object vanished while unwatched");
            obj.meta_mut().deletion_timestamp.get_or_insert_with(Utc::now);
            self.known.lock().remove(&key);
            self.tombstones.lock().insert(key.clone(), obj);
            self.queue.add(key);
        }
        for key in live.into_keys() {
            self.queue.add(key);
        }
        Ok(())
    }

    async fn feed(
        self: Arc<Self>,
        mut watch: broadcast::Receiver<WatchEvent<R>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = watch.recv() => event,
            };

            match event {
                Ok(WatchEvent::Applied(obj)) => {
                    let key = obj.key();
                    self.known.lock().insert(key.clone(), obj);
                    self.queue.add(key);
                }
                Ok(WatchEvent::Deleted(obj)) => {
                    let key = obj.key();
                    self.known.lock().remove(&key);
                    self.tombstones.lock().insert(key.clone(), obj);
                    self.queue.add(key);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(controller = %self.name, missed, "Watch lagged, relisting");
                    if let Err(e) = self.relist().await {
                        error!(controller = %self.name, error = %e, "Relist failed");
                    }
                }
                Err(RecvError::Closed) => {
                    warn!(controller = %self.name, "Watch closed");
                    break;
                }
            }
        }
        self.queue.shutdown();
    }

    async fn work(&self, shutdown: CancellationToken) {
        while let Some(key) = self.queue.get(&shutdown).await {
            let span = info_span!("reconcile", controller = %self.name, key = %key);
            self.process(&key).instrument(span).await;
            self.queue.done(&key);
        }
    }

    async fn process(&self, key: &ObjectKey) {
        let live = match self.store.get(&key.namespace, &key.name).await {
            Ok(live) => live,
            Err(e) => {
                error!(error = %e, "Failed to fetch object");
                self.record(false);
                self.queue.add_rate_limited(key.clone());
                return;
            }
        };

        let mut succeeded = true;

        let tombstone = self.tombstones.lock().get(key).cloned();
        if let Some(tombstone) = tombstone {
            let recreated = live
                .as_ref()
                .is_some_and(|obj| obj.meta().uid != tombstone.meta().uid);
            if live.is_none() || recreated {
                if self.run_remove_handlers(key, &tombstone).await {
                    let mut tombstones = self.tombstones.lock();
                    let same = tombstones
                        .get(key)
                        .is_some_and(|t| t.meta().uid == tombstone.meta().uid);
                    if same {
                        tombstones.remove(key);
                    }
                } else {
                    succeeded = false;
                }
            } else {
                // Deleted event raced with a relist of the same object
                self.tombstones.lock().remove(key);
            }
        }

        match live {
            Some(obj) => succeeded &= self.run_change_handlers(key, obj).await,
            None => {
                self.known.lock().remove(key);
            }
        }

        self.record(succeeded);
        if succeeded {
            self.queue.forget(key);
        } else {
            self.queue.add_rate_limited(key.clone());
        }
    }

    async fn run_change_handlers(&self, key: &ObjectKey, obj: R) -> bool {
        let mut current = obj;
        let mut succeeded = true;
        for (handler_name, handler) in &self.change_handlers {
            match handler.on_change(key, &current).await {
                Ok(ReconcileOutcome::Updated(updated)) => current = updated,
                Ok(ReconcileOutcome::Unchanged) => {}
                Err(e) => {
                    succeeded = false;
                    if e.is_conflict() {
                        debug!(handler = %handler_name, error = %e, "Handler hit a stale object");
                    } else {
                        error!(handler = %handler_name, error = %e, "Handler failed");
                    }
                }
            }
        }
        self.known.lock().insert(key.clone(), current);
        succeeded
    }

    async fn run_remove_handlers(&self, key: &ObjectKey, tombstone: &R) -> bool {
        let mut succeeded = true;
        for (handler_name, handler) in &self.remove_handlers {
            if let Err(e) = handler.on_remove(key, tombstone).await {
                succeeded = false;
                error!(handler = %handler_name, error = %e, "Remove handler failed");
            }
        }
        succeeded
    }

    fn record(&self, succeeded: bool) {
        let result = if succeeded { "success" } else { "error" };
        metrics::counter!(
            "vela_reconcile_total",
            "controller" => self.name.clone(),
            "result" => result
        )
        .increment(1);
    }
}
