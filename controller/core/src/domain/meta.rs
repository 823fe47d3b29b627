// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Object Metadata
//!
//! Kubernetes-style identity and bookkeeping shared by every stored kind:
//! [`ObjectKey`] (namespace + name), [`ObjectMeta`] (uid, fencing version,
//! generation, timestamps, labels, owner references) and the [`Resource`]
//! trait the store and controllers are generic over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// API group/version stamped on owner references of the ml kinds.
pub const ML_API_VERSION: &str = "ml.vela.dev/v1";

/// Label linking a `ModelTemplateVersion` to its owning `ModelTemplate`.
pub const LABEL_MODEL_TEMPLATE_NAME: &str = "ml.vela.dev/model-template-name";

/// Identity of a namespaced object. Also the dequeue key of the work queues
/// and the key of the version ledger (template namespace + template name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `name` or `namespace/name` reference. Bare names resolve into
    /// `default_namespace`.
    pub fn parse_ref(reference: &str, default_namespace: &str) -> Self {
        match reference.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new(default_namespace, reference),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Declared parent link, used for indexing and cascading deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Assigned by the store on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Optimistic-concurrency fence. Every successful write bumps it and a
    /// write carrying a stale value is rejected with a conflict.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped by the store whenever the spec changes
    #[serde(default)]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_owned_by(&self, kind: &str, uid: Uuid) -> bool {
        self.owner_references
            .iter()
            .any(|owner| owner.kind == kind && owner.uid == uid)
    }
}

/// A stored kind. The store preserves `status` on spec/metadata updates
/// and touches only `status` on status updates.
pub trait Resource: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: &'static str;

    type Spec: Clone + PartialEq + fmt::Debug + Send + Sync;
    type Status: Clone + Default + PartialEq + fmt::Debug + Send + Sync;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(meta.namespace.clone(), meta.name.clone())
    }
}
