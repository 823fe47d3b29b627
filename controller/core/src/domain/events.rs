// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::meta::ObjectKey;

/// Lifecycle events of `ModelTemplateVersion` objects, published by the
/// version handlers after the corresponding store write succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionEvent {
    VersionLinked {
        version: ObjectKey,
        template: ObjectKey,
        linked_at: DateTime<Utc>,
    },
    VersionAssigned {
        version: ObjectKey,
        template: ObjectKey,
        number: u32,
        assigned_at: DateTime<Utc>,
    },
    VersionConfigured {
        version: ObjectKey,
        succeeded: bool,
        message: String,
        configured_at: DateTime<Utc>,
    },
}

impl VersionEvent {
    pub fn version(&self) -> &ObjectKey {
        match self {
            Self::VersionLinked { version, .. }
            | Self::VersionAssigned { version, .. }
            | Self::VersionConfigured { version, .. } => version,
        }
    }
}

/// Events of `ModelTemplate` objects and their ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemplateEvent {
    DefaultVersionSelected {
        template: ObjectKey,
        version_ref: String,
        selected_at: DateTime<Utc>,
    },
    DefaultVersionResolved {
        template: ObjectKey,
        default_version: u32,
        resolved_at: DateTime<Utc>,
    },
    DefaultVersionUnresolved {
        template: ObjectKey,
        message: String,
        observed_at: DateTime<Utc>,
    },
    LatestVersionSynced {
        template: ObjectKey,
        latest_version: u32,
        synced_at: DateTime<Utc>,
    },
    LedgerEntryRemoved {
        template: ObjectKey,
        removed_at: DateTime<Utc>,
    },
}

impl TemplateEvent {
    pub fn template(&self) -> &ObjectKey {
        match self {
            Self::DefaultVersionSelected { template, .. }
            | Self::DefaultVersionResolved { template, .. }
            | Self::DefaultVersionUnresolved { template, .. }
            | Self::LatestVersionSynced { template, .. }
            | Self::LedgerEntryRemoved { template, .. } => template,
        }
    }
}
