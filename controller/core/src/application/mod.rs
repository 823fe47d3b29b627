// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod reconcile;
pub mod ledger;
pub mod condition_status;
pub mod version_reconciler;
pub mod template_reconciler;
pub mod template_cleanup;
pub mod serving_config;
pub mod leadership;
pub mod bootstrap;

pub use bootstrap::{BootstrapError, ControllerManager, RunningControllers};
pub use ledger::VersionLedger;
pub use reconcile::{ChangeHandler, ReconcileError, ReconcileOutcome, RemoveHandler};
