// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for Vela CLI

pub mod config;
pub mod reconcile;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::reconcile::ReconcileArgs;
pub use self::run::RunArgs;
