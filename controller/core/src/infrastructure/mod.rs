// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod store;
pub mod event_bus;
pub mod work_queue;
pub mod controller;
pub mod leader;
pub mod serving_config;
pub mod manifest_loader;

pub use controller::Controller;
pub use work_queue::{RetryPolicy, WorkQueue};
