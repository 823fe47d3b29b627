// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resource Store Implementations
//!
//! Infrastructure implementations of the [`ResourceStore`] contract defined
//! in the domain layer.
//!
//! # Available Implementations
//!
//! - **InMemoryResourceStore** - `RwLock<HashMap>` storage with a broadcast
//!   watch channel and `resource_version` fencing. Used by the CLI to run
//!   manifests locally and by the integration tests.
//!
//! [`ResourceStore`]: crate::domain::store::ResourceStore

pub mod memory;

pub use memory::InMemoryResourceStore;
