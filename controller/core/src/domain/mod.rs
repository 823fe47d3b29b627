// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Resources, conditions, events and the collaborator contracts of the
//! model template controllers.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits with no infrastructure dependencies

pub mod meta;
pub mod condition;
pub mod template;
pub mod version;
pub mod store;
pub mod leader;
pub mod serving;
pub mod events;
pub mod controller_config;
