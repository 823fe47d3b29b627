// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Model template controllers: version numbering, default version
//! resolution, serving config generation.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain, application services and in-process infrastructure

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
