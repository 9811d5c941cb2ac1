// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AEGIS Conductor Core
//!
//! Control plane for autonomous goal pursuit. A goal enters the cognition
//! loop, which delegates bounded sub-tasks to specialized worker agents,
//! recovers from failures through the adaptive coordinator, and records an
//! append-only delegation audit trail.
//!
//! # Architecture
//!
//! - **Layer:** `domain` (value objects, invariants, collaborator contracts)
//! - **Layer:** `application` (services wired at the composition root)
//! - **Layer:** `infrastructure` (LLM adapters, tool transport, repositories)

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
