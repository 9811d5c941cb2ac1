// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides mod functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements mod

pub mod enforcement;
pub mod event_bus;
pub mod llm;
pub mod repositories;
pub mod tool_router;
