// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sv-storage: Durable per-stack deployment state.
//!
//! One `state.json` per stack is the single source of truth across agent
//! restarts. Writes go through a tmp-file rename so the on-disk document is
//! always either the previous committed state or the new one.

pub mod state;
pub mod store;

pub use state::{
    DeployState, DeploymentStatus, ProcessInfo, ReleaseRecord, RuntimeRecord, StackState,
    Timestamps,
};
pub use store::{StateError, StateStore};
