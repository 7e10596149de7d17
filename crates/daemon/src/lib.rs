// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sv-daemon: Agent lifecycle — bootstrap, init, shutdown.
//!
//! The embedding process (transport, signal handling, logging setup) calls
//! [`init`] once at startup and [`Agent::shutdown`] when a termination
//! signal arrives.

pub mod lifecycle;

pub use lifecycle::{init, init_with_sink, Agent};
