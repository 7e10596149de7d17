// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sv-core: Domain model for the stevedore device agent.
//!
//! Releases, configuration, outcomes, and the clock abstraction shared by
//! the deployment engine and the reconciliation adapter.

pub mod macros;

pub mod clock;
pub mod config;
pub mod outcome;
pub mod release;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    ConfigError, DeviceConfig, DownloadConfig, ExecutorConfig, HeartbeatConfig, StorageConfig,
};
pub use outcome::{DeploymentOutcome, OutcomeStatus};
#[cfg(any(test, feature = "test-support"))]
pub use release::ReleaseBuilder;
pub use release::{parse_release_payload, ArtifactSpec, Release, ReleaseSpecError, RuntimeSpec};
