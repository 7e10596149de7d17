// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment operation outcomes.
//!
//! The engine never lets errors cross its boundary; every apply/remove
//! resolves to a [`DeploymentOutcome`] the adapter can map to component
//! states.

use serde::{Deserialize, Serialize};

/// Terminal status of a single engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Release started and survived its grace window
    Running,
    /// Desired version already active with a live process
    Noop,
    /// Operation failed and no rollback was possible
    Failed,
    /// Start failed but the previous release was reactivated
    RolledBack,
    /// Inactive release directory deleted
    Removed,
    /// Active release stopped and unlinked
    Stopped,
}

crate::simple_display! {
    OutcomeStatus {
        Running => "running",
        Noop => "noop",
        Failed => "failed",
        RolledBack => "rolled_back",
        Removed => "removed",
        Stopped => "stopped",
    }
}

/// Result of an engine operation on one release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DeploymentOutcome {
    pub fn new(status: OutcomeStatus, message: impl Into<String>, version: &str) -> Self {
        Self {
            status,
            message: message.into(),
            version: Some(version.to_string()),
        }
    }

    /// True for statuses the adapter reports as a successful apply.
    pub fn is_applied(&self) -> bool {
        matches!(self.status, OutcomeStatus::Running | OutcomeStatus::Noop)
    }

    /// True for statuses the adapter reports as a successful removal.
    pub fn is_removed(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Removed
                | OutcomeStatus::RolledBack
                | OutcomeStatus::Stopped
                | OutcomeStatus::Noop
        )
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
