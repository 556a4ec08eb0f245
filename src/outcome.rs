//! Build outcome tagged variant (§3) and the resource-usage data each
//! outcome may carry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Pkgbase;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub cpu_time: Option<Duration>,
    pub peak_memory_bytes: Option<u64>,
}

#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BuildError {
    /// Build-time missing internal dependency (§7 kind 5). Carries the
    /// full set of missing deps, not just those already failed this cycle.
    #[error("missing dependencies: {}", .0.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", "))]
    MissingDependencies(Vec<Pkgbase>),
    /// Build-time exception (§7 kind 6), with a reference to the package
    /// log file for the notification report.
    #[error("build failed: {message}")]
    Exception {
        message: String,
        log_file: Option<String>,
    },
}

/// One completed build's result, as handed to the [`crate::result_handler`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuildOutcome {
    Successful {
        version: String,
        elapsed: Duration,
        usage: Option<ResourceUsage>,
    },
    /// Built into an intermediate store but not yet published.
    Staged {
        version: String,
        elapsed: Duration,
        usage: Option<ResourceUsage>,
    },
    Skipped {
        reason: String,
        elapsed: Duration,
    },
    Failed {
        error: BuildError,
        elapsed: Duration,
        usage: Option<ResourceUsage>,
    },
}

impl BuildOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            BuildOutcome::Successful { elapsed, .. }
            | BuildOutcome::Staged { elapsed, .. }
            | BuildOutcome::Skipped { elapsed, .. }
            | BuildOutcome::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            BuildOutcome::Successful { .. } => "successful",
            BuildOutcome::Staged { .. } => "staged",
            BuildOutcome::Skipped { .. } => "skipped",
            BuildOutcome::Failed { .. } => "failed",
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            BuildOutcome::Successful { version, .. } | BuildOutcome::Staged { version, .. } => {
                Some(version)
            }
            BuildOutcome::Skipped { .. } | BuildOutcome::Failed { .. } => None,
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(
            self,
            BuildOutcome::Successful { .. } | BuildOutcome::Staged { .. }
        )
    }

    pub fn usage(&self) -> Option<&ResourceUsage> {
        match self {
            BuildOutcome::Successful { usage, .. }
            | BuildOutcome::Staged { usage, .. }
            | BuildOutcome::Failed { usage, .. } => usage.as_ref(),
            BuildOutcome::Skipped { .. } => None,
        }
    }

    pub fn missing_dependencies(&self) -> Option<&[Pkgbase]> {
        match self {
            BuildOutcome::Failed {
                error: BuildError::MissingDependencies(deps),
                ..
            } => Some(deps),
            _ => None,
        }
    }
}
