//! Notification sink (§4.11): maintainer-facing error reports.
//!
//! The teacher has no direct analogue (it notifies over GitLab/HTTP); the
//! default implementation here follows the same "just log it" fallback the
//! teacher's `tracing.rs` setup implies for anything without a richer
//! sink configured.

use async_trait::async_trait;
use tracing::error;

use crate::Pkgbase;

/// A single maintainer-facing notification (§4.5, §7 kinds 3, 4, 6, 7).
#[derive(Debug, Clone)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

impl Report {
    pub fn missing_dependencies(pkgbase: Pkgbase, missing: Vec<Pkgbase>) -> Self {
        let names = missing
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        Report {
            subject: format!("{pkgbase}: depends on non-managed package(s)"),
            body: format!("{pkgbase} depends on package(s) not managed by this repository: {names}"),
        }
    }

    pub fn recipe_load_failed(pkgbase: Pkgbase, message: String) -> Self {
        Report {
            subject: format!("{pkgbase}: failed to load recipe"),
            body: message,
        }
    }

    /// Distinguishes dependencies already failed this cycle from those not
    /// yet attempted, per §4.5's `failed(error = MissingDependencies)` case.
    pub fn build_time_missing_dependencies(
        pkgbase: Pkgbase,
        already_failed: &[Pkgbase],
        not_yet_attempted: &[Pkgbase],
    ) -> Self {
        let mut body = format!("{pkgbase} failed: missing internal dependencies.\n");
        if !already_failed.is_empty() {
            body.push_str(&format!(
                "Already failed this cycle: {}\n",
                already_failed.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", ")
            ));
        }
        if !not_yet_attempted.is_empty() {
            body.push_str(&format!(
                "Not yet attempted this cycle: {}\n",
                not_yet_attempted.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", ")
            ));
        }
        Report {
            subject: format!("{pkgbase}: build failed, missing dependencies"),
            body,
        }
    }

    pub fn build_exception(pkgbase: Pkgbase, message: String, log_file: Option<String>) -> Self {
        let mut body = message;
        if let Some(log_file) = log_file {
            body.push_str(&format!("\nSee {log_file} for details."));
        }
        Report {
            subject: format!("{pkgbase}: build failed"),
            body,
        }
    }

    pub fn driver_exception(message: String) -> Self {
        Report {
            subject: "cycle driver failed".to_string(),
            body: message,
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, report: Report) -> Result<(), NotifyError>;
}

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Default [`NotificationSink`]: logs through `tracing` at `error` level.
/// Grounded on the teacher's structured-logging setup (`tracing.rs`):
/// notification here is just another structured event.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, report: Report) -> Result<(), NotifyError> {
        error!(subject = %report.subject, body = %report.body, "maintainer notification");
        Ok(())
    }
}

/// Discards every report. Used in tests where notification delivery isn't
/// under test.
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn notify(&self, _report: Report) -> Result<(), NotifyError> {
        Ok(())
    }
}
