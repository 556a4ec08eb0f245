//! Result Handler (C5, §4.5): interprets each build outcome, emits logs,
//! routes notifications, and updates failure memory.
//!
//! Grounded on the teacher's worker task loop (`src/bin/worker/tasks.rs`),
//! which logs the outcome, reports status upstream, and notifies on
//! failure in sequence for each completed build. The transport (HTTP
//! `reqwest` calls) is dropped; logging goes to the files named in §6
//! instead of a remote server.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use colored::Colorize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    Pkgbase,
    db::Database,
    notify::{NotificationSink, Report},
    outcome::{BuildError, BuildOutcome},
    publish,
    reason::{BuildReason, BuildReasons},
    recipe::{NvResult, Recipe},
    sorter::PriorityTopoSorter,
};

/// One line of the structured `build-log.json` event stream (§6).
#[derive(serde::Serialize)]
struct BuildEvent<'a> {
    timestamp: String,
    cycle_id: Uuid,
    event: &'a str,
    logger_name: &'a str,
    pkgbase: &'a str,
    nv_version: Option<&'a str>,
    pkg_version: Option<&'a str>,
    elapsed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

pub struct ResultHandler<'a> {
    pub failed: HashMap<Pkgbase, Vec<Pkgbase>>,
    pub built: HashSet<Pkgbase>,
    recipes: &'a HashMap<Pkgbase, Recipe>,
    build_reasons: &'a HashMap<Pkgbase, BuildReasons>,
    /// Upstream-checker results this cycle (§4.1 step 2), kept around to
    /// surface each build's `nv_version` in the structured log (§4.5, §6).
    nvdata: &'a HashMap<Pkgbase, NvResult>,
    database: &'a dyn Database,
    notifier: &'a dyn NotificationSink,
    human_log: Mutex<File>,
    json_log: Mutex<File>,
    /// Where a `Staged` build's artifacts live before publishing, one
    /// subdirectory per `pkgbase` (GLOSSARY "Staged").
    staging_dir: PathBuf,
    /// `repository.destdir` (§6); `None` skips publishing entirely.
    destdir: Option<PathBuf>,
    /// Identifies every JSON log line written by this cycle, so lines from
    /// concurrent or overlapping cycles can be told apart downstream.
    cycle_id: Uuid,
}

impl<'a> ResultHandler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipes: &'a HashMap<Pkgbase, Recipe>,
        build_reasons: &'a HashMap<Pkgbase, BuildReasons>,
        nvdata: &'a HashMap<Pkgbase, NvResult>,
        database: &'a dyn Database,
        notifier: &'a dyn NotificationSink,
        human_log: File,
        json_log: File,
        staging_dir: PathBuf,
        destdir: Option<PathBuf>,
    ) -> Self {
        ResultHandler {
            failed: HashMap::new(),
            built: HashSet::new(),
            recipes,
            build_reasons,
            nvdata,
            database,
            notifier,
            human_log: Mutex::new(human_log),
            json_log: Mutex::new(json_log),
            staging_dir,
            destdir,
            cycle_id: Uuid::new_v4(),
        }
    }

    /// §4.4 step 1: a picked package already present in this cycle's
    /// `failed` map must not be re-attempted.
    pub fn already_failed_this_cycle(&self, p: &Pkgbase) -> Option<Vec<Pkgbase>> {
        self.failed.get(p).cloned()
    }

    /// Marks `p` done without attempting a build, because it already
    /// failed this cycle; its dependents still carry `FailedByDeps` and
    /// will be pruned in turn when they're picked. Records the same
    /// `failed` status to the database as a real build failure would, so
    /// later cycles' `is_last_build_failed` check observes it too.
    pub async fn propagate_cascaded_failure(&mut self, p: &Pkgbase, missing: Vec<Pkgbase>) {
        let missing_list = missing.iter().map(|d| d.as_ref()).collect::<Vec<_>>().join(", ");
        self.write_human_line(&format!("{p}: skipped, already failed this cycle (missing {missing_list})"));
        let reasons = self
            .build_reasons
            .get(p)
            .map(|r| serde_json::to_string(&r.0).unwrap_or_default())
            .unwrap_or_default();
        self.database
            .record_log(
                p,
                "failed",
                None,
                None,
                std::time::Duration::ZERO,
                None,
                &reasons,
                Some(&format!("cascaded failure: missing {missing_list}")),
            )
            .await
            .ok();
    }

    /// §4.4 step 1: a package whose only reason is `FailedByDeps` and
    /// whose dependencies still don't resolve cannot usefully be
    /// attempted; prune it without dispatching.
    pub fn only_reason_is_unresolved_failed_by_deps(
        &self,
        p: &Pkgbase,
        build_reasons: &HashMap<Pkgbase, BuildReasons>,
    ) -> bool {
        let Some(reasons) = build_reasons.get(p) else {
            return false;
        };
        let [crate::reason::BuildReason::FailedByDeps(deps)] = reasons.0.as_slice() else {
            return false;
        };
        let Some(recipe) = self.recipes.get(p) else {
            return false;
        };
        deps.iter().all(|dep_name| {
            recipe
                .dependencies
                .iter()
                .find(|d| d.target == *dep_name)
                .is_none_or(|d| !d.resolve())
        })
    }

    /// §4.5: interprets one completed build outcome.
    pub async fn handle(
        &mut self,
        pkgbase: &Pkgbase,
        outcome: BuildOutcome,
        sorter: &mut PriorityTopoSorter,
    ) {
        let elapsed = outcome.elapsed().as_secs_f64();
        let version = outcome.version().map(str::to_string);

        let kind = outcome.kind_name();
        let colored_kind = match &outcome {
            BuildOutcome::Successful { .. } | BuildOutcome::Staged { .. } => kind.green(),
            BuildOutcome::Skipped { .. } => kind.yellow(),
            BuildOutcome::Failed { .. } => kind.red(),
        };
        self.write_human_line(&format!(
            "{pkgbase}: {colored_kind} ({elapsed:.1}s){}",
            version.as_deref().map(|v| format!(" -> {v}")).unwrap_or_default()
        ));
        let nv_version = self.nv_version(pkgbase);
        self.write_json_event(pkgbase, &outcome, elapsed, nv_version, version.as_deref());

        match &outcome {
            BuildOutcome::Successful { .. } => {
                self.built.insert(pkgbase.clone());
                self.record_success_status(pkgbase).await;
            }
            BuildOutcome::Staged { .. } => {
                self.built.insert(pkgbase.clone());
                self.record_success_status(pkgbase).await;
                self.publish_staged(pkgbase);
            }
            BuildOutcome::Skipped { reason, .. } => {
                info!(%pkgbase, %reason, "build skipped");
            }
            BuildOutcome::Failed { error, .. } => {
                self.handle_failure(pkgbase, error).await;
            }
        }

        self.record_log(pkgbase, &outcome, nv_version, version.as_deref()).await;
        sorter.done(pkgbase);
    }

    /// Records every nvchecker source this build consumed as succeeded,
    /// so a later cycle's throttle check (§4.1 step 3) sees a real
    /// `last_success` timestamp instead of `None`. A build with no
    /// `NvChecker` reason (e.g. `Cmdline`) has no source to record.
    async fn record_success_status(&self, pkgbase: &Pkgbase) {
        let Some(reasons) = self.build_reasons.get(pkgbase) else {
            return;
        };
        for reason in &reasons.0 {
            if let BuildReason::NvChecker(changes) = reason {
                for change in changes {
                    self.database
                        .set_status(pkgbase, Some(change.source_index), true)
                        .await
                        .ok();
                }
            }
        }
    }

    /// The upstream version this build's `NvChecker` reason reported, if
    /// any (§4.5 `nv_version`). Ties its lifetime to `nvdata` itself
    /// (not the `&self` borrow) so callers can hold it across later
    /// `&mut self` calls in the same outcome handling.
    fn nv_version(&self, pkgbase: &Pkgbase) -> Option<&'a str> {
        self.nvdata
            .get(pkgbase)
            .and_then(|r| r.changes.first())
            .map(|c| c.new_version.as_str())
    }

    /// Copies a `Staged` build's artifacts into `repository.destdir`
    /// (GLOSSARY "Staged"). A missing `destdir` configuration just skips
    /// publishing — the build already succeeded.
    fn publish_staged(&self, pkgbase: &Pkgbase) {
        let Some(destdir) = &self.destdir else {
            return;
        };
        let staged_dir = self.staging_dir.join(pkgbase.as_ref());
        match publish::publish_artifacts(&staged_dir, destdir) {
            Ok(published) => {
                info!(%pkgbase, count = published.len(), "published staged artifacts")
            }
            Err(error) => warn!(%pkgbase, %error, "failed to publish staged artifacts"),
        }
    }

    async fn handle_failure(&mut self, pkgbase: &Pkgbase, error: &BuildError) {
        match error {
            BuildError::MissingDependencies(deps) => {
                self.failed.insert(pkgbase.clone(), deps.clone());

                let (already_failed, not_yet_attempted): (Vec<_>, Vec<_>) = deps
                    .iter()
                    .cloned()
                    .partition(|d| self.failed.contains_key(d));

                self.notifier
                    .notify(Report::build_time_missing_dependencies(
                        pkgbase.clone(),
                        &already_failed,
                        &not_yet_attempted,
                    ))
                    .await
                    .ok();
            }
            BuildError::Exception { message, log_file } => {
                self.failed.entry(pkgbase.clone()).or_default();
                self.notifier
                    .notify(Report::build_exception(
                        pkgbase.clone(),
                        message.clone(),
                        log_file.clone(),
                    ))
                    .await
                    .ok();
            }
        }
    }

    async fn record_log(
        &self,
        pkgbase: &Pkgbase,
        outcome: &BuildOutcome,
        nv_version: Option<&str>,
        pkg_version: Option<&str>,
    ) {
        let reasons = self
            .build_reasons
            .get(pkgbase)
            .map(|r| serde_json::to_string(&r.0).unwrap_or_default())
            .unwrap_or_default();

        let message = match outcome {
            BuildOutcome::Skipped { reason, .. } => Some(reason.clone()),
            BuildOutcome::Failed {
                error: BuildError::Exception { message, .. },
                ..
            } => Some(message.clone()),
            _ => None,
        };

        self.database
            .record_log(
                pkgbase,
                outcome.kind_name(),
                nv_version,
                pkg_version,
                outcome.elapsed(),
                outcome.usage(),
                &reasons,
                message.as_deref(),
            )
            .await
            .ok();
    }

    fn write_human_line(&self, line: &str) {
        if let Ok(mut log) = self.human_log.lock() {
            let _ = writeln!(log, "{line}");
        }
    }

    fn write_json_event(
        &self,
        pkgbase: &Pkgbase,
        outcome: &BuildOutcome,
        elapsed: f64,
        nv_version: Option<&str>,
        version: Option<&str>,
    ) {
        let message = match outcome {
            BuildOutcome::Skipped { reason, .. } => Some(reason.as_str()),
            BuildOutcome::Failed {
                error: BuildError::Exception { message, .. },
                ..
            } => Some(message.as_str()),
            _ => None,
        };

        let event = BuildEvent {
            timestamp: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            cycle_id: self.cycle_id,
            event: outcome.kind_name(),
            logger_name: "buildcycle.result_handler",
            pkgbase: pkgbase.as_ref(),
            nv_version,
            pkg_version: version,
            elapsed,
            message,
        };

        if let (Ok(mut log), Ok(line)) = (self.json_log.lock(), serde_json::to_string(&event)) {
            let _ = writeln!(log, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::NullDatabase,
        dep_graph::DependencyGraph,
        notify::NullNotificationSink,
        reason::BuildReason,
    };
    use std::time::Duration;

    fn handler<'a>(
        recipes: &'a HashMap<Pkgbase, Recipe>,
        build_reasons: &'a HashMap<Pkgbase, BuildReasons>,
        nvdata: &'a HashMap<Pkgbase, NvResult>,
    ) -> ResultHandler<'a> {
        ResultHandler::new(
            recipes,
            build_reasons,
            nvdata,
            &NullDatabase,
            &NullNotificationSink,
            tempfile::tempfile().unwrap(),
            tempfile::tempfile().unwrap(),
            PathBuf::from("/nonexistent-staging"),
            None,
        )
    }

    #[tokio::test]
    async fn successful_outcome_adds_to_built() {
        let recipes = HashMap::new();
        let build_reasons = HashMap::new();
        let nvdata = HashMap::new();
        let mut h = handler(&recipes, &build_reasons, &nvdata);
        let mut sorter = PriorityTopoSorter::new(&DependencyGraph::default()).unwrap();

        h.handle(
            &Pkgbase::from("pkga"),
            BuildOutcome::Successful {
                version: "1.0-1".to_string(),
                elapsed: Duration::from_secs(3),
                usage: None,
            },
            &mut sorter,
        )
        .await;

        assert!(h.built.contains(&Pkgbase::from("pkga")));
        assert!(!h.failed.contains_key(&Pkgbase::from("pkga")));
    }

    #[tokio::test]
    async fn staged_outcome_publishes_artifacts_to_destdir() {
        let recipes = HashMap::new();
        let build_reasons = HashMap::new();
        let nvdata = HashMap::new();
        let staging = tempfile::tempdir().unwrap();
        let destdir = tempfile::tempdir().unwrap();

        std::fs::create_dir_all(staging.path().join("pkga")).unwrap();
        std::fs::write(
            staging.path().join("pkga").join("pkga-1.0-1-x86_64.pkg.tar.zst"),
            b"pkg",
        )
        .unwrap();

        let mut h = ResultHandler::new(
            &recipes,
            &build_reasons,
            &nvdata,
            &NullDatabase,
            &NullNotificationSink,
            tempfile::tempfile().unwrap(),
            tempfile::tempfile().unwrap(),
            staging.path().to_path_buf(),
            Some(destdir.path().to_path_buf()),
        );
        let mut sorter = PriorityTopoSorter::new(&DependencyGraph::default()).unwrap();

        h.handle(
            &Pkgbase::from("pkga"),
            BuildOutcome::Staged {
                version: "1.0-1".to_string(),
                elapsed: Duration::from_secs(2),
                usage: None,
            },
            &mut sorter,
        )
        .await;

        assert!(h.built.contains(&Pkgbase::from("pkga")));
        assert!(destdir.path().join("pkga-1.0-1-x86_64.pkg.tar.zst").exists());
    }

    #[tokio::test]
    async fn missing_dependency_failure_records_full_missing_set() {
        let recipes = HashMap::new();
        let build_reasons = HashMap::new();
        let nvdata = HashMap::new();
        let mut h = handler(&recipes, &build_reasons, &nvdata);
        let mut sorter = PriorityTopoSorter::new(&DependencyGraph::default()).unwrap();

        h.handle(
            &Pkgbase::from("pkga"),
            BuildOutcome::Failed {
                error: BuildError::MissingDependencies(vec![Pkgbase::from("pkgb")]),
                elapsed: Duration::from_secs(1),
                usage: None,
            },
            &mut sorter,
        )
        .await;

        assert_eq!(
            h.failed[&Pkgbase::from("pkga")],
            vec![Pkgbase::from("pkgb")]
        );
        assert!(!h.built.contains(&Pkgbase::from("pkga")));
    }

    #[tokio::test]
    async fn successful_nvchecker_build_records_last_success() {
        let recipes = HashMap::new();
        let mut build_reasons = HashMap::new();
        build_reasons.insert(
            Pkgbase::from("pkga"),
            BuildReasons(vec![BuildReason::NvChecker(vec![crate::reason::NvChangeRecord {
                source_index: 2,
                old_index: 0,
                source_name: "aur".to_string(),
            }])]),
        );
        let nvdata = HashMap::new();
        let database = crate::testutil::FakeDatabase::default();
        let mut h = ResultHandler::new(
            &recipes,
            &build_reasons,
            &nvdata,
            &database,
            &NullNotificationSink,
            tempfile::tempfile().unwrap(),
            tempfile::tempfile().unwrap(),
            PathBuf::from("/nonexistent-staging"),
            None,
        );
        let mut sorter = PriorityTopoSorter::new(&DependencyGraph::default()).unwrap();

        h.handle(
            &Pkgbase::from("pkga"),
            BuildOutcome::Successful {
                version: "1.0-1".to_string(),
                elapsed: Duration::from_secs(1),
                usage: None,
            },
            &mut sorter,
        )
        .await;

        assert!(
            database
                .last_success(&Pkgbase::from("pkga"), 2)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn only_failed_by_deps_with_unresolved_dep_is_pruned() {
        let mut recipes = HashMap::new();
        recipes.insert(
            Pkgbase::from("pkga"),
            Recipe {
                dependencies: vec![crate::recipe::Dependency::unresolved("pkgb", "pkgb")],
                ..Default::default()
            },
        );
        let mut build_reasons = HashMap::new();
        build_reasons.insert(
            Pkgbase::from("pkga"),
            BuildReasons(vec![BuildReason::FailedByDeps(vec![Pkgbase::from("pkgb")])]),
        );
        let nvdata = HashMap::new();

        let h = handler(&recipes, &build_reasons, &nvdata);
        assert!(h.only_reason_is_unresolved_failed_by_deps(&Pkgbase::from("pkga"), &build_reasons));
    }

    #[test]
    fn failed_by_deps_with_now_resolved_dep_is_not_pruned() {
        let mut recipes = HashMap::new();
        recipes.insert(
            Pkgbase::from("pkga"),
            Recipe {
                dependencies: vec![crate::recipe::Dependency::always_resolved("pkgb", "pkgb")],
                ..Default::default()
            },
        );
        let mut build_reasons = HashMap::new();
        build_reasons.insert(
            Pkgbase::from("pkga"),
            BuildReasons(vec![BuildReason::FailedByDeps(vec![Pkgbase::from("pkgb")])]),
        );
        let nvdata = HashMap::new();

        let h = handler(&recipes, &build_reasons, &nvdata);
        assert!(!h.only_reason_is_unresolved_failed_by_deps(&Pkgbase::from("pkga"), &build_reasons));
    }
}
