//! Reason Collector (C1, §4.1): classifies each candidate package with
//! zero or more build reasons and computes each reason's priority.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::{
    Pkgbase,
    db::Database,
    git_sync::{GitSyncError, SourceControl},
    recipe::{NvChange, Recipe, UpstreamChecker},
};

/// A build reason (§3). Priority is computed by [`BuildReason::priority`];
/// lower sorts earlier.
#[derive(Debug, Clone, Serialize, Deserialize, Display, PartialEq)]
pub enum BuildReason {
    UpdatedPkgrel,
    NvChecker(Vec<NvChangeRecord>),
    /// Carries the name of the package this one was promoted to build for.
    Depended(Pkgbase),
    UpdatedFailed,
    FailedByDeps(Vec<Pkgbase>),
    Cmdline,
}

/// Serializable mirror of [`NvChange`], stripped of nothing — kept
/// separate so `reason.rs` does not need `recipe::NvChange` to be
/// `Serialize` for unrelated reasons.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NvChangeRecord {
    pub source_index: usize,
    pub old_index: usize,
    pub source_name: String,
}

impl From<&NvChange> for NvChangeRecord {
    fn from(change: &NvChange) -> Self {
        NvChangeRecord {
            source_index: change.source_index,
            old_index: change.old_index,
            source_name: change.source_name.clone(),
        }
    }
}

impl BuildReason {
    /// Own priority of this single reason (§3 table), ignoring `Depended`'s
    /// transitive recursion (that happens in
    /// [`BuildReasons::effective_priority`]).
    fn base_priority(&self) -> u8 {
        match self {
            BuildReason::UpdatedPkgrel => 0,
            BuildReason::NvChecker(items) => {
                if items.iter().any(|i| i.source_name == "manual") {
                    0
                } else if items.len() > 1 || items.iter().any(|i| i.old_index > 0) {
                    1
                } else {
                    3
                }
            }
            BuildReason::Depended(_) => 3,
            BuildReason::UpdatedFailed => 2,
            BuildReason::FailedByDeps(_) => 3,
            BuildReason::Cmdline => 3,
        }
    }
}

/// Ordered list of reasons accumulated for one package this cycle.
/// Reasons are append-only within a cycle (§3 invariant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReasons(pub Vec<BuildReason>);

impl BuildReasons {
    pub fn push(&mut self, reason: BuildReason) {
        self.0.push(reason);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Effective priority: the minimum over all reasons, recursing through
    /// `Depended` chains. Guards against pathological/cyclic `Depended`
    /// chains with a depth limit (§9 "Priority recursion").
    pub fn effective_priority(&self, all: &HashMap<Pkgbase, BuildReasons>) -> u8 {
        self.effective_priority_inner(all, &mut HashSet::new(), 0)
    }

    fn effective_priority_inner(
        &self,
        all: &HashMap<Pkgbase, BuildReasons>,
        visiting: &mut HashSet<Pkgbase>,
        depth: u8,
    ) -> u8 {
        const MAX_DEPTH: u8 = 64;
        const FALLBACK_PRIORITY: u8 = 3;

        self.0
            .iter()
            .map(|reason| match reason {
                BuildReason::Depended(depender) => {
                    if depth >= MAX_DEPTH || !visiting.insert(depender.clone()) {
                        return FALLBACK_PRIORITY;
                    }
                    let priority = all
                        .get(depender)
                        .map(|r| r.effective_priority_inner(all, visiting, depth + 1))
                        .unwrap_or(FALLBACK_PRIORITY);
                    visiting.remove(depender);
                    priority
                }
                other => other.base_priority(),
            })
            .min()
            .unwrap_or(FALLBACK_PRIORITY)
    }
}

#[derive(Error, Debug)]
pub enum ReasonCollectionError {
    #[error("upstream checker failed: {0}")]
    Check(#[from] crate::recipe::CheckError),
    #[error("source control error: {0}")]
    SourceControl(#[from] GitSyncError),
}

pub struct ReasonCollector<'a> {
    pub source_control: &'a dyn SourceControl,
    pub database: &'a dyn Database,
}

pub struct CollectedReasons {
    pub build_reasons: HashMap<Pkgbase, BuildReasons>,
    pub nvdata: HashMap<Pkgbase, crate::recipe::NvResult>,
}

impl<'a> ReasonCollector<'a> {
    pub fn new(source_control: &'a dyn SourceControl, database: &'a dyn Database) -> Self {
        ReasonCollector {
            source_control,
            database,
        }
    }

    /// Run the Reason Collector algorithm (§4.1).
    #[allow(clippy::too_many_arguments)]
    pub async fn collect(
        &self,
        managed_packages: &HashMap<Pkgbase, Recipe>,
        previous_failed_info: &HashMap<Pkgbase, Vec<Pkgbase>>,
        last_commit: &crate::CommitHash,
        head_commit: &crate::CommitHash,
        upstream_checker: &dyn UpstreamChecker,
        cmdline_packages: &[Pkgbase],
    ) -> Result<CollectedReasons, ReasonCollectionError> {
        let mut build_reasons: HashMap<Pkgbase, BuildReasons> = HashMap::new();
        let mut nvdata = HashMap::new();

        if !cmdline_packages.is_empty() {
            for pkgbase in cmdline_packages {
                build_reasons
                    .entry(pkgbase.clone())
                    .or_default()
                    .push(BuildReason::Cmdline);
            }
        } else {
            let changed: HashSet<Pkgbase> = self
                .source_control
                .changed_files(last_commit, head_commit)
                .map_err(ReasonCollectionError::SourceControl)?
                .into_iter()
                .filter_map(|path| {
                    path.components()
                        .next()
                        .map(|c| Pkgbase::from(c.as_os_str().to_string_lossy().into_owned()))
                })
                .filter(|pkgbase| managed_packages.contains_key(pkgbase))
                .collect();

            for pkgbase in previous_failed_info.keys().filter(|p| changed.contains(*p)) {
                build_reasons
                    .entry(pkgbase.clone())
                    .or_default()
                    .push(BuildReason::UpdatedFailed);
            }

            for pkgbase in &changed {
                let changed_pkgrel = self
                    .source_control
                    .package_release_changed(last_commit, head_commit, pkgbase)
                    .map_err(ReasonCollectionError::SourceControl)?;
                if changed_pkgrel {
                    build_reasons
                        .entry(pkgbase.clone())
                        .or_default()
                        .push(BuildReason::UpdatedPkgrel);
                }
            }

            for (pkgbase, missing) in previous_failed_info {
                build_reasons
                    .entry(pkgbase.clone())
                    .or_default()
                    .push(BuildReason::FailedByDeps(missing.clone()));
            }
        }

        let upstream_targets: Vec<Pkgbase> = if cmdline_packages.is_empty() {
            managed_packages.keys().cloned().collect()
        } else {
            cmdline_packages.to_vec()
        };

        let nv_results = upstream_checker.check(&upstream_targets).await?;
        for (pkgbase, result) in nv_results {
            let Some(recipe) = managed_packages.get(&pkgbase) else {
                continue;
            };

            let mut surviving = Vec::new();
            for change in &result.changes {
                if let Some(interval) = recipe.throttle.get(&change.source_index) {
                    if let Ok(Some(last_success)) = self
                        .database
                        .last_success(&pkgbase, change.source_index)
                        .await
                    {
                        let now = time::OffsetDateTime::now_utc();
                        if last_success + *interval > now {
                            tracing::debug!(
                                %pkgbase,
                                source_index = change.source_index,
                                "throttled: last success within throttle interval"
                            );
                            continue;
                        }
                    }
                }
                surviving.push(NvChangeRecord::from(change));
            }

            if !surviving.is_empty() {
                build_reasons
                    .entry(pkgbase.clone())
                    .or_default()
                    .push(BuildReason::NvChecker(surviving));
            }

            nvdata.insert(pkgbase, result);
        }

        Ok(CollectedReasons {
            build_reasons,
            nvdata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasons(list: Vec<BuildReason>) -> BuildReasons {
        BuildReasons(list)
    }

    #[test]
    fn updated_pkgrel_has_priority_zero() {
        let r = reasons(vec![BuildReason::UpdatedPkgrel]);
        assert_eq!(r.effective_priority(&HashMap::new()), 0);
    }

    #[test]
    fn nvchecker_manual_has_priority_zero() {
        let r = reasons(vec![BuildReason::NvChecker(vec![NvChangeRecord {
            source_index: 0,
            old_index: 0,
            source_name: "manual".to_string(),
        }])]);
        assert_eq!(r.effective_priority(&HashMap::new()), 0);
    }

    #[test]
    fn nvchecker_multi_source_has_priority_one() {
        let r = reasons(vec![BuildReason::NvChecker(vec![
            NvChangeRecord {
                source_index: 0,
                old_index: 0,
                source_name: "github".to_string(),
            },
            NvChangeRecord {
                source_index: 1,
                old_index: 0,
                source_name: "github".to_string(),
            },
        ])]);
        assert_eq!(r.effective_priority(&HashMap::new()), 1);
    }

    #[test]
    fn nvchecker_single_normal_source_has_priority_three() {
        let r = reasons(vec![BuildReason::NvChecker(vec![NvChangeRecord {
            source_index: 0,
            old_index: 0,
            source_name: "github".to_string(),
        }])]);
        assert_eq!(r.effective_priority(&HashMap::new()), 3);
    }

    #[test]
    fn cmdline_and_failed_by_deps_have_priority_three() {
        assert_eq!(
            reasons(vec![BuildReason::Cmdline]).effective_priority(&HashMap::new()),
            3
        );
        assert_eq!(
            reasons(vec![BuildReason::FailedByDeps(vec![])]).effective_priority(&HashMap::new()),
            3
        );
    }

    #[test]
    fn updated_failed_has_priority_two() {
        let r = reasons(vec![BuildReason::UpdatedFailed]);
        assert_eq!(r.effective_priority(&HashMap::new()), 2);
    }

    #[test]
    fn depended_priority_recurses_transitively() {
        let mut all = HashMap::new();
        all.insert(
            Pkgbase::from("parent"),
            reasons(vec![BuildReason::UpdatedPkgrel]),
        );
        let child = reasons(vec![BuildReason::Depended(Pkgbase::from("parent"))]);
        assert_eq!(child.effective_priority(&all), 0);
    }

    #[test]
    fn depended_cycle_falls_back_to_priority_three() {
        let mut all = HashMap::new();
        all.insert(
            Pkgbase::from("a"),
            reasons(vec![BuildReason::Depended(Pkgbase::from("b"))]),
        );
        all.insert(
            Pkgbase::from("b"),
            reasons(vec![BuildReason::Depended(Pkgbase::from("a"))]),
        );
        assert_eq!(all[&Pkgbase::from("a")].effective_priority(&all), 3);
    }

    #[test]
    fn multiple_reasons_take_the_minimum() {
        let r = reasons(vec![BuildReason::Cmdline, BuildReason::UpdatedPkgrel]);
        assert_eq!(r.effective_priority(&HashMap::new()), 0);
    }
}
