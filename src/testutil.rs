//! In-memory fakes for every external collaborator (§1), used by unit and
//! integration tests so the kernel can be exercised without a sandbox, a
//! real git repository, or a network connection.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    CommitHash, Pkgbase,
    db::{DbError, Database},
    git_sync::{GitSyncError, SourceControl},
    outcome::BuildOutcome,
    recipe::{CatalogError, CheckError, NvResult, PackageBuilder, Recipe, RecipeCatalog, UpstreamChecker},
};

/// Serves a fixed recipe catalog.
pub struct FakeCatalog(pub HashMap<Pkgbase, Recipe>);

#[async_trait]
impl RecipeCatalog for FakeCatalog {
    async fn load(&self) -> Result<HashMap<Pkgbase, Recipe>, CatalogError> {
        Ok(self.0.clone())
    }
}

/// Serves a fixed upstream-check result, ignoring the requested package
/// list filter (tests pass exactly the packages they care about).
#[derive(Default)]
pub struct FakeUpstreamChecker {
    pub results: HashMap<Pkgbase, NvResult>,
    pub nvtaken: Mutex<Vec<Pkgbase>>,
}

impl FakeUpstreamChecker {
    pub fn new(results: HashMap<Pkgbase, NvResult>) -> Self {
        FakeUpstreamChecker {
            results,
            nvtaken: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl UpstreamChecker for FakeUpstreamChecker {
    async fn check(&self, pkgs: &[Pkgbase]) -> Result<HashMap<Pkgbase, NvResult>, CheckError> {
        Ok(self
            .results
            .iter()
            .filter(|(p, _)| pkgs.contains(p))
            .map(|(p, r)| (p.clone(), r.clone()))
            .collect())
    }

    async fn nvtake(&self, pkgs: &[Pkgbase]) -> Result<(), CheckError> {
        self.nvtaken.lock().unwrap().extend(pkgs.iter().cloned());
        Ok(())
    }
}

/// Serves canned outcomes keyed by pkgbase; defaults to `Successful` for
/// any package without a configured outcome.
#[derive(Default)]
pub struct FakeBuilder {
    pub outcomes: Mutex<HashMap<Pkgbase, BuildOutcome>>,
    pub calls: Mutex<Vec<(Pkgbase, u32)>>,
}

#[async_trait]
impl PackageBuilder for FakeBuilder {
    async fn build(&self, pkgbase: &Pkgbase, worker_id: u32) -> BuildOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((pkgbase.clone(), worker_id));

        self.outcomes
            .lock()
            .unwrap()
            .remove(pkgbase)
            .unwrap_or(BuildOutcome::Successful {
                version: "1.0-1".to_string(),
                elapsed: std::time::Duration::from_millis(1),
                usage: None,
            })
    }
}

/// A fixed commit range with a canned changed-files list and pkgrel-change
/// set, independent of any real git repository.
#[derive(Default)]
pub struct FakeSourceControl {
    pub branch: String,
    pub head: String,
    pub changed_files: Vec<std::path::PathBuf>,
    pub pkgrel_changed: std::collections::HashSet<Pkgbase>,
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    fn current_branch(&self) -> Result<String, GitSyncError> {
        Ok(self.branch.clone())
    }

    fn head_commit(&self) -> Result<CommitHash, GitSyncError> {
        Ok(CommitHash::from(self.head.clone()))
    }

    async fn reset_hard(&self, _commit: &CommitHash) -> Result<(), GitSyncError> {
        Ok(())
    }

    async fn pull(&self) -> Result<CommitHash, GitSyncError> {
        Ok(CommitHash::from(self.head.clone()))
    }

    async fn push(&self) -> Result<(), GitSyncError> {
        Ok(())
    }

    fn changed_files(
        &self,
        _from: &CommitHash,
        _to: &CommitHash,
    ) -> Result<Vec<std::path::PathBuf>, GitSyncError> {
        Ok(self.changed_files.clone())
    }

    fn package_release_changed(
        &self,
        _from: &CommitHash,
        _to: &CommitHash,
        pkgbase: &Pkgbase,
    ) -> Result<bool, GitSyncError> {
        Ok(self.pkgrel_changed.contains(pkgbase))
    }
}

/// In-memory [`Database`] for tests that need `last_success`/
/// `is_last_build_failed` to actually vary.
#[derive(Default)]
pub struct FakeDatabase {
    pub last_success: Mutex<HashMap<(Pkgbase, usize), time::OffsetDateTime>>,
    pub last_build_failed: Mutex<std::collections::HashSet<Pkgbase>>,
}

#[async_trait]
impl Database for FakeDatabase {
    async fn last_success(
        &self,
        pkgbase: &Pkgbase,
        source_index: usize,
    ) -> Result<Option<time::OffsetDateTime>, DbError> {
        Ok(self
            .last_success
            .lock()
            .unwrap()
            .get(&(pkgbase.clone(), source_index))
            .copied())
    }

    async fn is_last_build_failed(&self, pkgbase: &Pkgbase) -> Result<bool, DbError> {
        Ok(self.last_build_failed.lock().unwrap().contains(pkgbase))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_log(
        &self,
        _pkgbase: &Pkgbase,
        _outcome_kind: &str,
        _nv_version: Option<&str>,
        _pkg_version: Option<&str>,
        _elapsed: std::time::Duration,
        _usage: Option<&crate::outcome::ResourceUsage>,
        _reasons: &str,
        _message: Option<&str>,
    ) -> Result<(), DbError> {
        Ok(())
    }

    async fn set_status(
        &self,
        pkgbase: &Pkgbase,
        source_index: Option<usize>,
        succeeded: bool,
    ) -> Result<(), DbError> {
        if succeeded {
            if let Some(source_index) = source_index {
                self.last_success
                    .lock()
                    .unwrap()
                    .insert((pkgbase.clone(), source_index), time::OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }
}
