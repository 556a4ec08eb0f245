//! External collaborators referenced only by interface (§1, §4.8):
//! recipe loader, upstream version checker, package builder.
//!
//! None of these are implemented for real here — parsing recipes,
//! executing upstream checks, and building packages in a sandbox are
//! all out of scope. Tests exercise the kernel against the fakes in
//! [`crate::testutil`].

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{Pkgbase, outcome::BuildOutcome};

#[async_trait]
pub trait RecipeCatalog: Send + Sync {
    async fn load(&self) -> Result<HashMap<Pkgbase, Recipe>, CatalogError>;
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to load recipe for {pkgbase}: {message}")]
    RecipeLoad { pkgbase: Pkgbase, message: String },
}

/// A package recipe, opaque to the core beyond the fields it declares.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    pub dependencies: Vec<Dependency>,
    pub upstream_sources: Vec<UpstreamSource>,
    /// Per-source-index throttle interval (§4.1 step 3).
    pub throttle: HashMap<usize, Duration>,
}

/// One upstream version source declared by a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSource {
    pub name: String,
}

/// A reference to another package's artifact (§3). `resolve()` is a pure
/// filesystem check: referentially transparent for the duration of one
/// `get_ready()` call, re-queried between calls.
#[derive(Clone)]
pub struct Dependency {
    pub target: Pkgbase,
    pub name: String,
    resolver: std::sync::Arc<dyn Fn() -> bool + Send + Sync>,
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("target", &self.target)
            .field("name", &self.name)
            .finish()
    }
}

impl Dependency {
    pub fn new(
        target: impl Into<Pkgbase>,
        name: impl Into<String>,
        resolver: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Dependency {
            target: target.into(),
            name: name.into(),
            resolver: std::sync::Arc::new(resolver),
        }
    }

    /// Always-resolved dependency, for tests and for recipes that only
    /// depend on packages already on disk.
    pub fn always_resolved(target: impl Into<Pkgbase>, name: impl Into<String>) -> Self {
        Self::new(target, name, || true)
    }

    /// Never-resolved dependency: the artifact does not exist on disk yet.
    pub fn unresolved(target: impl Into<Pkgbase>, name: impl Into<String>) -> Self {
        Self::new(target, name, || false)
    }

    pub fn resolve(&self) -> bool {
        (self.resolver)()
    }

    pub fn is_internal(&self, managed: &std::collections::HashSet<Pkgbase>) -> bool {
        managed.contains(&self.target)
    }
}

/// One `(source_index, old_index, old_version, new_version, source_name)`
/// change reported by the upstream checker (§4.1 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvChange {
    pub source_index: usize,
    pub old_index: usize,
    pub old_version: Option<String>,
    pub new_version: String,
    pub source_name: String,
}

/// Per-package upstream-check result: the list of sources whose version
/// changed (old ≠ new) this cycle.
#[derive(Debug, Clone, Default)]
pub struct NvResult {
    pub changes: Vec<NvChange>,
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("upstream check failed for {pkgbase}: {message}")]
    Failed { pkgbase: Pkgbase, message: String },
}

#[async_trait]
pub trait UpstreamChecker: Send + Sync {
    async fn check(&self, pkgs: &[Pkgbase]) -> Result<HashMap<Pkgbase, NvResult>, CheckError>;

    /// Commits the currently-observed upstream version as the baseline for
    /// future change detection (§4.7 step 12, GLOSSARY "nvtake").
    async fn nvtake(&self, pkgs: &[Pkgbase]) -> Result<(), CheckError>;
}

#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn build(&self, pkgbase: &Pkgbase, worker_id: u32) -> BuildOutcome;
}
