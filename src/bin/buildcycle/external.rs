//! Minimal production stand-ins for the three collaborators that §1/§4.8
//! describe as pure trait boundaries with no "real" body in the library:
//! recipe loading, upstream checking, and the sandboxed package builder
//! are genuinely external systems this crate does not implement.
//!
//! These adapters let the `buildcycle` binary actually run end to end —
//! a directory listing standing in for recipe parsing, a no-op standing
//! in for network upstream checks, and a single configured subprocess
//! standing in for the sandboxed builder — the same "shell out to an
//! external command" idiom `cycle::run_hooks` already uses for
//! `misc.prerun`/`misc.postrun`. A real deployment replaces these with
//! implementations backed by actual recipe parsing, `nvchecker`, and a
//! real build sandbox.

use std::{collections::HashMap, path::PathBuf, time::Instant};

use async_trait::async_trait;
use buildcycle::{
    Pkgbase,
    outcome::{BuildError, BuildOutcome},
    recipe::{CatalogError, CheckError, NvResult, PackageBuilder, Recipe, RecipeCatalog, UpstreamChecker},
};

/// Lists `mydir`'s immediate subdirectories as managed packages, with no
/// dependencies and no upstream sources. Real recipe parsing (PKGBUILD,
/// `.SRCINFO`) is out of scope (§1 Non-goals); this only discovers which
/// packages exist.
pub struct DirectoryRecipeCatalog {
    mydir: PathBuf,
}

impl DirectoryRecipeCatalog {
    pub fn new(mydir: PathBuf) -> Self {
        DirectoryRecipeCatalog { mydir }
    }
}

#[async_trait]
impl RecipeCatalog for DirectoryRecipeCatalog {
    async fn load(&self) -> Result<HashMap<Pkgbase, Recipe>, CatalogError> {
        let entries = std::fs::read_dir(&self.mydir).map_err(|source| CatalogError::RecipeLoad {
            pkgbase: Pkgbase::from("<catalog>"),
            message: source.to_string(),
        })?;

        let mut recipes = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| CatalogError::RecipeLoad {
                pkgbase: Pkgbase::from("<catalog>"),
                message: source.to_string(),
            })?;

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_dir || name.starts_with('.') || name == "log" {
                continue;
            }

            recipes.insert(Pkgbase::from(name), Recipe::default());
        }

        Ok(recipes)
    }
}

/// Reports no upstream changes for every package. Executing real upstream
/// checks (`nvchecker` or equivalent) is out of scope (§1 Non-goals); a
/// deployment supplies its own [`UpstreamChecker`] to drive `NvChecker`
/// reasons for real.
pub struct NoopUpstreamChecker;

#[async_trait]
impl UpstreamChecker for NoopUpstreamChecker {
    async fn check(&self, _pkgs: &[Pkgbase]) -> Result<HashMap<Pkgbase, NvResult>, CheckError> {
        Ok(HashMap::new())
    }

    async fn nvtake(&self, _pkgs: &[Pkgbase]) -> Result<(), CheckError> {
        Ok(())
    }
}

/// Builds one package by shelling out to a single configured command with
/// `pkgbase` appended as the final argument, the worker id passed through
/// an environment variable the sandbox may use to pick a slot (§4.4
/// "Thread-pool worker identity"). Performing the actual sandboxed build
/// is out of scope (§1 Non-goals); this only drives whatever external
/// build command the deployment configures.
pub struct ProcessPackageBuilder {
    command: Vec<String>,
    mydir: PathBuf,
}

impl ProcessPackageBuilder {
    pub fn new(command: Vec<String>, mydir: PathBuf) -> Self {
        ProcessPackageBuilder { command, mydir }
    }
}

#[async_trait]
impl PackageBuilder for ProcessPackageBuilder {
    async fn build(&self, pkgbase: &Pkgbase, worker_id: u32) -> BuildOutcome {
        let start = Instant::now();

        let Some((program, rest)) = self.command.split_first() else {
            return BuildOutcome::Failed {
                error: BuildError::Exception {
                    message: "no build command configured".to_string(),
                    log_file: None,
                },
                elapsed: start.elapsed(),
                usage: None,
            };
        };

        let status = tokio::process::Command::new(program)
            .args(rest)
            .arg(pkgbase.as_ref())
            .env("BUILDCYCLE_WORKER_ID", worker_id.to_string())
            .current_dir(&self.mydir)
            .status()
            .await;

        let elapsed = start.elapsed();
        match status {
            Ok(status) if status.success() => BuildOutcome::Successful {
                version: "unknown".to_string(),
                elapsed,
                usage: None,
            },
            Ok(status) => BuildOutcome::Failed {
                error: BuildError::Exception {
                    message: format!("build command exited with {status}"),
                    log_file: None,
                },
                elapsed,
                usage: None,
            },
            Err(source) => BuildOutcome::Failed {
                error: BuildError::Exception {
                    message: format!("failed to spawn build command: {source}"),
                    log_file: None,
                },
                elapsed,
                usage: None,
            },
        }
    }
}
