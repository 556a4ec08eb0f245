//! Cycle Driver (C7, §4.7): wires every other component together for one
//! end-to-end invocation, running pre/post hooks, source-control sync,
//! and version-take policy around the scheduling core.
//!
//! Grounded on the teacher's `src/bin/server/tasks.rs`
//! (`update_and_build_all_namespaces_in_loop`,
//! `schedule_next_build_if_needed`), which strings together git sync,
//! graph recomputation, and scheduling in one driving loop. GitLab
//! pipeline polling and the periodic `tokio::time::sleep` loop are
//! dropped: this driver runs exactly one cycle per invocation.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use camino::Utf8PathBuf;
use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use tracing::{error, info, warn};

use crate::{
    CommitHash, Pkgbase,
    config::Config,
    cycle_state::{CycleState, FailedEntry},
    db::Database,
    dep_graph::build_dependency_graph,
    git_sync::SourceControl,
    lock::CycleLock,
    notify::{NotificationSink, Report},
    reason::{BuildReason, ReasonCollector},
    recipe::{PackageBuilder, RecipeCatalog, UpstreamChecker},
    result_handler::ResultHandler,
    sorter::PriorityTopoSorter,
    worker_pool::WorkerPool,
};

/// The external collaborators a cycle needs (§1). Grouped so
/// [`CycleDriver::new`] doesn't take an unwieldy parameter list.
pub struct Collaborators<'a> {
    pub source_control: &'a dyn SourceControl,
    pub database: &'a dyn Database,
    pub catalog: &'a dyn RecipeCatalog,
    pub upstream_checker: &'a dyn UpstreamChecker,
    pub builder: Arc<dyn PackageBuilder>,
    pub notifier: &'a dyn NotificationSink,
}

pub struct CycleDriver<'a> {
    mydir: PathBuf,
    config: Config,
    collaborators: Collaborators<'a>,
}

impl<'a> CycleDriver<'a> {
    pub fn new(mydir: PathBuf, config: Config, collaborators: Collaborators<'a>) -> Self {
        CycleDriver {
            mydir,
            config,
            collaborators,
        }
    }

    fn store_path(&self) -> PathBuf {
        self.mydir.join("store")
    }

    /// Runs one cycle (§4.7). Always returns `Ok` once the finally block
    /// (steps 11–14) has run; scheduling-layer exceptions from step 9 are
    /// logged and reported rather than aborting the finally block.
    pub async fn run_cycle(&self, cmdline_packages: Vec<Pkgbase>) -> Result<()> {
        let _lock = CycleLock::acquire(&self.mydir).wrap_err("acquiring cycle lock")?;

        let branch = self
            .collaborators
            .source_control
            .current_branch()
            .wrap_err("reading current branch")?;
        if branch != "master" && branch != "main" {
            bail!("refusing to run on branch {branch}, expected master or main");
        }

        run_hooks(&self.config.misc.prerun, &self.config.envvars)
            .await
            .wrap_err("running pre-run hooks")?;

        let mut state = CycleState::load(&self.store_path()).wrap_err("loading cycle state")?;
        let last_commit = state
            .last_commit
            .clone()
            .map(CommitHash::from)
            .unwrap_or_else(|| {
                self.collaborators
                    .source_control
                    .head_commit()
                    .unwrap_or_else(|_| CommitHash::from(String::new()))
            });

        let head_commit = self
            .collaborators
            .source_control
            .pull()
            .await
            .wrap_err("syncing source repository")?;

        let core_outcome = self
            .run_core(&cmdline_packages, &last_commit, &head_commit, &mut state)
            .await;

        if let Err(ref e) = core_outcome {
            error!("cycle core failed: {e:?}");
            self.collaborators
                .notifier
                .notify(Report::driver_exception(format!("{e:?}")))
                .await
                .ok();
        }

        // Step 10: persist last_commit even on exception.
        state.last_commit = Some(head_commit.as_str().to_string());
        state
            .save(&self.store_path())
            .wrap_err("saving cycle state")?;

        // Step 13.
        self.collaborators
            .source_control
            .reset_hard(&head_commit)
            .await
            .wrap_err("resetting working tree after cycle")?;
        if self.config.lilac.git_push {
            self.collaborators
                .source_control
                .push()
                .await
                .wrap_err("pushing repository")?;
        }

        // Step 14.
        run_hooks(&self.config.misc.postrun, &self.config.envvars)
            .await
            .wrap_err("running post-run hooks")?;

        core_outcome
    }

    /// Steps 6–12: recipe load through version-take. Mutates `state` in
    /// place (step 11) so the caller can persist it unconditionally.
    async fn run_core(
        &self,
        cmdline_packages: &[Pkgbase],
        last_commit: &CommitHash,
        head_commit: &CommitHash,
        state: &mut CycleState,
    ) -> Result<()> {
        let recipes = match self.collaborators.catalog.load().await {
            Ok(recipes) => recipes,
            Err(e) => {
                self.collaborators
                    .notifier
                    .notify(Report::recipe_load_failed(
                        Pkgbase::from("<catalog>"),
                        e.to_string(),
                    ))
                    .await
                    .ok();
                HashMap::new()
            }
        };

        let previous_failed_info: HashMap<Pkgbase, Vec<Pkgbase>> = state
            .failed
            .iter()
            .map(|(p, entry)| (p.clone(), entry.missing.clone()))
            .collect();

        let collector =
            ReasonCollector::new(self.collaborators.source_control, self.collaborators.database);
        let collected = collector
            .collect(
                &recipes,
                &previous_failed_info,
                last_commit,
                head_commit,
                self.collaborators.upstream_checker,
                cmdline_packages,
            )
            .await
            .wrap_err("collecting build reasons")?;

        let mut build_reasons = collected.build_reasons;

        let dep_graph = build_dependency_graph(
            &recipes,
            &mut build_reasons,
            self.collaborators.database,
            self.collaborators.notifier,
        )
        .await;

        let mut sorter = PriorityTopoSorter::new(&dep_graph).map_err(|e| eyre!(e))?;

        let log_dir = self.cycle_log_dir();
        std::fs::create_dir_all(&log_dir).wrap_err("creating cycle log directory")?;
        let human_log = append_log_file(&self.mydir.join("build.log"))?;
        let json_log = append_log_file(&self.mydir.join("build-log.json"))?;

        let mut handler = ResultHandler::new(
            &recipes,
            &build_reasons,
            &collected.nvdata,
            self.collaborators.database,
            self.collaborators.notifier,
            human_log,
            json_log,
            self.mydir.join("staging"),
            self.config.repository.destdir.clone().map(|p| p.into_std_path_buf()),
        );

        let interrupted = Arc::new(AtomicBool::new(false));
        let interrupted_for_signal = Arc::clone(&interrupted);
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight builds and stopping");
                interrupted_for_signal.store(true, Ordering::SeqCst);
            }
        });

        let pool = WorkerPool::new(
            self.config.lilac.max_concurrency,
            Arc::clone(&self.collaborators.builder),
        );
        pool.run(&mut sorter, &build_reasons, &mut handler, || {
            interrupted.load(Ordering::SeqCst)
        })
        .await;
        signal_task.abort();

        info!(
            built = handler.built.len(),
            failed = handler.failed.len(),
            "cycle finished"
        );

        // Step 11: update failed_info.
        for (p, missing) in &handler.failed {
            state.failed.insert(
                p.clone(),
                FailedEntry {
                    missing: missing.clone(),
                    version: None,
                },
            );
        }
        for p in &handler.built {
            state.failed.remove(p);
        }
        if cmdline_packages.is_empty() {
            state.failed.retain(|p, _| recipes.contains_key(p));
        }

        // Step 12: version-take policy.
        let attempted: Vec<Pkgbase> = handler
            .built
            .iter()
            .chain(handler.failed.keys())
            .cloned()
            .collect();

        let nvtake_targets: Vec<Pkgbase> = if self.config.lilac.rebuild_failed_pkgs {
            handler.built.iter().cloned().collect()
        } else {
            build_reasons
                .iter()
                .filter(|(p, reasons)| {
                    attempted.contains(p)
                        && reasons.0.iter().any(|r| matches!(r, BuildReason::NvChecker(_)))
                })
                .map(|(p, _)| p.clone())
                .collect()
        };

        if !nvtake_targets.is_empty() {
            self.collaborators
                .upstream_checker
                .nvtake(&nvtake_targets)
                .await
                .wrap_err("advancing upstream version bookmarks")?;
        }

        Ok(())
    }

    fn cycle_log_dir(&self) -> Utf8PathBuf {
        let timestamp = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown-time".to_string())
            .replace(':', "-");
        Utf8PathBuf::from_path_buf(self.mydir.join("log").join(timestamp))
            .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()))
    }
}

fn append_log_file(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("opening log file {}", path.display()))
}

/// Runs each configured hook argv in sequence, injecting `envvars` (§6
/// `misc.prerun`/`misc.postrun`). Each must exit zero.
async fn run_hooks(hooks: &[Vec<String>], envvars: &HashMap<String, String>) -> Result<()> {
    for argv in hooks {
        let Some((program, args)) = argv.split_first() else {
            continue;
        };

        let status = tokio::process::Command::new(program)
            .args(args)
            .envs(envvars)
            .status()
            .await
            .wrap_err_with(|| format!("spawning hook {program}"))?;

        if !status.success() {
            bail!("hook {program} exited with {status}");
        }
    }
    Ok(())
}
