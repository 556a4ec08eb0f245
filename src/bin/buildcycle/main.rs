//! Process entry point (§6 "Invocation"). Wires the Cycle Driver (C7) to
//! one concrete implementation of every collaborator: the bundled
//! [`Git2SourceControl`], [`SqliteDatabase`]/[`NullDatabase`], and
//! [`TracingNotificationSink`] for the three collaborators this crate
//! actually ships, and the minimal [`external`] adapters for the three
//! that §1/§4.8 leave as pure trait boundaries.
//!
//! Grounded on the teacher's `#[tokio::main] async fn main() -> Result<()>`
//! binaries, which call `color_eyre::install()` and a shared
//! `tracing::init` before doing any real work.

mod args;
mod external;

use std::sync::Arc;

use buildcycle::{
    Pkgbase,
    config::Config,
    cycle::{Collaborators, CycleDriver},
    db::{Database, NullDatabase, SqliteDatabase},
    git_sync::Git2SourceControl,
    notify::TracingNotificationSink,
    recipe::PackageBuilder,
    tracing as buildcycle_tracing,
};
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};

use crate::{
    args::Args,
    external::{DirectoryRecipeCatalog, NoopUpstreamChecker, ProcessPackageBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    buildcycle_tracing::init(args.verbose, args.tokio_console);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.mydir.join("config.toml"));
    let config = Config::load(&config_path)
        .wrap_err_with(|| format!("loading config from {}", config_path.display()))?;

    let source_control = Git2SourceControl::new(args.mydir.clone());

    let database: Box<dyn Database> = match &config.lilac.dburl {
        Some(url) => Box::new(
            SqliteDatabase::connect(url)
                .await
                .wrap_err("connecting to lilac.dburl")?,
        ),
        None => Box::new(NullDatabase),
    };

    let catalog = DirectoryRecipeCatalog::new(args.mydir.clone());
    let upstream_checker = NoopUpstreamChecker;
    let notifier = TracingNotificationSink;

    let build_command = std::env::var("BUILDCYCLE_BUILD_CMD")
        .map(|cmd| cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .unwrap_or_else(|_| vec!["pkgctl".to_string(), "build".to_string()]);
    let builder: Arc<dyn PackageBuilder> =
        Arc::new(ProcessPackageBuilder::new(build_command, args.mydir.clone()));

    let collaborators = Collaborators {
        source_control: &source_control,
        database: database.as_ref(),
        catalog: &catalog,
        upstream_checker: &upstream_checker,
        builder,
        notifier: &notifier,
    };

    let cmdline_packages: Vec<Pkgbase> = args.packages.iter().cloned().map(Pkgbase::from).collect();

    let driver = CycleDriver::new(args.mydir.clone(), config, collaborators);
    driver.run_cycle(cmdline_packages).await
}
