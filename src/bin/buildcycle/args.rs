//! CLI surface (§6 "CLI surface (added)"). Follows the teacher's
//! per-binary `args.rs` convention: a single `clap::Parser` struct with
//! `#[command(author, version, about)]`.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rolling-release package-build orchestrator")]
pub struct Args {
    /// Path to the repository this cycle operates on. Recipes, the
    /// `.lock` file, `store`, and the log directories all live relative
    /// to this directory unless overridden.
    #[arg(long, env = "BUILDCYCLE_MYDIR", default_value = ".")]
    pub mydir: PathBuf,

    /// Path to the TOML configuration file (§6). Defaults to
    /// `<mydir>/config.toml`.
    #[arg(long, env = "BUILDCYCLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity; may be repeated (-v, -vv, -vvv...).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Enable the tokio-console subscriber, if built with
    /// `--cfg tokio_unstable`.
    #[arg(long)]
    pub tokio_console: bool,

    /// Packages to force-build this cycle. When empty, the full managed
    /// set is considered (§6 "Invocation").
    pub packages: Vec<String>,
}
