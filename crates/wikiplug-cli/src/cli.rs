//! CLI argument definitions for wikiplug.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// wikiplug -- sandboxed wikitext transformation plugins.
#[derive(Debug, Parser)]
#[command(
    name = "wikiplug",
    version,
    about = "wikiplug -- run sandboxed Lua and WebAssembly plugins over wikitext",
    long_about = "Loads user plugins from a directory and applies them, in file-name order, \
                  to a page of wikitext under strict time, memory and CPU limits."
)]
pub struct Cli {
    /// Settings file (TOML).  Missing keys fall back to built-in defaults.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Directory to load plugins from.  Overrides `plugin_dir` in settings.
    #[arg(long, short = 'd', global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` is set.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Sandbox limit overrides.
#[derive(Debug, Default, Args)]
pub struct LimitArgs {
    /// Wall-clock limit per plugin call, in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Memory ceiling per plugin call, in bytes.
    #[arg(long, global = true)]
    pub memory_limit: Option<usize>,

    /// Lua instruction ceiling (0 = governed only by the timeout).
    #[arg(long, global = true)]
    pub instruction_limit: Option<u64>,

    /// WebAssembly fuel per plugin call.
    #[arg(long, global = true)]
    pub computation_budget: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the plugins found in the plugin directory.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Apply the enabled plugins to a page.
    Apply {
        /// Input file.  Reads stdin when omitted.
        input: Option<PathBuf>,

        /// Write the result here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Run only this plugin and fail on its error.
        #[arg(long)]
        only: Option<String>,

        /// Page title passed to the fix pipeline.
        #[arg(long, default_value = "")]
        title: String,
    },
}
