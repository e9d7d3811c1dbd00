//! CLI entry point for wikiplug.
//!
//! This binary provides the `wikiplug` command with subcommands for listing
//! the plugins in a directory and applying them to a page of wikitext.

mod cli;
mod settings;

use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wikiplug_fixes::{FixContext, FixPipeline};
use wikiplug_sandbox::{PluginFixModule, PluginManager, wikitext};

use crate::cli::{Cli, Commands};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(default_level(cli.verbose));

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match &cli.command {
        Commands::List { json } => cmd_list(&cli_manager(&cli, &settings)?, *json),
        Commands::Apply {
            input,
            output,
            only,
            title,
        } => {
            let manager = cli_manager(&cli, &settings)?;
            let text = read_input(input.as_deref())?;
            let result = match only {
                Some(name) => manager
                    .apply_plugin(name, &text)
                    .with_context(|| format!("plugin `{name}` failed"))?,
                None => cmd_apply(manager, &text, title),
            };
            write_output(output.as_deref(), &result)
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Load the plugin directory under the merged sandbox limits and apply the
/// `disabled` list from settings.
fn cli_manager(cli: &Cli, settings: &Settings) -> Result<PluginManager> {
    let config = settings
        .sandbox
        .clone()
        .merge(&cli.limits)
        .to_config()
        .context("invalid sandbox limits")?;
    let dir = settings.plugin_dir(cli.plugin_dir.as_deref());

    let mut manager = PluginManager::with_config(config);
    debug!(limits = ?manager.config(), "sandbox limits");
    let report = manager
        .load_from_directory(&dir)
        .with_context(|| format!("failed to load plugins from {}", dir.display()))?;
    for skipped in &report.skipped {
        eprintln!("skipped {}: {}", skipped.path.display(), skipped.error);
    }

    for name in &settings.disabled {
        if let Err(e) = manager.disable(name) {
            warn!(plugin = %name, error = %e, "cannot disable plugin");
        }
    }
    Ok(manager)
}

// ---------------------------------------------------------------------------
// Subcommand: list
// ---------------------------------------------------------------------------

fn cmd_list(manager: &PluginManager, json: bool) -> Result<()> {
    let plugins = manager.plugin_info();
    let mut stdout = io::stdout().lock();

    if json {
        serde_json::to_writer_pretty(&mut stdout, &plugins)
            .context("failed to serialise plugin list")?;
        writeln!(stdout)?;
        return Ok(());
    }

    if plugins.is_empty() {
        writeln!(stdout, "no plugins loaded")?;
        return Ok(());
    }
    for plugin in &plugins {
        let state = if plugin.enabled { "on" } else { "off" };
        writeln!(
            stdout,
            "{:<24} {:<8} {:<3} {}",
            plugin.name,
            plugin.kind.to_string(),
            state,
            plugin.description
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: apply
// ---------------------------------------------------------------------------

/// Run the plugins as one fix pipeline step and report failures on stderr.
fn cmd_apply(manager: PluginManager, text: &str, title: &str) -> String {
    let title = if title.is_empty() {
        wikitext::title(text).unwrap_or_default().to_owned()
    } else {
        title.to_owned()
    };
    let context = FixContext::new(title).with_redirect(wikitext::is_redirect(text));

    let mut pipeline = FixPipeline::new();
    pipeline.register(Box::new(PluginFixModule::new(manager)));
    let report = pipeline.apply(text, &context);

    for warning in report.diagnostics.warnings() {
        eprintln!("warning: {warning}");
    }
    info!(changed = report.changed(), "apply finished");
    report.text
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Level used when `RUST_LOG` is unset.
fn default_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Initialize the tracing subscriber with the given default level.
///
/// Logs go to stderr so that stdout carries only the transformed page.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}
