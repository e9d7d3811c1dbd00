//! Settings file.
//!
//! ```toml
//! plugin_dir = "plugins"
//! disabled = ["noisy_plugin"]
//!
//! [sandbox]
//! timeout_ms = 5000
//! memory_limit = 1048576
//! instruction_limit = 1000000   # 0 = governed only by the timeout
//! computation_budget = 10000000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use wikiplug_sandbox::SandboxConfig;

use crate::cli::LimitArgs;

/// Directory used when neither the settings file nor the command line
/// names one.
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// Contents of the settings file.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory to load plugins from.
    pub plugin_dir: Option<PathBuf>,
    /// Plugins to disable after loading.
    pub disabled: Vec<String>,
    /// Sandbox limits.
    pub sandbox: SandboxSettings,
}

/// The `[sandbox]` table.  Absent keys keep the built-in default.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    pub timeout_ms: Option<u64>,
    pub memory_limit: Option<usize>,
    pub instruction_limit: Option<u64>,
    pub computation_budget: Option<u64>,
}

impl Settings {
    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The plugin directory, preferring `cli_dir` when given.
    pub fn plugin_dir(&self, cli_dir: Option<&Path>) -> PathBuf {
        cli_dir
            .map(Path::to_path_buf)
            .or_else(|| self.plugin_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLUGIN_DIR))
    }
}

impl SandboxSettings {
    /// Overlay command-line overrides onto the file values.
    pub fn merge(mut self, args: &LimitArgs) -> Self {
        self.timeout_ms = args.timeout_ms.or(self.timeout_ms);
        self.memory_limit = args.memory_limit.or(self.memory_limit);
        self.instruction_limit = args.instruction_limit.or(self.instruction_limit);
        self.computation_budget = args.computation_budget.or(self.computation_budget);
        self
    }

    /// Build a validated [`SandboxConfig`].
    pub fn to_config(&self) -> Result<SandboxConfig> {
        let mut config = SandboxConfig::default();
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(bytes) = self.memory_limit {
            config = config.with_memory_limit(bytes);
        }
        if let Some(limit) = self.instruction_limit {
            config = config.with_instruction_limit((limit > 0).then_some(limit));
        }
        if let Some(fuel) = self.computation_budget {
            config = config.with_computation_budget(fuel);
        }
        config.validate()?;
        Ok(config)
    }
}
