//! Pipeline adapter.
//!
//! [`PluginFixModule`] exposes a whole [`PluginManager`] as one
//! [`FixModule`] step.  Plugin failures become
//! [`Warning::PluginFailed`] entries in the host's [`Diagnostics`]; they never
//! stop the surrounding pipeline.

use std::borrow::Cow;
use std::path::Path;

use wikiplug_fixes::{Diagnostics, FixContext, FixModule, Warning};

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::loader::DirectoryLoad;
use crate::manager::PluginManager;

/// Runs every enabled user plugin as a single fix step.
#[derive(Debug, Default)]
pub struct PluginFixModule {
    manager: PluginManager,
}

impl PluginFixModule {
    /// Wrap an existing manager.
    pub fn new(manager: PluginManager) -> Self {
        Self { manager }
    }

    /// Load every plugin in `dir` under `config` and wrap the result.
    pub fn from_directory(dir: &Path, config: SandboxConfig) -> Result<(Self, DirectoryLoad)> {
        let mut manager = PluginManager::with_config(config);
        let report = manager.load_from_directory(dir)?;
        Ok((Self::new(manager), report))
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Mutable access to the wrapped manager, e.g. to toggle plugins.
    pub fn manager_mut(&mut self) -> &mut PluginManager {
        &mut self.manager
    }
}

impl FixModule for PluginFixModule {
    fn id(&self) -> &str {
        "plugins"
    }

    fn display_name(&self) -> &str {
        "User Plugins"
    }

    fn category(&self) -> &str {
        "Plugins"
    }

    fn description(&self) -> &str {
        "User-defined plugins (Lua and WASM)"
    }

    fn apply<'a>(
        &self,
        text: &'a str,
        context: &FixContext,
        diagnostics: &mut Diagnostics,
    ) -> Cow<'a, str> {
        let result = self.manager.apply_all(text);
        tracing::debug!(
            title = %context.title,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "user plugins applied"
        );

        diagnostics.extend(result.failed.iter().map(|failure| Warning::PluginFailed {
            plugin: failure.plugin.clone(),
            kind: failure.error.kind().to_string(),
            message: failure.error.detail(),
        }));

        if result.text == text {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(result.text)
        }
    }
}
