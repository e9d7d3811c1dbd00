//! Plugin manager.
//!
//! [`PluginManager`] owns the ordered plugin collection, the enabled flags and
//! the sequencing algorithm that folds every enabled plugin's `transform` into
//! one result.  A failing plugin never aborts [`PluginManager::apply_all`]: its
//! output is discarded, its input passes through to the next plugin, and the
//! failure is recorded in the [`AggregateResult`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use crate::compiled::{CompiledPlugin, WasmEngine};
use crate::config::SandboxConfig;
use crate::error::{PluginError, Result};
use crate::loader::{self, DirectoryLoad, SkippedPlugin};
use crate::plugin::{Plugin, PluginInfo, PluginKind};
use crate::scripted::ScriptedPlugin;

/// Lifecycle of a manager's plugin collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Nothing has been registered yet.
    Empty,
    /// A directory load is in progress.
    Loading,
    /// At least one registration has completed.
    Ready,
}

/// A plugin that failed during [`PluginManager::apply_all`].
#[derive(Debug)]
pub struct PluginFailure {
    /// Name of the plugin.
    pub plugin: String,
    /// What went wrong.
    pub error: PluginError,
}

/// Outcome of running every enabled plugin in sequence.
#[derive(Debug)]
pub struct AggregateResult {
    /// Text after the last enabled plugin.
    pub text: String,
    /// Plugins that returned text, in invocation order.
    pub succeeded: Vec<String>,
    /// Plugins whose output was discarded, in invocation order.
    pub failed: Vec<PluginFailure>,
}

impl AggregateResult {
    /// Names of the failed plugins, in invocation order.
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.plugin.as_str()).collect()
    }

    /// Returns `true` if no plugin failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Entry {
    plugin: Box<dyn Plugin>,
    enabled: bool,
}

/// Ordered collection of plugins with per-plugin enable flags.
///
/// `apply_all` and `apply_plugin` take `&self`, and every runtime builds its
/// guest context per call, so an `Arc<PluginManager>` can serve several
/// threads at once.
pub struct PluginManager {
    entries: Vec<Entry>,
    config: SandboxConfig,
    engine: Option<Arc<WasmEngine>>,
    state: ManagerState,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_names())
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl PluginManager {
    /// Create an empty manager that loads plugins under the default governor.
    pub fn new() -> Self {
        Self::with_config(SandboxConfig::default())
    }

    /// Create an empty manager that loads plugins under `config`.
    pub fn with_config(config: SandboxConfig) -> Self {
        Self {
            entries: Vec::new(),
            config,
            engine: None,
            state: ManagerState::Empty,
        }
    }

    /// The governor applied to plugins loaded from disk.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        self.state
    }

    // -- loading --------------------------------------------------------------

    /// Load every `.lua` and `.wasm` file in `dir`, in sorted file-name order.
    ///
    /// Files that fail to load are skipped and listed in the report.  A name
    /// that is already registered aborts the load with
    /// [`PluginError::LoadFailed`]; plugins registered before it stay.
    pub fn load_from_directory(&mut self, dir: &Path) -> Result<DirectoryLoad> {
        let files = loader::discover(dir)?;
        let previous = self.state;
        self.state = ManagerState::Loading;

        let mut report = DirectoryLoad::default();
        for file in files {
            let loaded = match file.kind {
                PluginKind::Scripted => self.open_scripted(&file.path),
                PluginKind::Compiled => self.open_compiled(&file.path),
            };
            let plugin = match loaded {
                Ok(plugin) => plugin,
                Err(err) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        error = %err,
                        "failed to load plugin, skipping"
                    );
                    report.skipped.push(SkippedPlugin {
                        path: file.path,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            match self.register(plugin, Some(&file.path)) {
                Ok(name) => report.loaded.push(name),
                Err(err) => {
                    self.settle(previous);
                    return Err(err);
                }
            }
        }

        self.settle(previous);
        tracing::info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "plugin directory loaded"
        );
        Ok(report)
    }

    /// Load one Lua plugin and return its registration name.
    pub fn load_scripted_plugin(&mut self, path: &Path) -> Result<String> {
        let plugin = self.open_scripted(path)?;
        self.register(plugin, Some(path))
    }

    /// Load one WebAssembly plugin and return its registration name.
    pub fn load_compiled_plugin(&mut self, path: &Path) -> Result<String> {
        let plugin = self.open_compiled(path)?;
        self.register(plugin, Some(path))
    }

    /// Register any [`Plugin`] implementation.  It starts enabled.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        self.register(plugin, None).map(|_| ())
    }

    /// Remove a plugin and hand it back.
    pub fn unload(&mut self, name: &str) -> Result<Box<dyn Plugin>> {
        let index = self.position(name)?;
        let entry = self.entries.remove(index);
        tracing::info!(plugin = %name, "plugin unloaded");
        Ok(entry.plugin)
    }

    fn open_scripted(&self, path: &Path) -> Result<Box<dyn Plugin>> {
        let plugin = ScriptedPlugin::from_file_with_config(path, self.config.clone())?;
        Ok(Box::new(plugin))
    }

    fn open_compiled(&mut self, path: &Path) -> Result<Box<dyn Plugin>> {
        let engine = self.engine()?;
        let plugin = CompiledPlugin::from_file_with_config(path, engine, self.config.clone())?;
        Ok(Box::new(plugin))
    }

    fn engine(&mut self) -> Result<Arc<WasmEngine>> {
        if let Some(engine) = &self.engine {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(WasmEngine::new()?);
        self.engine = Some(Arc::clone(&engine));
        Ok(engine)
    }

    fn register(&mut self, plugin: Box<dyn Plugin>, source: Option<&Path>) -> Result<String> {
        let name = plugin.name().to_owned();
        if self.entries.iter().any(|e| e.plugin.name() == name) {
            let reason = match source {
                Some(path) => format!(
                    "{} declares a name that is already registered",
                    path.display()
                ),
                None => "a plugin with this name is already registered".to_owned(),
            };
            return Err(PluginError::load_failed(&name, reason));
        }

        tracing::info!(plugin = %name, kind = %plugin.kind(), "plugin registered");
        self.entries.push(Entry {
            plugin,
            enabled: true,
        });
        if self.state == ManagerState::Empty {
            self.state = ManagerState::Ready;
        }
        Ok(name)
    }

    /// Leave the `Loading` state.
    fn settle(&mut self, previous: ManagerState) {
        self.state = if previous == ManagerState::Ready || !self.entries.is_empty() {
            ManagerState::Ready
        } else {
            ManagerState::Empty
        };
    }

    // -- enable / disable -----------------------------------------------------

    /// Enable a plugin.  Idempotent.
    pub fn enable(&mut self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    /// Disable a plugin without unloading it.  Idempotent.
    pub fn disable(&mut self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    /// Whether `apply_all` will run the plugin.
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.entries[self.position(name)?].enabled)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let index = self.position(name)?;
        let entry = &mut self.entries[index];
        if entry.enabled != enabled {
            entry.enabled = enabled;
            tracing::info!(plugin = %name, enabled, "plugin toggled");
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.plugin.name() == name)
            .ok_or_else(|| PluginError::not_found(name))
    }

    // -- queries --------------------------------------------------------------

    /// Number of registered plugins.
    pub fn plugin_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of enabled plugins.
    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| e.enabled).count()
    }

    /// Registered names in registration order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.plugin.name()).collect()
    }

    /// Snapshot of every plugin in registration order.
    pub fn plugin_info(&self) -> Vec<PluginInfo> {
        self.entries
            .iter()
            .map(|e| PluginInfo {
                name: e.plugin.name().to_owned(),
                description: e.plugin.description().to_owned(),
                kind: e.plugin.kind(),
                enabled: e.enabled,
            })
            .collect()
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.entries
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.plugin.as_ref())
    }

    // -- application ----------------------------------------------------------

    /// Feed `text` through every enabled plugin in registration order.
    pub fn apply_all(&self, text: &str) -> AggregateResult {
        let mut current = text.to_owned();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for entry in self.entries.iter().filter(|e| e.enabled) {
            let name = entry.plugin.name();
            match invoke(entry.plugin.as_ref(), &current) {
                Ok(next) => {
                    if next != current {
                        tracing::debug!(plugin = %name, "plugin modified text");
                    }
                    current = next;
                    succeeded.push(name.to_owned());
                }
                Err(error) => {
                    tracing::warn!(plugin = %name, error = %error, "plugin failed, skipping");
                    failed.push(PluginFailure {
                        plugin: name.to_owned(),
                        error,
                    });
                }
            }
        }

        AggregateResult {
            text: current,
            succeeded,
            failed,
        }
    }

    /// Run a single plugin and surface its error directly.
    ///
    /// A disabled plugin is not invoked and the input is returned unchanged.
    pub fn apply_plugin(&self, name: &str, text: &str) -> Result<String> {
        let entry = &self.entries[self.position(name)?];
        if !entry.enabled {
            tracing::debug!(plugin = %name, "plugin disabled, returning input");
            return Ok(text.to_owned());
        }
        invoke(entry.plugin.as_ref(), text)
    }
}

/// Call `transform`, turning a panic into an execution failure.
fn invoke(plugin: &dyn Plugin, text: &str) -> Result<String> {
    catch_unwind(AssertUnwindSafe(|| plugin.transform(text))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Err(PluginError::execution_failed(
            plugin.name(),
            format!("plugin panicked: {message}"),
        ))
    })
}
