//! wikiplug plugin sandbox.
//!
//! Loads user-supplied text-transformation plugins, runs them under strict
//! resource limits and composes their outputs into one deterministic
//! pipeline.
//!
//! - **[`config`]** -- [`SandboxConfig`], the per-invocation resource governor.
//! - **[`error`]** -- [`PluginError`] enumerates every failure mode.
//! - **[`plugin`]** -- the [`Plugin`] trait both runtimes implement.
//! - **[`scripted`]** -- [`ScriptedPlugin`], Lua guests with the [`mw`] helpers.
//! - **[`compiled`]** -- [`CompiledPlugin`], WebAssembly guests speaking the
//!   [`abi`] calling convention.
//! - **[`manager`]** -- [`PluginManager`] owns the collection and runs
//!   `apply_all`.
//! - **[`adapter`]** -- [`PluginFixModule`] plugs a manager into a
//!   [`wikiplug_fixes::FixPipeline`].
//!
//! All public plugin types are `Send + Sync`; guest contexts are created per
//! call and never shared.

pub mod abi;
pub mod adapter;
pub mod compiled;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod mw;
pub mod plugin;
pub mod scripted;
pub mod wikitext;

// Re-export the most commonly used types at the crate root.
pub use adapter::PluginFixModule;
pub use compiled::{CompiledPlugin, WasmEngine};
pub use config::SandboxConfig;
pub use error::{ErrorKind, PluginError, Result};
pub use loader::{DirectoryLoad, SkippedPlugin};
pub use manager::{AggregateResult, ManagerState, PluginFailure, PluginManager};
pub use plugin::{Plugin, PluginInfo, PluginKind};
pub use scripted::ScriptedPlugin;
