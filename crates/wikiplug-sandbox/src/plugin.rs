//! The plugin abstraction.
//!
//! Both guest runtimes implement [`Plugin`]; the manager and the pipeline
//! adapter are written against the trait only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which runtime hosts a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// An embedded Lua script.
    Scripted,
    /// A WebAssembly module.
    Compiled,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scripted => f.write_str("scripted"),
            Self::Compiled => f.write_str("compiled"),
        }
    }
}

/// A text-transformation plugin.
///
/// `transform` must not retain state between calls that would make its
/// output depend on earlier inputs; the shipped runtimes build a fresh guest
/// context per call.
pub trait Plugin: Send + Sync {
    /// Registration name, unique within a manager.
    fn name(&self) -> &str;

    /// Free-form description.
    fn description(&self) -> &str;

    /// Hosting runtime.
    fn kind(&self) -> PluginKind;

    /// Transform `input` into new text.
    fn transform(&self, input: &str) -> Result<String>;
}

/// Snapshot of a registered plugin, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Registration name.
    pub name: String,
    /// Description declared by the guest.
    pub description: String,
    /// Hosting runtime.
    pub kind: PluginKind,
    /// Whether `apply_all` will run it.
    pub enabled: bool,
}
