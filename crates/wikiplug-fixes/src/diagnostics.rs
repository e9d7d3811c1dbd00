//! Diagnostics reported by fix steps.

use serde::{Deserialize, Serialize};

/// A non-fatal problem noticed while running a fix step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    /// A user plugin failed and its output was discarded.
    PluginFailed {
        /// Name of the failing plugin.
        plugin: String,
        /// Failure category (e.g. `timeout`, `sandboxed`).
        kind: String,
        /// Human-readable failure description.
        message: String,
    },

    /// Free-form note from a fix module.
    Note {
        /// Identifier of the module that raised the note.
        module: String,
        /// The note itself.
        message: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PluginFailed {
                plugin,
                kind,
                message,
            } => write!(f, "plugin `{plugin}` skipped ({kind}): {message}"),
            Self::Note { module, message } => write!(f, "{module}: {message}"),
        }
    }
}

/// Ordered collection of warnings gathered over one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning.
    pub fn push(&mut self, warning: Warning) {
        tracing::debug!(%warning, "diagnostic recorded");
        self.warnings.push(warning);
    }

    /// All warnings in the order they were recorded.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Number of warnings recorded.
    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Consume the collector, returning its warnings.
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

impl Extend<Warning> for Diagnostics {
    fn extend<I: IntoIterator<Item = Warning>>(&mut self, iter: I) {
        for warning in iter {
            self.push(warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_order() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());
        diags.push(Warning::Note {
            module: "a".into(),
            message: "first".into(),
        });
        diags.push(Warning::Note {
            module: "b".into(),
            message: "second".into(),
        });
        assert_eq!(diags.len(), 2);
        assert!(matches!(&diags.warnings()[0], Warning::Note { module, .. } if module == "a"));
        assert!(matches!(&diags.warnings()[1], Warning::Note { module, .. } if module == "b"));
    }

    #[test]
    fn plugin_failed_display() {
        let w = Warning::PluginFailed {
            plugin: "strip_links".into(),
            kind: "timeout".into(),
            message: "took too long".into(),
        };
        assert_eq!(
            w.to_string(),
            "plugin `strip_links` skipped (timeout): took too long"
        );
    }

    #[test]
    fn warning_serializes_with_type_tag() {
        let w = Warning::PluginFailed {
            plugin: "p".into(),
            kind: "sandboxed".into(),
            message: "m".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["type"], "plugin_failed");
        assert_eq!(json["plugin"], "p");
        let back: Warning = serde_json::from_value(json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn extend_appends() {
        let mut diags = Diagnostics::new();
        diags.extend(vec![
            Warning::Note {
                module: "x".into(),
                message: "1".into(),
            },
            Warning::Note {
                module: "x".into(),
                message: "2".into(),
            },
        ]);
        assert_eq!(diags.into_warnings().len(), 2);
    }
}
