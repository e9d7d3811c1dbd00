//! Plugin error types.
//!
//! Every public API in this crate surfaces failures through [`PluginError`].
//! The guest-facing variants carry the name of the plugin involved so that a
//! failure can be attributed after it has been collected into an
//! [`AggregateResult`](crate::manager::AggregateResult).

/// Unified error type for the plugin sandbox.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Guest code failed to parse or instantiate, or does not honour the
    /// required entry-point contract.
    #[error("plugin `{plugin}` failed to load: {reason}")]
    LoadFailed {
        /// Plugin (or file) being loaded.
        plugin: String,
        /// What went wrong.
        reason: String,
    },

    /// The guest raised an error during otherwise-permitted execution.
    #[error("plugin `{plugin}` failed: {reason}")]
    ExecutionFailed { plugin: String, reason: String },

    /// The guest completed but its result cannot be decoded as text.
    #[error("plugin `{plugin}` returned invalid data: {reason}")]
    InvalidReturn { plugin: String, reason: String },

    /// The wall-clock budget was exhausted.
    #[error("plugin `{plugin}` timed out after {limit_ms}ms")]
    Timeout {
        plugin: String,
        /// The configured limit in milliseconds.
        limit_ms: u64,
    },

    /// A resource ceiling other than wall-clock time was exceeded, or the
    /// guest reached for a capability that is never granted.
    #[error("plugin `{plugin}` stopped by sandbox: {reason}")]
    Sandboxed { plugin: String, reason: String },

    /// No plugin with this name is registered.
    #[error("plugin not found: {name}")]
    NotFound { name: String },

    /// An I/O error occurred while enumerating a plugin directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload-free category of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LoadFailed,
    ExecutionFailed,
    InvalidReturn,
    Timeout,
    Sandboxed,
    NotFound,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LoadFailed => "load_failed",
            Self::ExecutionFailed => "execution_failed",
            Self::InvalidReturn => "invalid_return",
            Self::Timeout => "timeout",
            Self::Sandboxed => "sandboxed",
            Self::NotFound => "not_found",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

impl PluginError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoadFailed { .. } => ErrorKind::LoadFailed,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::InvalidReturn { .. } => ErrorKind::InvalidReturn,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Sandboxed { .. } => ErrorKind::Sandboxed,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Name of the plugin the error is attributed to, if any.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::LoadFailed { plugin, .. }
            | Self::ExecutionFailed { plugin, .. }
            | Self::InvalidReturn { plugin, .. }
            | Self::Timeout { plugin, .. }
            | Self::Sandboxed { plugin, .. } => Some(plugin),
            Self::NotFound { name } => Some(name),
            Self::Io(_) => None,
        }
    }

    /// The failure description without the plugin attribution.
    pub fn detail(&self) -> String {
        match self {
            Self::LoadFailed { reason, .. }
            | Self::ExecutionFailed { reason, .. }
            | Self::InvalidReturn { reason, .. }
            | Self::Sandboxed { reason, .. } => reason.clone(),
            Self::Timeout { limit_ms, .. } => format!("timed out after {limit_ms}ms"),
            Self::NotFound { .. } => "not found".to_owned(),
            Self::Io(e) => e.to_string(),
        }
    }

    pub(crate) fn load_failed(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::LoadFailed {
            plugin: plugin.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn execution_failed(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            plugin: plugin.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_return(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidReturn {
            plugin: plugin.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sandboxed(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::Sandboxed {
            plugin: plugin.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn timeout(plugin: &str, limit_ms: u64) -> Self {
        Self::Timeout {
            plugin: plugin.to_owned(),
            limit_ms,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_owned(),
        }
    }
}

/// Convenience alias used throughout the sandbox crate.
pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failed_display() {
        let err = PluginError::load_failed("upper", "missing `transform`");
        assert_eq!(
            err.to_string(),
            "plugin `upper` failed to load: missing `transform`"
        );
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
    }

    #[test]
    fn timeout_display() {
        let err = PluginError::timeout("spin", 5000);
        assert_eq!(err.to_string(), "plugin `spin` timed out after 5000ms");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn sandboxed_display() {
        let err = PluginError::sandboxed("evil", "capability `os` is not available");
        assert_eq!(
            err.to_string(),
            "plugin `evil` stopped by sandbox: capability `os` is not available"
        );
    }

    #[test]
    fn not_found_display() {
        let err = PluginError::not_found("ghost");
        assert_eq!(err.to_string(), "plugin not found: ghost");
        assert_eq!(err.plugin(), Some("ghost"));
    }

    #[test]
    fn plugin_attribution() {
        assert_eq!(
            PluginError::invalid_return("p", "nil").plugin(),
            Some("p")
        );
        assert_eq!(
            PluginError::execution_failed("q", "boom").plugin(),
            Some("q")
        );
        let io = PluginError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.plugin(), None);
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("gone"));
    }

    #[test]
    fn detail_omits_attribution() {
        assert_eq!(PluginError::sandboxed("p", "no `os`").detail(), "no `os`");
        assert_eq!(PluginError::timeout("p", 20).detail(), "timed out after 20ms");
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::InvalidReturn.to_string(), "invalid_return");
        assert_eq!(ErrorKind::Sandboxed.to_string(), "sandboxed");
        assert_eq!(ErrorKind::ExecutionFailed.to_string(), "execution_failed");
    }
}
