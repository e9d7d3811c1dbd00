//! Sandbox configuration.
//!
//! [`SandboxConfig`] is the resource governor applied to every plugin
//! invocation: a wall-clock timeout, a memory ceiling, an instruction ceiling
//! for Lua guests and a fuel budget for WebAssembly guests.  Sensible defaults
//! are provided via the [`Default`] implementation, and a builder-style API
//! derives variants without touching the original value.

use std::time::Duration;

/// Resource limits for one plugin invocation.
///
/// The value is immutable once built; the `with_*` methods consume `self` and
/// return a new configuration, so a shared default can be cloned and
/// specialised freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    timeout: Duration,
    memory_limit: usize,
    instruction_limit: Option<u64>,
    computation_budget: u64,
}

/// A limit that violates the "all fields positive" rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sandbox limit `{field}` must be greater than zero")]
pub struct InvalidLimit {
    /// Name of the offending field.
    pub field: &'static str,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            memory_limit: 1024 * 1024,
            instruction_limit: Some(1_000_000),
            computation_budget: 10_000_000,
        }
    }
}

impl SandboxConfig {
    /// Build a configuration from explicit values.
    ///
    /// `instruction_limit: None` leaves Lua guests governed only by the
    /// timeout.
    pub fn new(
        timeout: Duration,
        memory_limit: usize,
        instruction_limit: Option<u64>,
        computation_budget: u64,
    ) -> Self {
        Self {
            timeout,
            memory_limit,
            instruction_limit,
            computation_budget,
        }
    }

    /// Maximum wall-clock time of a single invocation.
    ///
    /// Default: **5 s**.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The timeout in whole milliseconds, as reported in errors.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Memory ceiling in bytes: the Lua allocator limit, and the maximum
    /// linear-memory size of a WebAssembly instance.
    ///
    /// Default: **1 MiB**.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Lua VM instruction ceiling.
    ///
    /// Default: **1 000 000**.
    pub fn instruction_limit(&self) -> Option<u64> {
        self.instruction_limit
    }

    /// Fuel charged to a WebAssembly store before each call.
    ///
    /// Fuel metering bounds CPU usage deterministically, independent of
    /// wall-clock time.
    ///
    /// Default: **10 000 000**.
    pub fn computation_budget(&self) -> u64 {
        self.computation_budget
    }

    /// Set the wall-clock timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the memory ceiling (in bytes).
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set or clear the Lua instruction ceiling.
    pub fn with_instruction_limit(mut self, limit: Option<u64>) -> Self {
        self.instruction_limit = limit;
        self
    }

    /// Set the WebAssembly fuel budget.
    pub fn with_computation_budget(mut self, fuel: u64) -> Self {
        self.computation_budget = fuel;
        self
    }

    /// Check that every configured limit is positive.
    pub fn validate(&self) -> Result<(), InvalidLimit> {
        if self.timeout.is_zero() {
            return Err(InvalidLimit { field: "timeout" });
        }
        if self.memory_limit == 0 {
            return Err(InvalidLimit {
                field: "memory_limit",
            });
        }
        if self.instruction_limit == Some(0) {
            return Err(InvalidLimit {
                field: "instruction_limit",
            });
        }
        if self.computation_budget == 0 {
            return Err(InvalidLimit {
                field: "computation_budget",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.memory_limit(), 1024 * 1024);
        assert_eq!(cfg.instruction_limit(), Some(1_000_000));
        assert_eq!(cfg.computation_budget(), 10_000_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn explicit_constructor() {
        let cfg = SandboxConfig::new(Duration::from_millis(250), 4096, None, 42);
        assert_eq!(cfg.timeout_ms(), 250);
        assert_eq!(cfg.memory_limit(), 4096);
        assert_eq!(cfg.instruction_limit(), None);
        assert_eq!(cfg.computation_budget(), 42);
    }

    #[test]
    fn override_leaves_original_untouched() {
        let base = SandboxConfig::default();
        let longer = base.clone().with_timeout(Duration::from_secs(30));
        assert_eq!(base.timeout(), Duration::from_secs(5));
        assert_eq!(longer.timeout(), Duration::from_secs(30));
        assert_eq!(longer.memory_limit(), base.memory_limit());
        assert_eq!(longer.computation_budget(), base.computation_budget());
    }

    #[test]
    fn builder_chaining() {
        let cfg = SandboxConfig::default()
            .with_memory_limit(8 * 1024 * 1024)
            .with_instruction_limit(None)
            .with_computation_budget(500_000);
        assert_eq!(cfg.memory_limit(), 8 * 1024 * 1024);
        assert_eq!(cfg.instruction_limit(), None);
        assert_eq!(cfg.computation_budget(), 500_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let zero_timeout = SandboxConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(zero_timeout.validate().unwrap_err().field, "timeout");

        let zero_memory = SandboxConfig::default().with_memory_limit(0);
        assert_eq!(zero_memory.validate().unwrap_err().field, "memory_limit");

        let zero_instr = SandboxConfig::default().with_instruction_limit(Some(0));
        assert_eq!(zero_instr.validate().unwrap_err().field, "instruction_limit");

        let zero_fuel = SandboxConfig::default().with_computation_budget(0);
        assert_eq!(zero_fuel.validate().unwrap_err().field, "computation_budget");
    }

    #[test]
    fn invalid_limit_display() {
        let err = InvalidLimit { field: "timeout" };
        assert_eq!(err.to_string(), "sandbox limit `timeout` must be greater than zero");
    }
}
