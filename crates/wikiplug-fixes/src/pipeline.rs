//! Ordered fix pipeline.
//!
//! [`FixPipeline`] runs its registered [`FixModule`]s in registration order,
//! feeding each the previous step's output.

use std::borrow::Cow;
use std::collections::HashSet;

use crate::diagnostics::Diagnostics;
use crate::traits::{FixContext, FixModule};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReport {
    /// Final text after every enabled step.
    pub text: String,
    /// Ids of the steps that changed the text, in run order.
    pub changed_by: Vec<String>,
    /// Everything the steps reported.
    pub diagnostics: Diagnostics,
}

impl FixReport {
    /// Returns `true` if any step changed the text.
    pub fn changed(&self) -> bool {
        !self.changed_by.is_empty()
    }
}

/// An ordered, toggleable list of fix modules.
#[derive(Default)]
pub struct FixPipeline {
    modules: Vec<Box<dyn FixModule>>,
    disabled: HashSet<String>,
}

impl FixPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module.  It runs after every module registered before it.
    pub fn register(&mut self, module: Box<dyn FixModule>) {
        if !module.default_enabled() {
            self.disabled.insert(module.id().to_owned());
        }
        tracing::debug!(module = module.id(), "fix module registered");
        self.modules.push(module);
    }

    /// Enable or disable a module by id.  Returns `false` for unknown ids.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        if !self.modules.iter().any(|m| m.id() == id) {
            return false;
        }
        if enabled {
            self.disabled.remove(id);
        } else {
            self.disabled.insert(id.to_owned());
        }
        true
    }

    /// Whether the module with `id` will run.  Unknown ids are not enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m.id() == id) && !self.disabled.contains(id)
    }

    /// Ids of all registered modules in run order.
    pub fn module_ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Run every enabled module over `text`.
    pub fn apply(&self, text: &str, context: &FixContext) -> FixReport {
        let mut current = text.to_owned();
        let mut changed_by = Vec::new();
        let mut diagnostics = Diagnostics::new();

        for module in &self.modules {
            if self.disabled.contains(module.id()) {
                continue;
            }
            if let Cow::Owned(next) = module.apply(&current, context, &mut diagnostics) {
                if next != current {
                    tracing::debug!(module = module.id(), "fix module changed text");
                    changed_by.push(module.id().to_owned());
                    current = next;
                }
            }
        }

        FixReport {
            text: current,
            changed_by,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Warning;

    struct Suffix {
        id: &'static str,
        suffix: &'static str,
        enabled: bool,
    }

    impl FixModule for Suffix {
        fn id(&self) -> &str {
            self.id
        }
        fn display_name(&self) -> &str {
            self.id
        }
        fn category(&self) -> &str {
            "Test"
        }
        fn description(&self) -> &str {
            "appends a suffix"
        }
        fn apply<'a>(
            &self,
            text: &'a str,
            _context: &FixContext,
            diagnostics: &mut Diagnostics,
        ) -> Cow<'a, str> {
            diagnostics.push(Warning::Note {
                module: self.id.to_owned(),
                message: "ran".into(),
            });
            Cow::Owned(format!("{text}{}", self.suffix))
        }
        fn default_enabled(&self) -> bool {
            self.enabled
        }
    }

    struct Noop;

    impl FixModule for Noop {
        fn id(&self) -> &str {
            "noop"
        }
        fn display_name(&self) -> &str {
            "Noop"
        }
        fn category(&self) -> &str {
            "Test"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn apply<'a>(
            &self,
            text: &'a str,
            _context: &FixContext,
            _diagnostics: &mut Diagnostics,
        ) -> Cow<'a, str> {
            Cow::Borrowed(text)
        }
    }

    fn suffix(id: &'static str, suffix: &'static str) -> Box<dyn FixModule> {
        Box::new(Suffix {
            id,
            suffix,
            enabled: true,
        })
    }

    #[test]
    fn runs_in_registration_order() {
        let mut pipeline = FixPipeline::new();
        pipeline.register(suffix("a", "1"));
        pipeline.register(Box::new(Noop));
        pipeline.register(suffix("b", "2"));

        let report = pipeline.apply("x", &FixContext::new("T"));
        assert_eq!(report.text, "x12");
        assert_eq!(report.changed_by, vec!["a", "b"]);
        assert_eq!(report.diagnostics.len(), 2);
        assert!(report.changed());
    }

    #[test]
    fn disabled_modules_are_skipped() {
        let mut pipeline = FixPipeline::new();
        pipeline.register(suffix("a", "1"));
        pipeline.register(suffix("b", "2"));
        assert!(pipeline.set_enabled("a", false));

        let report = pipeline.apply("x", &FixContext::new("T"));
        assert_eq!(report.text, "x2");
        assert!(!pipeline.is_enabled("a"));
        assert!(pipeline.is_enabled("b"));

        assert!(pipeline.set_enabled("a", true));
        assert_eq!(pipeline.apply("x", &FixContext::new("T")).text, "x12");
    }

    #[test]
    fn default_disabled_module_starts_off() {
        let mut pipeline = FixPipeline::new();
        pipeline.register(Box::new(Suffix {
            id: "off",
            suffix: "!",
            enabled: false,
        }));
        assert!(!pipeline.is_enabled("off"));
        assert_eq!(pipeline.apply("x", &FixContext::new("T")).text, "x");
    }

    #[test]
    fn unknown_id_toggle_is_rejected() {
        let mut pipeline = FixPipeline::new();
        assert!(!pipeline.set_enabled("ghost", true));
        assert!(!pipeline.is_enabled("ghost"));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn unchanged_text_reports_no_change() {
        let mut pipeline = FixPipeline::new();
        pipeline.register(Box::new(Noop));
        let report = pipeline.apply("same", &FixContext::new("T"));
        assert_eq!(report.text, "same");
        assert!(!report.changed());
        assert_eq!(pipeline.module_ids(), vec!["noop"]);
        assert_eq!(pipeline.len(), 1);
    }
}
