//! Core fix-module trait and supporting types.
//!
//! Every transformation step in the rule-application pipeline implements
//! [`FixModule`], giving the pipeline a uniform way to describe, toggle, and
//! run it.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Page-level facts a fix step may consult while transforming text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixContext {
    /// Title of the page being edited.
    pub title: String,
    /// Numeric namespace of the page (0 is the main namespace).
    pub namespace: i32,
    /// Whether the page is a redirect.
    pub is_redirect: bool,
}

impl FixContext {
    /// Create a context for a main-namespace, non-redirect page.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: i32) -> Self {
        self.namespace = namespace;
        self
    }

    /// Mark the page as a redirect (or not).
    pub fn with_redirect(mut self, is_redirect: bool) -> Self {
        self.is_redirect = is_redirect;
        self
    }
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// A single composable step of the rule-application pipeline.
///
/// `apply` must always produce text.  Problems that do not prevent a result
/// are reported through `diagnostics` instead of failing the step.
pub trait FixModule: Send + Sync {
    /// Stable machine-readable identifier (used for enable/disable).
    fn id(&self) -> &str;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Grouping shown to users (e.g. "Formatting", "Plugins").
    fn category(&self) -> &str;

    /// What the step does.
    fn description(&self) -> &str;

    /// Transform `text`, borrowing it back unchanged when nothing applies.
    fn apply<'a>(
        &self,
        text: &'a str,
        context: &FixContext,
        diagnostics: &mut Diagnostics,
    ) -> Cow<'a, str>;

    /// Whether the pipeline runs this step when it is first registered.
    fn default_enabled(&self) -> bool {
        true
    }
}
