//! Fix-module interface for the wikiplug rule-application pipeline.
//!
//! A fix module is a single text-transformation step.  The host applies an
//! ordered list of them to a page's wikitext and gathers whatever diagnostics
//! they report along the way.
//!
//! - **[`traits`]** -- the [`FixModule`] trait and the [`FixContext`] handed
//!   to every step.
//! - **[`diagnostics`]** -- [`Warning`] and the [`Diagnostics`] collector.
//! - **[`pipeline`]** -- [`FixPipeline`], an ordered, toggleable list of
//!   fix modules.

pub mod diagnostics;
pub mod pipeline;
pub mod traits;

pub use diagnostics::{Diagnostics, Warning};
pub use pipeline::{FixPipeline, FixReport};
pub use traits::{FixContext, FixModule};
