//! # xfa-flow
//!
//! A form merge and pagination engine.
//!
//! A template describes a form: subforms, fields, draws, the page areas
//! content may land on and the rules for breaking, keeping and repeating.
//! Data is merged into the template to produce a form tree, and the form
//! tree is then flowed into pages.
//!
//! Pagination is incremental. The engine never lays content out on an
//! endless canvas and slices it afterwards: every placement decision is
//! made against the height of the content area currently being filled,
//! and the layout suspends at each page boundary so a host can step it.
//!
//! ## Architecture
//!
//! ```text
//! Template JSON + Data JSON
//!       ↓
//!   [model]        Template, data and form trees (slotmap arenas)
//!       ↓
//!   [merge]        Bind data to template, instantiate occurrences
//!       ↓
//!   [layout]       Content layout: flowed, positioned, table, split
//!       ↕
//!   [page]         Page sets, page areas, content areas, breaks, overflow
//!       ↓
//!   [orchestrator] Step-wise driver, notifications, page snapshots
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod merge;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod page;

pub use config::LayoutConfig;
pub use error::{Defect, FlowError};
pub use model::Document;
pub use orchestrator::{LayoutOrchestrator, PageSummary, Progress};

/// Merge `data` into `template` and lay out every page.
///
/// This is the one-call entry point; hosts that want to step the layout or
/// receive notifications use [`LayoutOrchestrator`] directly.
pub fn layout_json(template: &str, data: Option<&str>, config: &LayoutConfig) -> Result<PageSummary, FlowError> {
    let mut orchestrator = LayoutOrchestrator::from_json(template, data)?.with_config(config.clone());
    orchestrator.run()?;
    Ok(orchestrator.summary())
}
