//! # Content Layout Engine
//!
//! Turns the merged form tree into layout items, one container at a time,
//! against a height budget handed down by the page manager.
//!
//! ## How a Page Gets Filled
//!
//! 1. The orchestrator asks the page manager how much height the current
//!    content area has left.
//! 2. The root [`ContentLayoutProcessor`] places children row by row. Each
//!    child is asked: does it fit below the current row?
//! 3. If it fits: place it and move on.
//! 4. If it doesn't fit and may be cut (`keep.intact` is none): find the
//!    lowest cut at or above the limit, keep the top part here and carry the
//!    rest as a new item in the same split chain.
//! 5. If it may not be cut: leave it for the next content area, unless it
//!    is already at the top of an area and the next one is no taller.
//! 6. Explicit breaks, keep links and overflow leaders/trailers feed back
//!    into the page manager, which decides where the next area comes from.
//!
//! The processor suspends where it stopped and the next step resumes from
//! there. Nothing is laid out on an endless canvas and sliced afterwards.

pub mod content;
pub mod flow;
pub mod item;
pub mod page_break;
pub mod split;
pub mod stage;
pub mod table;

pub use content::ContentLayoutProcessor;
pub use item::{ItemKind, LayoutArena, LayoutEvent, LayoutId, LayoutItem, PageEvent};
pub use page_break::{BreakDecision, decide_break};
pub use stage::Stage;

use crate::model::{Document, FormId};
use crate::notify::MeasureContent;
use crate::page::PageLayoutManager;

/// Everything a processor reaches while laying out: the document it
/// writes items into, the page manager it consults for breaks and
/// overflow, the widget measurer, and the current pass number.
pub struct LayoutEnv<'a> {
    pub doc: &'a mut Document,
    pub pages: &'a mut PageLayoutManager,
    pub measure: &'a dyn MeasureContent,
    pub pass: u32,
}

/// How far a layout call got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutResult {
    /// The container is complete.
    #[default]
    Done,
    /// Out of height; continue on the next content area.
    PageFullBreak,
    /// Out of width; continue on the next row.
    RowFullBreak,
    /// An explicit break ended the content area.
    ManualBreak,
}

/// Overflow inherited from an ancestor: the overflow descriptor and the
/// container that declared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowSource {
    pub node: FormId,
    pub owner: FormId,
}

/// State passed from a container to the children it lays out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context<'c> {
    /// Column widths of the enclosing table.
    pub column_widths: Option<&'c [f64]>,
    /// Width the current table cell is forced to.
    pub cur_column_width: Option<f64>,
    pub overflow: Option<OverflowSource>,
}

/// Release `id`, moving its form node's chain head along if it was the
/// head.
pub(crate) fn release_item(doc: &mut Document, id: LayoutId) {
    let Some(item) = doc.items.get(id) else {
        return;
    };
    let (form, next) = (item.form, item.next);
    if let Some(form) = form.filter(|&f| doc.form.contains(f)) {
        if doc.form.node(form).layout_item == Some(id) {
            doc.form.node_mut(form).layout_item = next;
        }
    }
    doc.items.release(id);
}
