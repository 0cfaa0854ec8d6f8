//! # Page Break Decisions
//!
//! Queries on form nodes that decide where content may break: effective
//! layout strategy, whether a container may be cut (`keep.intact`), keep
//! links between neighbours, and the fit decision for a child that does
//! not fit in the remaining height.

use crate::geometry::LAYOUT_PRECISION;
use crate::model::{Document, Element, FormId, KeepValue, LayoutStrategy};

/// Effective layout strategy of `form`, and whether it was forced to
/// top-to-bottom because the node sits directly under the form root.
pub fn layout_strategy(doc: &Document, form: FormId) -> (LayoutStrategy, bool) {
    if let Some(layout) = doc.attrs(form).layout {
        return (layout, false);
    }
    match doc.form.parent(form) {
        Some(parent) if doc.form.element(parent) == Element::Form => (LayoutStrategy::Tb, true),
        _ => (LayoutStrategy::Position, false),
    }
}

/// The `layout` attribute as written, defaulting to positioned.
pub fn declared_layout(doc: &Document, form: FormId) -> LayoutStrategy {
    doc.attrs(form).layout.unwrap_or(LayoutStrategy::Position)
}

/// Subform sets lay out with their nearest non-set ancestor.
pub fn subform_set_parent(doc: &Document, form: FormId) -> FormId {
    if doc.form.element(form) != Element::SubformSet {
        return form;
    }
    let mut cur = doc.form.parent(form);
    while let Some(p) = cur {
        if doc.form.element(p) != Element::SubformSet {
            return p;
        }
        cur = doc.form.parent(p);
    }
    form
}

pub fn requires_space(doc: &Document, form: FormId) -> bool {
    doc.attrs(form).presence().requires_space()
}

/// How much of the page `form` insists on staying together within.
/// `None` means it may be split.
pub fn intact(doc: &Document, form: FormId) -> KeepValue {
    if let Some(explicit) = doc.attrs(form).keep_intact() {
        return explicit;
    }
    match doc.form.element(form) {
        Element::Subform => match declared_layout(doc, form) {
            LayoutStrategy::Position | LayoutStrategy::Row => KeepValue::ContentArea,
            _ => KeepValue::None,
        },
        Element::Field => match doc.form.parent(form) {
            None => KeepValue::ContentArea,
            Some(p) if doc.form.element(p) == Element::PageArea => KeepValue::ContentArea,
            Some(p) if intact(doc, p) != KeepValue::None => KeepValue::ContentArea,
            Some(_) => KeepValue::None,
        },
        Element::Draw => KeepValue::ContentArea,
        _ => KeepValue::None,
    }
}

fn keeps(value: KeepValue) -> bool {
    matches!(value, KeepValue::ContentArea | KeepValue::PageArea)
}

/// Whether `form` is kept with its previous (`previous == true`) or next
/// visible container sibling, from either side of the link.
pub fn exist_container_keep(doc: &Document, form: FormId, previous: bool) -> bool {
    if !doc.form.contains(form) || !requires_space(doc, form) {
        return false;
    }
    let neighbour = if previous {
        doc.form.prev_container_sibling(form)
    } else {
        doc.form.next_container_sibling(form)
    };
    let Some(neighbour) = neighbour else {
        return false;
    };
    let own = doc.attrs(form);
    let own_keep = if previous {
        own.keep.as_ref().and_then(|k| k.previous)
    } else {
        own.keep.as_ref().and_then(|k| k.next)
    };
    if own_keep.is_some_and(keeps) {
        return true;
    }
    let other = doc.attrs(neighbour);
    let other_keep = if previous {
        other.keep.as_ref().and_then(|k| k.next)
    } else {
        other.keep.as_ref().and_then(|k| k.previous)
    };
    other_keep.is_some_and(keeps)
}

/// What to do with a child whose box does not fit below the current row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakDecision {
    /// Keep it here even though it overflows; nothing better exists.
    Place,
    /// Cut it at the given offset from its top.
    Split { at: f64 },
    /// Leave it for the next page.
    MoveToNextPage,
}

/// `split_at` is the best cut found inside the child, `at_top` whether
/// the row starts at the top of the content area and `next_page_fits`
/// whether a following content area could hold the child whole.
pub fn decide_break(split_at: f64, at_top: bool, next_page_fits: bool) -> BreakDecision {
    if split_at > LAYOUT_PRECISION {
        return BreakDecision::Split { at: split_at };
    }
    if at_top && !next_page_fits {
        return BreakDecision::Place;
    }
    BreakDecision::MoveToNextPage
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Helpers ────────────────────────────────────────────────────

    fn merged(template: &str) -> Document {
        let mut doc = Document::from_json(template, None).unwrap();
        doc.merge().unwrap();
        doc
    }

    fn child(doc: &Document, parent: FormId, name: &str) -> FormId {
        doc.form
            .children(parent)
            .iter()
            .copied()
            .find(|&c| doc.form.name(c) == name)
            .unwrap()
    }

    #[test]
    fn test_root_is_forced_top_to_bottom() {
        let doc = merged(r#"{ "element": "subform", "name": "root", "children": [
            { "element": "subform", "name": "a" },
            { "element": "subform", "name": "b", "layout": "lr-tb" }
        ] }"#);
        let root = doc.root_subform().unwrap();
        assert_eq!(layout_strategy(&doc, root), (LayoutStrategy::Tb, true));
        assert_eq!(layout_strategy(&doc, child(&doc, root, "a")), (LayoutStrategy::Position, false));
        assert_eq!(layout_strategy(&doc, child(&doc, root, "b")), (LayoutStrategy::LrTb, false));
    }

    #[test]
    fn test_intact_defaults() {
        let doc = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "field", "name": "f" },
            { "element": "draw", "name": "d" },
            { "element": "subform", "name": "pos", "children": [ { "element": "field", "name": "g" } ] },
            { "element": "subform", "name": "split", "layout": "tb", "keep": { "intact": "contentArea" } }
        ] }"#);
        let root = doc.root_subform().unwrap();
        assert_eq!(intact(&doc, root), KeepValue::None);
        assert_eq!(intact(&doc, child(&doc, root, "f")), KeepValue::None);
        assert_eq!(intact(&doc, child(&doc, root, "d")), KeepValue::ContentArea);
        let pos = child(&doc, root, "pos");
        assert_eq!(intact(&doc, pos), KeepValue::ContentArea);
        assert_eq!(intact(&doc, child(&doc, pos, "g")), KeepValue::ContentArea);
        assert_eq!(intact(&doc, child(&doc, root, "split")), KeepValue::ContentArea);
    }

    #[test]
    fn test_keep_links_from_either_side() {
        let doc = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "field", "name": "a", "keep": { "next": "contentArea" } },
            { "element": "field", "name": "b" },
            { "element": "field", "name": "c", "presence": "hidden", "keep": { "previous": "pageArea" } }
        ] }"#);
        let root = doc.root_subform().unwrap();
        let (a, b, c) = (child(&doc, root, "a"), child(&doc, root, "b"), child(&doc, root, "c"));
        assert!(exist_container_keep(&doc, a, false));
        assert!(exist_container_keep(&doc, b, true));
        // `c` asks to stay with `b`; the link is visible from `b`.
        assert!(exist_container_keep(&doc, b, false));
        assert!(!exist_container_keep(&doc, a, true));
        // Hidden nodes never take part in keeps.
        assert!(!exist_container_keep(&doc, c, true));
    }

    #[test]
    fn test_decide_break() {
        assert_eq!(decide_break(12.0, false, true), BreakDecision::Split { at: 12.0 });
        assert_eq!(decide_break(0.0, false, false), BreakDecision::MoveToNextPage);
        assert_eq!(decide_break(0.0, true, true), BreakDecision::MoveToNextPage);
        assert_eq!(decide_break(0.0, true, false), BreakDecision::Place);
    }
}
