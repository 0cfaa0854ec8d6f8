//! The per-container stage machine.
//!
//! A container's children are visited as a sequence of stages: bookend
//! leaders, break-before markers, the child container itself, break-after
//! markers and bookend trailers. [`ChildCursor::advance`] computes the next
//! `(stage, node)` pair from the current one. A keep run is pushed as a
//! [`KeepRun`] when a kept neighbour is met: the run is scanned in the
//! `Keep` stage, then popped, and the cursor rewinds to its head to lay the
//! nodes out in order.

use super::page_break::{exist_container_keep, intact};
use crate::model::{BreakTarget, Document, Element, FormId, KeepValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    None,
    BookendLeader,
    BreakBefore,
    Keep,
    Container,
    BreakAfter,
    BookendTrailer,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepRun {
    pub head: FormId,
    pub tail: Option<FormId>,
}

type Step = (Stage, Option<FormId>);

/// Position of a processor among its container's children.
#[derive(Debug, Clone, Default)]
pub struct ChildCursor {
    pub stage: Stage,
    pub node: Option<FormId>,
    pub keep: Option<KeepRun>,
    /// Set once a run has been popped; suppresses break lookups while the
    /// kept nodes are laid out.
    pub break_finished: bool,
}

impl ChildCursor {
    pub fn push_keep(&mut self, head: FormId) {
        self.keep = Some(KeepRun { head, tail: None });
    }

    /// Pop the active run, returning its head.
    fn pop_keep(&mut self) -> Option<FormId> {
        self.break_finished = true;
        self.keep.take().map(|run| run.head)
    }

    /// Move to the next stage among the children of `parent`. Unused
    /// layout-generated nodes met on the way are deleted.
    pub fn advance(&mut self, doc: &mut Document, parent: FormId) {
        let (stage, node) = self.next(doc, parent);
        self.stage = stage;
        self.node = node;
    }

    fn next(&mut self, doc: &mut Document, parent: FormId) -> Step {
        let child_container = match self.stage {
            Stage::BreakBefore | Stage::BreakAfter => self.node.and_then(|n| doc.form.parent(n)),
            Stage::Keep | Stage::Container => self.node,
            _ => None,
        };
        let mut cur = self.node;

        match self.stage {
            Stage::Keep => {
                let first = child_container.and_then(|c| doc.form.first_child(c));
                if let Some(hit) = self.handle_keep(doc, first) {
                    return hit;
                }
            }
            Stage::None | Stage::BookendLeader | Stage::BreakBefore => {
                if self.stage != Stage::BreakBefore {
                    if self.stage == Stage::None {
                        cur = None;
                    }
                    if let Some(hit) = find_bookend(doc, parent, cur, Stage::BookendLeader) {
                        return hit;
                    }
                    cur = None;
                }
                if let Some(hit) = self.handle_break_before(doc, child_container, cur) {
                    return hit;
                }
            }
            Stage::Container | Stage::BreakAfter => {
                if self.stage == Stage::Container {
                    cur = None;
                }
                if let Some(hit) = self.handle_break_after(doc, child_container, cur) {
                    return hit;
                }
            }
            Stage::BookendTrailer | Stage::Done => {
                if self.stage == Stage::BookendTrailer {
                    if let Some(hit) = find_bookend(doc, parent, cur, Stage::BookendTrailer) {
                        return hit;
                    }
                }
                return (Stage::Done, None);
            }
        }

        if let Some(hit) = self.handle_check_next(doc, parent, child_container) {
            return hit;
        }
        if let Some(hit) = find_bookend(doc, parent, None, Stage::BookendTrailer) {
            return hit;
        }
        (Stage::Done, None)
    }

    fn handle_keep(&self, doc: &Document, start: Option<FormId>) -> Option<Step> {
        if self.break_finished {
            return None;
        }
        find_break_node(doc, start, false)
    }

    fn handle_break_before(
        &mut self,
        doc: &Document,
        child_container: Option<FormId>,
        cur: Option<FormId>,
    ) -> Option<Step> {
        let cur = cur?;
        let child_container = child_container?;
        if !self.break_finished {
            if let Some(hit) = find_break_node(doc, doc.form.next_sibling(cur), true) {
                return Some(hit);
            }
        }
        if let Some(run) = self.keep {
            if run.tail == Some(child_container) {
                let head = self.pop_keep();
                return Some((Stage::Container, head));
            }
            return find_break_node(doc, doc.form.first_child(child_container), false);
        }
        Some((Stage::Container, Some(child_container)))
    }

    fn handle_break_after(
        &self,
        doc: &Document,
        child_container: Option<FormId>,
        cur: Option<FormId>,
    ) -> Option<Step> {
        if let Some(cur) = cur {
            return find_break_node(doc, doc.form.next_sibling(cur), false);
        }
        let first = child_container.and_then(|c| doc.form.first_child(c));
        self.handle_keep(doc, first)
    }

    fn handle_check_next(
        &mut self,
        doc: &mut Document,
        parent: FormId,
        child_container: Option<FormId>,
    ) -> Option<Step> {
        let mut next = match child_container {
            Some(c) => doc.form.next_container_sibling(c),
            None => doc.form.first_container_child(parent),
        };
        // Page structure is laid out by the page manager, not as content.
        while let Some(n) = next.filter(|&n| {
            doc.form.node(n).flags.layout_generated || doc.form.element(n) == Element::PageSet
        }) {
            next = doc.form.next_container_sibling(n);
            let flags = doc.form.node(n).flags;
            if flags.layout_generated && flags.unused {
                doc.delete_form(n);
            }
        }
        let mut next = next?;

        let mut last_keep = false;
        if let Some(hit) = self.keep_for_check_next(doc, &mut next, &mut last_keep) {
            return Some(hit);
        }
        if !self.break_finished && !last_keep {
            if let Some(hit) = find_break_node(doc, doc.form.first_child(next), true) {
                return Some(hit);
            }
        }
        let stage = if self.keep.is_some() {
            Stage::Keep
        } else {
            Stage::Container
        };
        Some((stage, Some(next)))
    }

    fn keep_for_check_next(
        &mut self,
        doc: &Document,
        next: &mut FormId,
        last_keep: &mut bool,
    ) -> Option<Step> {
        let can_split = intact(doc, *next) == KeepValue::None;
        let next_keep = exist_container_keep(doc, *next, false);
        if next_keep && !can_split {
            if self.keep.is_none() && !self.break_finished {
                self.push_keep(*next);
            }
            return None;
        }

        let Some(run) = self.keep.as_mut() else {
            if self.break_finished {
                *last_keep = true;
            }
            self.break_finished = false;
            return None;
        };

        run.tail = Some(*next);
        let head = run.head;
        if !self.break_finished {
            if let Some(hit) = find_break_node(doc, doc.form.first_child(*next), true) {
                return Some(hit);
            }
        }
        *next = head;
        self.pop_keep();
        None
    }
}

/// First break marker at or after `start` among its siblings:
/// `breakBefore`/`breakAfter` elements, or `break` elements whose
/// `before`/`after` is not `auto`.
pub fn find_break_node(doc: &Document, start: Option<FormId>, before: bool) -> Option<Step> {
    let mut cur = start;
    while let Some(node) = cur {
        match doc.form.element(node) {
            Element::BreakBefore if before => return Some((Stage::BreakBefore, Some(node))),
            Element::BreakAfter if !before => return Some((Stage::BreakAfter, Some(node))),
            Element::Break => {
                let attrs = doc.attrs(node);
                let target = if before { attrs.before } else { attrs.after };
                if target.unwrap_or_default() != BreakTarget::Auto {
                    let stage = if before {
                        Stage::BreakBefore
                    } else {
                        Stage::BreakAfter
                    };
                    return Some((stage, Some(node)));
                }
            }
            _ => {}
        }
        cur = doc.form.next_sibling(node);
    }
    None
}

fn find_bookend(doc: &Document, parent: FormId, cur: Option<FormId>, stage: Stage) -> Option<Step> {
    let mut node = match cur {
        Some(c) => doc.form.next_sibling(c),
        None => doc.form.first_child(parent),
    };
    while let Some(n) = node {
        if matches!(doc.form.element(n), Element::Bookend | Element::Break) {
            return Some((stage, Some(n)));
        }
        node = doc.form.next_sibling(n);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Helpers ────────────────────────────────────────────────────

    fn merged(template: &str) -> (Document, FormId) {
        let mut doc = Document::from_json(template, None).unwrap();
        let root = doc.merge().unwrap();
        (doc, root)
    }

    fn walk(doc: &mut Document, parent: FormId) -> Vec<(Stage, String)> {
        let mut cursor = ChildCursor::default();
        let mut out = Vec::new();
        loop {
            cursor.advance(doc, parent);
            if cursor.stage == Stage::Done {
                break;
            }
            let name = cursor
                .node
                .map(|n| {
                    let name = doc.form.name(n);
                    if name.is_empty() {
                        doc.form.element(n).name().to_string()
                    } else {
                        name.to_string()
                    }
                })
                .unwrap_or_default();
            out.push((cursor.stage, name));
            assert!(out.len() < 64, "stage machine did not terminate");
        }
        out
    }

    #[test]
    fn test_plain_children_in_order() {
        let (mut doc, root) = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "field", "name": "a" },
            { "element": "field", "name": "b" }
        ] }"#);
        let stages = walk(&mut doc, root);
        let expected = vec![
            (Stage::Container, "a".to_string()),
            (Stage::Container, "b".to_string()),
        ];
        assert_eq!(stages, expected);
    }

    #[test]
    fn test_breaks_surround_their_container() {
        let (mut doc, root) = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "field", "name": "a" },
            { "element": "subform", "name": "s", "children": [
                { "element": "breakBefore", "targetType": "pageArea" },
                { "element": "breakAfter", "targetType": "contentArea" },
                { "element": "break", "after": "auto" }
            ] }
        ] }"#);
        let stages: Vec<Stage> = walk(&mut doc, root).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            stages,
            vec![Stage::Container, Stage::BreakBefore, Stage::Container, Stage::BreakAfter]
        );
    }

    #[test]
    fn test_bookends_bracket_children() {
        let (mut doc, root) = merged(r##"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "bookend", "leader": "#lead" },
            { "element": "field", "name": "a" }
        ] }"##);
        let stages: Vec<Stage> = walk(&mut doc, root).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            stages,
            vec![Stage::BookendLeader, Stage::Container, Stage::BookendTrailer]
        );
    }

    #[test]
    fn test_keep_run_rewinds_to_head() {
        let (mut doc, root) = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "draw", "name": "a", "keep": { "next": "contentArea" } },
            { "element": "draw", "name": "b", "keep": { "next": "contentArea" } },
            { "element": "field", "name": "c" }
        ] }"#);
        let stages = walk(&mut doc, root);
        let expected: Vec<(Stage, String)> = vec![
            (Stage::Keep, "a".into()),
            (Stage::Keep, "b".into()),
            (Stage::Container, "a".into()),
            (Stage::Container, "b".into()),
            (Stage::Container, "c".into()),
        ];
        assert_eq!(stages, expected);
    }

    #[test]
    fn test_keep_run_is_pushed_then_popped() {
        let (mut doc, root) = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "draw", "name": "a", "keep": { "next": "contentArea" } },
            { "element": "draw", "name": "b", "keep": { "next": "contentArea" } },
            { "element": "field", "name": "c" }
        ] }"#);
        let a = doc.form.first_container_child(root).unwrap();
        let mut cursor = ChildCursor::default();

        cursor.advance(&mut doc, root);
        assert_eq!(cursor.stage, Stage::Keep);
        assert_eq!(cursor.keep, Some(KeepRun { head: a, tail: None }));

        cursor.advance(&mut doc, root);
        assert_eq!(cursor.stage, Stage::Keep);
        assert!(cursor.keep.is_some());

        cursor.advance(&mut doc, root);
        assert_eq!((cursor.stage, cursor.node), (Stage::Container, Some(a)));
        assert_eq!(cursor.keep, None);
        assert!(cursor.break_finished);
    }

    #[test]
    fn test_unused_generated_nodes_are_deleted() {
        let (mut doc, root) = merged(r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "field", "name": "a" },
            { "element": "field", "name": "b" }
        ] }"#);
        let a = doc
            .form
            .children(root)
            .iter()
            .copied()
            .find(|&c| doc.form.name(c) == "a")
            .unwrap();
        doc.form.node_mut(a).flags.layout_generated = true;
        doc.form.node_mut(a).flags.unused = true;
        let stages = walk(&mut doc, root);
        assert_eq!(stages, vec![(Stage::Container, "b".to_string())]);
        assert!(!doc.form.contains(a));
    }
}
