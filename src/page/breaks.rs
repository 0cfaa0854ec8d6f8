//! Breaks, bookends and overflow.
//!
//! Each of these names its targets by reference: `#id`, `som(path)` or a
//! bare path, possibly several separated by spaces. Page and content area
//! targets are resolved against the page set; leaders and trailers against
//! the template of the container that declares them, and are instantiated
//! into the form tree as generated content.

use super::{PageLayoutManager, Search};
use crate::error::Defect;
use crate::layout::page_break::requires_space;
use crate::model::{BreakTarget, Document, Element, FormId, TemplateId};

/// Outcome of a break: the leader and trailer instances to insert, and
/// whether a new content area was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakData {
    pub leader: Option<FormId>,
    pub trailer: Option<FormId>,
    pub create_page: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverflowData {
    pub leader: Option<FormId>,
    pub trailer: Option<FormId>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BreakPlan {
    pub leader: Option<TemplateId>,
    pub trailer: Option<TemplateId>,
    pub create_page: bool,
}

impl PageLayoutManager {
    pub fn process_break_before(&mut self, doc: &mut Document, node: FormId) -> Option<BreakData> {
        self.process_break(doc, node, true)
    }

    pub fn process_break_after(&mut self, doc: &mut Document, node: FormId) -> Option<BreakData> {
        self.process_break(doc, node, false)
    }

    fn process_break(&mut self, doc: &mut Document, node: FormId, before: bool) -> Option<BreakData> {
        let owner = doc.form.container_parent(node)?;
        if !requires_space(doc, owner) {
            return None;
        }
        let plan = self.execute_break(doc, node, before);
        let parent = doc.form.container_parent(owner);
        Some(BreakData {
            leader: plan.leader.and_then(|t| instantiate_generated(doc, t, parent)),
            trailer: plan.trailer.and_then(|t| instantiate_generated(doc, t, parent)),
            create_page: plan.create_page,
        })
    }

    /// Move to the content area a break asks for. Nothing is instantiated.
    pub(crate) fn execute_break(&mut self, doc: &mut Document, node: FormId, before: bool) -> BreakPlan {
        let Some(owner) = doc.form.container_parent(node) else {
            return BreakPlan::default();
        };
        match doc.form.element(node) {
            Element::BreakBefore | Element::BreakAfter => {
                let attrs = doc.attrs(node);
                let target = attrs.target.clone();
                let leader = attrs.leader.clone();
                let trailer = attrs.trailer.clone();
                let target_type = attrs.target_type.unwrap_or_default();
                let start_new = attrs.start_new.unwrap_or(false);

                let scope = doc.form.template(owner);
                let target = self.resolve_page_target(doc, target.as_deref());
                let leader = resolve_target(doc, scope, leader.as_deref(), true);
                let trailer = resolve_target(doc, scope, trailer.as_deref(), true);
                let mut create_page = self.run_break(doc, target_type, target, start_new);
                if !create_page && self.opens_first_page(doc, node, owner) {
                    create_page = true;
                }
                BreakPlan {
                    leader,
                    trailer,
                    create_page,
                }
            }
            Element::Break => {
                let attrs = doc.attrs(node);
                let (target, target_type) = if before {
                    (attrs.before_target.clone(), attrs.before.unwrap_or_default())
                } else {
                    (attrs.after_target.clone(), attrs.after.unwrap_or_default())
                };
                let start_new = attrs.start_new.unwrap_or(false);
                let target = self.resolve_page_target(doc, target.as_deref());
                BreakPlan {
                    create_page: self.run_break(doc, target_type, target, start_new),
                    ..Default::default()
                }
            }
            _ => BreakPlan::default(),
        }
    }

    /// A break-before on the first subform of the root subform is satisfied
    /// by the first page itself.
    fn opens_first_page(&self, doc: &Document, node: FormId, owner: FormId) -> bool {
        if self.records.is_empty() || self.current != Some(0) || doc.form.element(node) != Element::BreakBefore {
            return false;
        }
        let Some(parent) = doc.form.container_parent(owner) else {
            return false;
        };
        let first_subform = doc
            .form
            .children(parent)
            .iter()
            .copied()
            .find(|&c| doc.form.element(c) == Element::Subform);
        first_subform == Some(owner)
            && doc
                .form
                .parent(parent)
                .is_some_and(|p| doc.form.element(p) == Element::Form)
    }

    pub(super) fn run_break(
        &mut self,
        doc: &mut Document,
        target_type: BreakTarget,
        target: Option<FormId>,
        start_new: bool,
    ) -> bool {
        match target_type {
            BreakTarget::ContentArea => {
                if target.is_some_and(|t| doc.form.element(t) != Element::ContentArea) {
                    return false;
                }
                let current = self.record_form(doc, |r| r.content_area);
                if target.is_none() || self.current.is_none() || target != current || start_new {
                    let page_area = target.and_then(|t| doc.form.parent(t));
                    return self
                        .next_avail_page_area(doc, page_area, target, false, Search::Commit)
                        .is_some();
                }
                false
            }
            BreakTarget::PageArea => {
                if target.is_some_and(|t| doc.form.element(t) != Element::PageArea) {
                    return false;
                }
                let current = self.record_form(doc, |r| r.page_area);
                if target.is_none() || self.current.is_none() || target != current || start_new {
                    return self
                        .next_avail_page_area(doc, target, None, true, Search::Commit)
                        .is_some();
                }
                false
            }
            BreakTarget::Auto | BreakTarget::PageOdd | BreakTarget::PageEven => false,
        }
    }

    pub fn process_bookend_leader(&mut self, doc: &mut Document, node: FormId) -> Option<FormId> {
        self.process_bookend(doc, node, true)
    }

    pub fn process_bookend_trailer(&mut self, doc: &mut Document, node: FormId) -> Option<FormId> {
        self.process_bookend(doc, node, false)
    }

    fn process_bookend(&mut self, doc: &mut Document, node: FormId, leader: bool) -> Option<FormId> {
        let owner = doc.form.container_parent(node)?;
        let scope = doc.form.template(owner);
        let attrs = doc.attrs(node);
        let (expr, allow_som) = match doc.form.element(node) {
            Element::Break => {
                let expr = if leader { &attrs.bookend_leader } else { &attrs.bookend_trailer };
                (expr.clone().filter(|e| !e.trim().is_empty())?, false)
            }
            Element::Bookend => {
                let expr = if leader { &attrs.leader } else { &attrs.trailer };
                (expr.clone()?, true)
            }
            _ => return None,
        };
        let template = resolve_target(doc, scope, Some(&expr), allow_som)?;
        instantiate_generated(doc, template, Some(owner))
    }

    /// The overflow descriptor `form` declares, if any. A legacy break
    /// counts only when it carries overflow attributes.
    pub fn query_overflow(&self, doc: &Document, form: FormId) -> Option<FormId> {
        for &child in doc.form.children(form) {
            match doc.form.element(child) {
                Element::Break => {
                    let attrs = doc.attrs(child);
                    let set = [&attrs.overflow_leader, &attrs.overflow_target, &attrs.overflow_trailer]
                        .into_iter()
                        .any(|a| a.as_deref().is_some_and(|s| !s.is_empty()));
                    return set.then_some(child);
                }
                Element::Overflow => return Some(child),
                _ => {}
            }
        }
        None
    }

    /// Apply overflow for `node`, an overflow descriptor or the container
    /// declaring one. With `create_page` the overflow target is followed;
    /// without it the leader and trailer are instantiated.
    pub fn process_overflow(&mut self, doc: &mut Document, node: Option<FormId>, create_page: bool) -> Option<OverflowData> {
        let node = node?;
        let is_overflow = matches!(doc.form.element(node), Element::Overflow | Element::Break);
        let candidates = if is_overflow {
            vec![node]
        } else {
            doc.form.children(node).to_vec()
        };
        for cur in candidates {
            let Some((leader, trailer)) = self.break_overflow(doc, cur, create_page) else {
                continue;
            };
            let parent = if is_overflow { doc.form.parent(cur) } else { Some(node) };
            return Some(OverflowData {
                leader: leader.and_then(|t| instantiate_generated(doc, t, parent)),
                trailer: trailer.and_then(|t| instantiate_generated(doc, t, parent)),
            });
        }
        None
    }

    fn break_overflow(
        &mut self,
        doc: &mut Document,
        node: FormId,
        create_page: bool,
    ) -> Option<(Option<TemplateId>, Option<TemplateId>)> {
        let owner = doc.form.container_parent(node)?;
        let attrs = doc.attrs(node);
        let (leader, target, trailer) = match doc.form.element(node) {
            Element::Break => {
                let strings = (
                    attrs.overflow_leader.clone(),
                    attrs.overflow_target.clone(),
                    attrs.overflow_trailer.clone(),
                );
                let empty = |s: &Option<String>| s.as_deref().map_or(true, str::is_empty);
                if empty(&strings.0) && empty(&strings.1) && empty(&strings.2) {
                    return None;
                }
                strings
            }
            Element::Overflow => (attrs.leader.clone(), attrs.target.clone(), attrs.trailer.clone()),
            _ => return None,
        };

        if create_page && !self.create_overflow_page && target.as_deref().is_some_and(|t| !t.is_empty()) {
            if let Some(t) = self.resolve_page_target(doc, target.as_deref()) {
                self.create_overflow_page = true;
                match doc.form.element(t) {
                    Element::PageArea => {
                        self.run_break(doc, BreakTarget::PageArea, Some(t), true);
                    }
                    Element::ContentArea => {
                        self.run_break(doc, BreakTarget::ContentArea, Some(t), true);
                    }
                    _ => {}
                }
            }
        }
        if create_page {
            return Some((None, None));
        }
        let scope = doc.form.template(owner);
        Some((
            resolve_target(doc, scope, leader.as_deref(), true),
            resolve_target(doc, scope, trailer.as_deref(), true),
        ))
    }

    /// Resolve a page-area or content-area reference to its form node.
    fn resolve_page_target(&self, doc: &mut Document, expr: Option<&str>) -> Option<FormId> {
        let scope = doc.form.template(self.page_set_root?);
        let template = resolve_target(doc, scope, expr, true)?;
        self.page_nodes.get(&template).copied()
    }
}

/// Resolve a target list: the whole expression first, then each
/// space-separated entry. A non-empty expression that matches nothing is
/// recorded as a defect.
pub(crate) fn resolve_target(
    doc: &mut Document,
    scope: TemplateId,
    expr: Option<&str>,
    allow_som: bool,
) -> Option<TemplateId> {
    let expr = expr.map(str::trim).filter(|e| !e.is_empty())?;
    let hit = std::iter::once(expr)
        .chain(expr.split_whitespace())
        .find_map(|e| doc.template.resolve_reference(scope, e, allow_som));
    if hit.is_none() {
        doc.defects.record(Defect::BrokenBreakOrOverflowTarget { target: expr.to_string() });
    }
    hit
}

fn instantiate_generated(doc: &mut Document, template: TemplateId, parent: Option<FormId>) -> Option<FormId> {
    if !doc.template.element(template).is_container() {
        return None;
    }
    let parent = parent?;
    let scope = doc.data_scope(parent);
    let node = doc.binder().instantiate(template, parent, scope)?;
    tracing::debug!(name = doc.form.name(node), "generated content instantiated");
    Some(node)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::page::tests::Pages;

    // ─── Helpers ────────────────────────────────────────────────────

    const OVERFLOWING: &str = r##"{ "element": "subform", "name": "root", "children": [
        { "element": "pageSet", "children": [
            { "element": "pageArea", "name": "main", "children": [ { "element": "contentArea", "w": 500, "h": 400 } ] },
            { "element": "pageArea", "name": "extra", "id": "extra", "children": [ { "element": "contentArea", "w": 500, "h": 300 } ] }
        ] },
        { "element": "subform", "name": "list", "layout": "tb", "children": [
            { "element": "overflow", "leader": "#lead", "trailer": "#trail", "target": "#extra" },
            { "element": "subform", "name": "lead", "id": "lead", "occur": { "min": 0 }, "children": [ { "element": "draw", "w": 100, "h": 10 } ] },
            { "element": "subform", "name": "trail", "id": "trail", "occur": { "min": 0 }, "children": [ { "element": "draw", "w": 100, "h": 10 } ] }
        ] }
    ] }"##;

    #[test]
    fn test_query_overflow_finds_descriptor() {
        let p = Pages::new(OVERFLOWING);
        let list = p.find("list");
        let node = p.pages.query_overflow(&p.doc, list).unwrap();
        assert_eq!(p.doc.form.element(node), crate::model::Element::Overflow);
        assert_eq!(p.pages.query_overflow(&p.doc, p.root), None);
    }

    #[test]
    fn test_overflow_instantiates_leader_and_trailer() {
        let mut p = Pages::new(OVERFLOWING);
        let list = p.find("list");
        let data = p.pages.process_overflow(&mut p.doc, Some(list), false).unwrap();
        let leader = data.leader.unwrap();
        let trailer = data.trailer.unwrap();
        assert_eq!(p.doc.form.name(leader), "lead");
        assert_eq!(p.doc.form.name(trailer), "trail");
        assert_eq!(p.doc.form.parent(leader), Some(list));
        assert!(p.doc.form.node(leader).flags.layout_generated);
    }

    #[test]
    fn test_overflow_target_opens_page_once() {
        let mut p = Pages::new(OVERFLOWING);
        let list = p.find("list");
        let node = p.pages.query_overflow(&p.doc, list);
        p.pages.process_overflow(&mut p.doc, node, true);
        p.pages.process_overflow(&mut p.doc, node, true);
        assert_eq!(p.pages.page_count(), 2);
        assert_eq!(p.page_name(1), "extra");
    }

    #[test]
    fn test_legacy_break_without_overflow_is_ignored() {
        let mut p = Pages::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "s", "children": [
                    { "element": "break", "bookendLeader": "" }
                ] }
            ] }"#,
        );
        let s = p.find("s");
        assert_eq!(p.pages.query_overflow(&p.doc, s), None);
        let brk = p.doc.form.first_child(s);
        assert_eq!(p.pages.process_overflow(&mut p.doc, brk, false), None);
    }

    #[test]
    fn test_bookend_leader_is_generated_under_owner() {
        let mut p = Pages::new(
            r##"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "s", "layout": "tb", "children": [
                    { "element": "bookend", "leader": "#head" },
                    { "element": "subform", "name": "head", "id": "head", "occur": { "min": 0 } }
                ] }
            ] }"##,
        );
        let s = p.find("s");
        let bookend = p.doc.form.first_child(s).unwrap();
        let head = p.pages.process_bookend_leader(&mut p.doc, bookend).unwrap();
        assert_eq!(p.doc.form.name(head), "head");
        assert_eq!(p.doc.form.parent(head), Some(s));
        assert_eq!(p.pages.process_bookend_trailer(&mut p.doc, bookend), None);
    }

    #[test]
    fn test_target_list_falls_back_to_entries() {
        let mut p = Pages::new(OVERFLOWING);
        let scope = p.doc.template.root_subform();
        let hit = super::resolve_target(&mut p.doc, scope, Some("#missing #extra"), true);
        assert_eq!(hit, p.doc.template.by_id("extra"));
        assert!(p.doc.defects.is_empty());
    }
}
