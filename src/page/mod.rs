//! # Page Layout Manager
//!
//! Decides which page area and content area the content engine fills next,
//! and realizes them as view items.
//!
//! ## View Records
//!
//! Every time the engine moves to a new content area a [`ViewRecord`] is
//! appended: the page-set item, page-area item and content-area item that
//! are current from then on. The list of records is the pagination history
//! of the pass; `current` points at the record being filled.
//!
//! ## Page Sets
//!
//! How the next page area is chosen depends on the root page set's
//! relation:
//!
//! - `orderedOccurrence`: page areas are used in document order, each up to
//!   its `occur.max`, nested page sets likewise. Skipped page areas and
//!   page sets are padded up to their `occur.min`.
//! - `simplexPaginated`: any page area may follow any other; the choice is
//!   driven by `pagePosition` (`first`, `rest`, `last`, `only`, `any`).
//! - `duplexPaginated`: as simplex, and `oddOrEven` must match the parity
//!   of the page being added.
//!
//! Realized page items are kept in a flat array and reused by the next
//! pass, so a relayout only announces the pages it adds or removes.

pub mod breaks;
pub mod search;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Defect, FlowError};
use crate::geometry::{Point, Size, LAYOUT_PRECISION, UNBOUNDED};
use crate::layout::{release_item, ItemKind, LayoutEvent, LayoutId, LayoutResult, PageEvent};
use crate::model::{Document, Element, FormId, PagePosition, Relation, TemplateId};

pub use breaks::{BreakData, OverflowData};

/// The view items that are current after a move to a new content area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRecord {
    pub page_set: LayoutId,
    pub page_area: Option<LayoutId>,
    pub content_area: Option<LayoutId>,
}

/// Pagination mode of the root page set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSetMode {
    #[default]
    OrderedOccurrence,
    SimplexPaginated,
    DuplexPaginated,
}

impl PageSetMode {
    pub fn from_relation(relation: Option<Relation>) -> Self {
        match relation {
            Some(Relation::SimplexPaginated) => PageSetMode::SimplexPaginated,
            Some(Relation::DuplexPaginated) => PageSetMode::DuplexPaginated,
            _ => PageSetMode::OrderedOccurrence,
        }
    }
}

/// How far a page-area search may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Search {
    /// Realize what is found.
    Commit,
    /// Final reconciliation: find without realizing, but padding pages
    /// required by parity are still added.
    Finish,
    /// Look ahead only. Nothing is realized and no counter survives.
    Peek,
}

impl Search {
    fn commits(self) -> bool {
        self == Search::Commit
    }

    fn pads(self) -> bool {
        self != Search::Peek
    }
}

#[derive(Debug, Default)]
pub struct PageLayoutManager {
    pass: u32,
    mode: PageSetMode,
    page_set_root: Option<FormId>,
    /// Page-structure form node for each page-set, page-area and
    /// content-area template node.
    page_nodes: FxHashMap<TemplateId, FormId>,
    /// Top-level page-set items; more than one when the root page set
    /// itself repeats.
    roots: Vec<LayoutId>,
    cur_root: Option<LayoutId>,
    page_set_items: FxHashMap<FormId, LayoutId>,
    records: Vec<ViewRecord>,
    current: Option<usize>,
    cur_page_area: Option<FormId>,
    /// Consecutive uses of `cur_page_area`.
    cur_page_count: i32,
    create_overflow_page: bool,
    page_set_counts: FxHashMap<FormId, i32>,
    /// Realized pages. Entries past `avail_pages` are left over from the
    /// previous pass.
    pages: Vec<LayoutId>,
    avail_pages: usize,
    reported: FxHashSet<FormId>,
}

impl PageLayoutManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PageSetMode {
        self.mode
    }

    /// Number of pages realized so far in this pass.
    pub fn page_count(&self) -> usize {
        self.avail_pages.min(self.pages.len())
    }

    pub fn page(&self, index: usize) -> Option<LayoutId> {
        if index < self.page_count() {
            self.pages.get(index).copied()
        } else {
            None
        }
    }

    pub fn page_index(&self, page: LayoutId) -> Option<usize> {
        self.pages[..self.page_count()].iter().position(|&p| p == page)
    }

    pub fn roots(&self) -> &[LayoutId] {
        &self.roots
    }

    pub fn records(&self) -> &[ViewRecord] {
        &self.records
    }

    pub fn current_record(&self) -> Option<&ViewRecord> {
        self.current.and_then(|i| self.records.get(i))
    }

    fn tail(&self) -> Option<usize> {
        self.records.len().checked_sub(1)
    }

    fn is_ordered(&self) -> bool {
        self.mode == PageSetMode::OrderedOccurrence
    }

    fn record_form(&self, doc: &Document, pick: impl Fn(&ViewRecord) -> Option<LayoutId>) -> Option<FormId> {
        self.current_record()
            .and_then(pick)
            .and_then(|id| doc.items.get(id))
            .and_then(|item| item.form)
    }

    /// Start a pass: dismantle the previous pass's view tree, then create
    /// the root page-set item for the page set under `root`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn init_layout_page(&mut self, doc: &mut Document, root: FormId, pass: u32) -> Result<(), FlowError> {
        self.prepare_layout(doc);
        self.pass = pass;

        let page_set = doc
            .form
            .children(root)
            .iter()
            .copied()
            .find(|&c| doc.form.element(c) == Element::PageSet)
            .ok_or(FlowError::NoContentArea)?;
        self.page_set_root = Some(page_set);
        self.page_nodes = doc
            .form
            .descendants(page_set)
            .into_iter()
            .map(|f| (doc.form.template(f), f))
            .collect();

        let item = doc
            .items
            .create(ItemKind::PageSet, Some(page_set), doc.form.template(page_set), pass);
        self.roots = vec![item];
        self.cur_root = Some(item);
        self.page_set_items.insert(page_set, item);
        self.mode = PageSetMode::from_relation(doc.attrs(page_set).relation);
        self.init_page_set_map(doc, page_set);

        let page_areas: Vec<FormId> = doc
            .form
            .children(page_set)
            .iter()
            .copied()
            .filter(|&c| doc.form.element(c) == Element::PageArea)
            .collect();
        if !page_areas.is_empty() && page_areas.iter().all(|&pa| first_content_area(doc, pa).is_none()) {
            return Err(FlowError::NoContentArea);
        }
        tracing::debug!(mode = ?self.mode, page_areas = page_areas.len(), "page set ready");
        Ok(())
    }

    fn init_page_set_map(&mut self, doc: &Document, page_set: FormId) {
        if !self.is_ordered() {
            return;
        }
        for node in doc.form.descendants(page_set) {
            let ordered = doc.attrs(node).relation.unwrap_or(Relation::OrderedOccurrence) == Relation::OrderedOccurrence;
            if doc.form.element(node) == Element::PageSet && ordered {
                self.page_set_counts.insert(node, 0);
            }
        }
    }

    fn prepare_layout(&mut self, doc: &mut Document) {
        for root in std::mem::take(&mut self.roots) {
            self.dismantle(doc, root);
        }
        self.mode = PageSetMode::OrderedOccurrence;
        self.avail_pages = 0;
        self.cur_root = None;
        self.page_set_items.clear();
        self.reported.clear();
        self.clear_data();
    }

    /// Take a view subtree apart. Content items are detached for reuse,
    /// realized pages are kept in the page array, every other view item is
    /// released.
    fn dismantle(&mut self, doc: &mut Document, item: LayoutId) {
        if !doc.items.contains(item) {
            return;
        }
        for child in doc.items.take_children(item) {
            if doc.items.item(child).kind == ItemKind::Content {
                retire_content(doc, child);
            } else {
                self.dismantle(doc, child);
            }
        }
        if !self.pages.contains(&item) {
            release_item(doc, item);
        }
    }

    pub fn clear_data(&mut self) {
        self.records.clear();
        self.current = None;
        self.cur_page_area = None;
        self.cur_page_count = 0;
        self.create_overflow_page = false;
        self.page_set_counts.clear();
    }

    /// Realize the first page. A break-before on the root subform or on
    /// its first space-taking subform descendants may choose it.
    pub fn prepare_first_page(&mut self, doc: &mut Document, root: FormId) -> Result<(), FlowError> {
        let mut node = Some(root);
        let mut break_node = None;
        while let Some(n) = node {
            break_node = doc.form.children(n).iter().copied().find(|&c| match doc.form.element(c) {
                Element::BreakBefore => true,
                Element::Break => doc.attrs(c).before.unwrap_or_default() != crate::model::BreakTarget::Auto,
                _ => false,
            });
            if break_node.is_some() {
                break;
            }
            node = doc.form.children(n).iter().copied().find(|&c| {
                doc.form.element(c) == Element::Subform && crate::layout::page_break::requires_space(doc, c)
            });
        }

        if let Some(b) = break_node {
            if self.execute_break(doc, b, true).create_page {
                self.current = (!self.records.is_empty()).then_some(0);
                return Ok(());
            }
        }
        if self.append_new_page(doc, true) {
            Ok(())
        } else {
            Err(FlowError::NoFirstPage)
        }
    }

    /// Make sure a record after the current one exists.
    pub fn append_new_page(&mut self, doc: &mut Document, first: bool) -> bool {
        if self.current != self.tail() {
            return true;
        }
        if self.next_avail_page_area(doc, None, None, false, Search::Commit).is_none() {
            return false;
        }
        if first && self.current.is_none() {
            self.current = (!self.records.is_empty()).then_some(0);
        }
        !first || self.current.is_some()
    }

    /// Place a finished root item in the current content area and, unless
    /// layout is done, move on to the next record.
    pub fn submit_content_item(&mut self, doc: &mut Document, item: Option<LayoutId>, status: LayoutResult) {
        if let Some(item) = item {
            let target = self.current_record().and_then(|r| r.content_area.or(r.page_area));
            if let Some(target) = target {
                doc.items.append_child(target, item);
            }
            self.create_overflow_page = false;
        }
        if status != LayoutResult::Done {
            if status == LayoutResult::PageFullBreak && self.current == self.tail() {
                self.append_new_page(doc, false);
            }
            self.current = self.tail();
            self.cur_page_area = self.record_form(doc, |r| r.page_area);
        }
    }

    /// Height of the current content area. A degenerate area gives nothing
    /// on the first page and unbounded room after it.
    pub fn avail_height(&mut self, doc: &mut Document) -> f64 {
        let content_area = self.record_form(doc, |r| r.content_area);
        let height = content_area.map_or(0.0, |ca| measure_h(doc, ca));
        if height >= LAYOUT_PRECISION {
            return height;
        }
        if let Some(ca) = content_area {
            if self.reported.insert(ca) {
                let name = doc.form.name(ca).to_string();
                doc.defects.record(Defect::InfeasibleContentArea { name });
            }
        }
        if self.current == Some(0) {
            0.0
        } else {
            UNBOUNDED
        }
    }

    /// Append a record. Records for ordered page sets may open a new
    /// page-set instance; otherwise the current record is copied.
    fn create_view_record(&mut self, doc: &mut Document, page_area: Option<FormId>, create_new: bool) -> usize {
        let root = self.roots[0];
        let record = match self.current_record().copied() {
            Some(current) if !self.is_ordered() || page_area.is_none() => current,
            Some(current) => {
                let page_set = page_area.and_then(|pa| doc.form.parent(pa));
                let page_set_item = match page_set {
                    None => self.cur_root.unwrap_or(root),
                    Some(ps) if !create_new => {
                        if Some(ps) == self.page_set_root {
                            self.cur_root.unwrap_or(root)
                        } else {
                            self.page_set_items.get(&ps).copied().unwrap_or(self.cur_root.unwrap_or(root))
                        }
                    }
                    Some(ps) => {
                        let current_set = current.page_set;
                        let parent_item = if doc.items.item(current_set).form == Some(ps) {
                            doc.items.parent(current_set)
                        } else {
                            doc.form
                                .parent(ps)
                                .and_then(|p| self.page_set_items.get(&p).copied())
                        };
                        let item = doc.items.create(ItemKind::PageSet, Some(ps), doc.form.template(ps), self.pass);
                        self.page_set_items.insert(ps, item);
                        match parent_item {
                            Some(parent) => doc.items.append_child(parent, item),
                            None => {
                                self.roots.push(item);
                                self.cur_root = Some(item);
                                tracing::debug!(instance = self.roots.len(), "root page set repeats");
                            }
                        }
                        item
                    }
                };
                ViewRecord {
                    page_set: page_set_item,
                    page_area: None,
                    content_area: None,
                }
            }
            None => {
                let page_set_item = match page_area.and_then(|pa| doc.form.parent(pa)) {
                    Some(ps) if Some(ps) != self.page_set_root => {
                        let item = doc.items.create(ItemKind::PageSet, Some(ps), doc.form.template(ps), self.pass);
                        self.page_set_items.insert(ps, item);
                        doc.items.append_child(root, item);
                        item
                    }
                    _ => root,
                };
                ViewRecord {
                    page_set: page_set_item,
                    page_area: None,
                    content_area: None,
                }
            }
        };
        self.records.push(record);
        self.records.len() - 1
    }

    fn create_view_record_simple(&mut self, doc: &mut Document) -> usize {
        self.create_view_record(doc, None, false)
    }

    /// Realize a page for `page_area` under the record's page set, reusing
    /// a page left from the previous pass when there is one.
    fn add_page(&mut self, doc: &mut Document, record: usize, page_area: FormId) {
        let template = doc.form.template(page_area);
        let page = match self.pages.get(self.avail_pages).copied() {
            Some(page) => {
                let item = doc.items.item_mut(page);
                item.form = Some(page_area);
                item.template = template;
                item.pass = self.pass;
                page
            }
            None => {
                let page = doc.items.create(ItemKind::PageArea, Some(page_area), template, self.pass);
                self.pages.push(page);
                doc.items.push_event(LayoutEvent::Page {
                    page,
                    event: PageEvent::Created,
                });
                page
            }
        };
        self.avail_pages += 1;
        let (width, height) = doc.template.page_size(template);
        doc.items.set_pos(page, Point::default());
        doc.items.set_size(page, Size::new(width, height));
        doc.items.append_child(self.records[record].page_set, page);
        self.records[record].page_area = Some(page);
        self.records[record].content_area = None;
        tracing::debug!(page = self.avail_pages, name = doc.form.name(page_area), "page added");
    }

    fn add_content_area(&mut self, doc: &mut Document, record: usize, content_area: Option<FormId>) {
        let Some(ca) = content_area else {
            self.records[record].content_area = None;
            return;
        };
        let Some(page) = self.records[record].page_area else {
            return;
        };
        let item = doc.items.create(ItemKind::ContentArea, Some(ca), doc.form.template(ca), self.pass);
        place_content_area(doc, item, ca);
        doc.items.append_child(page, item);
        self.records[record].content_area = Some(item);
    }

    /// Reconcile page sets once content is exhausted: pad ordered sets to
    /// their minimum occurrences and give simplex/duplex sets their
    /// `last`/`only` page.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn finish_paginated_page_sets(&mut self, doc: &mut Document) {
        let mut ordered_done = false;
        for root in self.roots.clone() {
            for set_item in page_set_items_preorder(doc, root) {
                let Some(set_form) = doc.items.item(set_item).form else {
                    continue;
                };
                match doc.attrs(set_form).relation {
                    Some(Relation::SimplexPaginated) => {
                        self.finish_simplex_or_duplex(doc, set_item, set_form, PageSetMode::SimplexPaginated)
                    }
                    Some(Relation::DuplexPaginated) => {
                        self.finish_simplex_or_duplex(doc, set_item, set_form, PageSetMode::DuplexPaginated)
                    }
                    _ if !ordered_done => {
                        ordered_done = true;
                        self.process_last_page_set(doc);
                    }
                    _ => {}
                }
            }
        }
    }

    fn finish_simplex_or_duplex(&mut self, doc: &mut Document, set_item: LayoutId, set_form: FormId, mode: PageSetMode) {
        let page_items: Vec<LayoutId> = doc
            .items
            .children(set_item)
            .iter()
            .copied()
            .filter(|&c| doc.items.item(c).kind == ItemKind::PageArea)
            .collect();
        let Some(&last_item) = page_items.last() else {
            return;
        };
        let single = page_items.len() == 1;
        let position = if single { PagePosition::Only } else { PagePosition::Last };
        let found = self.find_simplex(doc, Some(set_form), None, None, None, Search::Finish, position)
            || (single && self.find_simplex(doc, Some(set_form), None, None, None, Search::Finish, PagePosition::Last));
        if !found {
            return;
        }
        let Some(node) = self.cur_page_area else {
            return;
        };

        let attrs = doc.attrs(node);
        if attrs.page_position() == PagePosition::Last {
            let odd_or_even = attrs.odd_or_even();
            let last_position = doc
                .items
                .item(last_item)
                .form
                .map(|f| doc.attrs(f).page_position())
                .unwrap_or_default();
            if last_position == PagePosition::First
                && (mode == PageSetMode::SimplexPaginated || odd_or_even != crate::model::OddOrEven::Odd)
            {
                self.append_page_for(doc, node);
                return;
            }
        }

        let used: Vec<f64> = doc
            .items
            .children(last_item)
            .iter()
            .filter(|&&c| doc.items.item(c).kind == ItemKind::ContentArea)
            .map(|&ca| {
                doc.items
                    .children(ca)
                    .iter()
                    .map(|&c| doc.items.item(c))
                    .filter(|i| i.kind == ItemKind::Content)
                    .map(|i| i.size.height)
                    .sum::<f64>()
            })
            .collect();
        let areas = content_areas(doc, node);
        let usable = areas
            .iter()
            .enumerate()
            .all(|(i, &ca)| used.get(i).map_or(true, |&u| u <= measure_h(doc, ca) + LAYOUT_PRECISION));

        if usable {
            let template = doc.form.template(node);
            let (width, height) = doc.template.page_size(template);
            {
                let item = doc.items.item_mut(last_item);
                item.form = Some(node);
                item.template = template;
                item.size = Size::new(width, height);
            }
            let area_items: Vec<LayoutId> = doc
                .items
                .children(last_item)
                .iter()
                .copied()
                .filter(|&c| doc.items.item(c).kind == ItemKind::ContentArea)
                .collect();
            for (item, ca) in area_items.into_iter().zip(areas) {
                let template = doc.form.template(ca);
                let it = doc.items.item_mut(item);
                it.form = Some(ca);
                it.template = template;
                place_content_area(doc, item, ca);
            }
            tracing::debug!(name = doc.form.name(node), "last page retargeted");
        } else if doc.attrs(node).page_position() == PagePosition::Last {
            self.append_page_for(doc, node);
        }
    }

    fn append_page_for(&mut self, doc: &mut Document, page_area: FormId) {
        let record = self.create_view_record_simple(doc);
        self.add_page(doc, record, page_area);
        self.add_content_area(doc, record, first_content_area(doc, page_area));
    }

    /// Drop pages the previous pass realized and this one did not, then
    /// forget the pass's records.
    pub fn finish_layout(&mut self, doc: &mut Document) {
        let keep = self.avail_pages.min(self.pages.len());
        let surplus = self.pages.split_off(keep);
        if !surplus.is_empty() {
            tracing::debug!(removed = surplus.len(), "surplus pages dropped");
        }
        for page in surplus {
            doc.items.push_event(LayoutEvent::Page {
                page,
                event: PageEvent::Removed,
            });
            self.dismantle(doc, page);
        }
        self.clear_data();
    }
}

/// Detach a content item and its descendants for reuse. Content the
/// layout engine generated is flagged unused so it can be regenerated.
fn retire_content(doc: &mut Document, item: LayoutId) {
    if let Some(form) = doc.items.item(item).form.filter(|&f| doc.form.contains(f)) {
        if doc.form.node(form).flags.layout_generated {
            doc.set_unused(form);
        }
    }
    for child in doc.items.take_children(item) {
        retire_content(doc, child);
    }
}

fn page_set_items_preorder(doc: &Document, root: LayoutId) -> Vec<LayoutId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(cur) = stack.pop() {
        out.push(cur);
        stack.extend(
            doc.items
                .children(cur)
                .iter()
                .rev()
                .copied()
                .filter(|&c| doc.items.item(c).kind == ItemKind::PageSet),
        );
    }
    out
}

fn place_content_area(doc: &mut Document, item: LayoutId, content_area: FormId) {
    let attrs = doc.attrs(content_area);
    let pt = |m: Option<crate::geometry::Measurement>| m.map_or(0.0, |m| m.to_pt());
    let pos = Point::new(pt(attrs.x), pt(attrs.y));
    let size = Size::new(pt(attrs.w), pt(attrs.h));
    doc.items.set_pos(item, pos);
    doc.items.set_size(item, size);
}

pub(crate) fn measure_h(doc: &Document, form: FormId) -> f64 {
    doc.attrs(form).h.map_or(0.0, |m| m.to_pt())
}

pub(crate) fn content_areas(doc: &Document, page_area: FormId) -> Vec<FormId> {
    doc.form
        .children(page_area)
        .iter()
        .copied()
        .filter(|&c| doc.form.element(c) == Element::ContentArea)
        .collect()
}

pub(crate) fn first_content_area(doc: &Document, page_area: FormId) -> Option<FormId> {
    doc.form
        .children(page_area)
        .iter()
        .copied()
        .find(|&c| doc.form.element(c) == Element::ContentArea)
}

/// Next sibling of `id` with the same element kind.
pub(crate) fn next_same_sibling(doc: &Document, id: FormId) -> Option<FormId> {
    let element = doc.form.element(id);
    let parent = doc.form.parent(id)?;
    let siblings = doc.form.children(parent);
    let pos = siblings.iter().position(|&c| c == id)?;
    siblings[pos + 1..]
        .iter()
        .copied()
        .find(|&c| doc.form.element(c) == element)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::geometry::Rect;

    // ─── Helpers ────────────────────────────────────────────────────

    pub(super) struct Pages {
        pub doc: Document,
        pub pages: PageLayoutManager,
        pub root: FormId,
    }

    impl Pages {
        pub fn new(template: &str) -> Self {
            let mut doc = Document::from_json(template, None).unwrap();
            let root = doc.merge().unwrap();
            let mut pages = PageLayoutManager::new();
            pages.init_layout_page(&mut doc, root, 1).unwrap();
            pages.prepare_first_page(&mut doc, root).unwrap();
            Self { doc, pages, root }
        }

        pub fn page_name(&self, index: usize) -> String {
            let page = self.pages.page(index).unwrap();
            let form = self.doc.items.item(page).form.unwrap();
            self.doc.form.name(form).to_string()
        }

        pub fn find(&self, name: &str) -> FormId {
            self.doc
                .form
                .descendants(self.root)
                .into_iter()
                .find(|&f| self.doc.form.name(f) == name)
                .unwrap()
        }
    }

    const TWO_AREAS: &str = r#"{ "element": "subform", "name": "root", "children": [
        { "element": "pageSet", "children": [
            { "element": "pageArea", "name": "small", "occur": { "max": 1 }, "children": [
                { "element": "contentArea", "name": "ca1", "w": 500, "h": 400 }
            ] },
            { "element": "pageArea", "name": "tall", "id": "tall", "children": [
                { "element": "contentArea", "name": "ca2", "w": 500, "h": 700 }
            ] }
        ] }
    ] }"#;

    #[test]
    fn test_default_page_is_realized() {
        let mut p = Pages::new(r#"{ "element": "subform", "name": "root" }"#);
        assert_eq!(p.pages.page_count(), 1);
        let page = p.pages.page(0).unwrap();
        assert_eq!(p.doc.items.item(page).rect(), Rect::new(0.0, 0.0, 612.0, 792.0));
        let areas = p.doc.items.children(page).to_vec();
        assert_eq!(areas.len(), 1);
        assert_eq!(p.doc.items.item(areas[0]).rect(), Rect::new(18.0, 18.0, 576.0, 756.0));
        assert_eq!(p.pages.avail_height(&mut p.doc), 756.0);
        assert_eq!(p.pages.page_index(page), Some(0));
    }

    #[test]
    fn test_page_area_repeats() {
        let mut p = Pages::new(r#"{ "element": "subform", "name": "root" }"#);
        assert!(p.pages.append_new_page(&mut p.doc, false));
        p.pages.submit_content_item(&mut p.doc, None, LayoutResult::PageFullBreak);
        assert_eq!(p.pages.page_count(), 2);
        let a = p.doc.items.item(p.pages.page(0).unwrap()).form;
        let b = p.doc.items.item(p.pages.page(1).unwrap()).form;
        assert_eq!(a, b);
        assert_eq!(p.pages.current, Some(1));
    }

    #[test]
    fn test_exhausted_page_area_moves_to_next() {
        let mut p = Pages::new(TWO_AREAS);
        p.pages.submit_content_item(&mut p.doc, None, LayoutResult::PageFullBreak);
        assert_eq!(p.pages.page_count(), 2);
        assert_eq!(p.page_name(0), "small");
        assert_eq!(p.page_name(1), "tall");
        assert_eq!(p.pages.avail_height(&mut p.doc), 700.0);
    }

    #[test]
    fn test_content_height_lookahead_does_not_mutate() {
        let mut p = Pages::new(TWO_AREAS);
        let records = p.pages.records().to_vec();
        let (area, count) = (p.pages.cur_page_area, p.pages.cur_page_count);

        assert!(p.pages.next_avail_content_height(&mut p.doc, 500.0));
        assert!(!p.pages.next_avail_content_height(&mut p.doc, 800.0));

        assert_eq!(p.pages.records(), records.as_slice());
        assert_eq!(p.pages.page_count(), 1);
        assert_eq!((p.pages.cur_page_area, p.pages.cur_page_count), (area, count));
    }

    #[test]
    fn test_break_targets_named_page_area() {
        let mut p = Pages::new(
            r##"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "children": [
                    { "element": "pageArea", "name": "a", "children": [ { "element": "contentArea", "w": 500, "h": 400 } ] },
                    { "element": "pageArea", "name": "b", "id": "pb", "children": [ { "element": "contentArea", "w": 500, "h": 300 } ] }
                ] },
                { "element": "subform", "name": "s", "children": [
                    { "element": "breakBefore", "targetType": "pageArea", "target": "#pb" }
                ] }
            ] }"##,
        );
        let s = p.find("s");
        let brk = p.doc.form.first_child(s).unwrap();
        // A targeted first break picks the first page itself.
        assert_eq!(p.pages.page_count(), 1);
        assert_eq!(p.page_name(0), "b");

        let data = p.pages.process_break_before(&mut p.doc, brk).unwrap();
        assert_eq!(data.leader, None);
        assert!(data.create_page);
    }

    #[test]
    fn test_unresolved_target_is_a_defect() {
        let mut p = Pages::new(
            r##"{ "element": "subform", "name": "root", "children": [
                { "element": "field", "name": "f", "h": 10 },
                { "element": "subform", "name": "s", "children": [
                    { "element": "breakAfter", "targetType": "pageArea", "target": "#nowhere" }
                ] }
            ] }"##,
        );
        let s = p.find("s");
        let brk = p.doc.form.first_child(s).unwrap();
        let data = p.pages.process_break_after(&mut p.doc, brk).unwrap();
        assert!(data.create_page);
        assert!(p
            .doc
            .defects
            .entries()
            .contains(&Defect::BrokenBreakOrOverflowTarget { target: "#nowhere".into() }));
    }

    #[test]
    fn test_degenerate_content_area_on_first_page() {
        let mut p = Pages::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "children": [
                    { "element": "pageArea", "children": [ { "element": "contentArea", "name": "flat", "w": 500 } ] }
                ] }
            ] }"#,
        );
        assert_eq!(p.pages.avail_height(&mut p.doc), 0.0);
        assert_eq!(p.pages.avail_height(&mut p.doc), 0.0);
        assert_eq!(
            p.doc.defects.entries(),
            &[Defect::InfeasibleContentArea { name: "flat".into() }]
        );
    }

    #[test]
    fn test_no_content_area_is_an_error() {
        let mut doc = Document::from_json(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "children": [ { "element": "pageArea" } ] }
            ] }"#,
            None,
        )
        .unwrap();
        let root = doc.merge().unwrap();
        let mut pages = PageLayoutManager::new();
        let err = pages.init_layout_page(&mut doc, root, 1).unwrap_err();
        assert!(matches!(err, FlowError::NoContentArea));
    }

    #[test]
    fn test_simplex_last_page_is_retargeted() {
        let mut p = Pages::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "relation": "simplexPaginated", "children": [
                    { "element": "pageArea", "name": "any", "children": [ { "element": "contentArea", "w": 500, "h": 700 } ] },
                    { "element": "pageArea", "name": "closing", "pagePosition": "last", "children": [ { "element": "contentArea", "w": 500, "h": 600 } ] }
                ] }
            ] }"#,
        );
        assert_eq!(p.pages.mode(), PageSetMode::SimplexPaginated);
        assert_eq!(p.page_name(0), "any");
        p.pages.finish_paginated_page_sets(&mut p.doc);
        assert_eq!(p.pages.page_count(), 1);
        assert_eq!(p.page_name(0), "closing");
        let page = p.pages.page(0).unwrap();
        let area = p.doc.items.children(page)[0];
        assert_eq!(p.doc.items.item(area).size.height, 600.0);
    }

    #[test]
    fn test_ordered_min_occurrence_is_padded() {
        let mut p = Pages::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "children": [
                    { "element": "pageArea", "name": "body", "occur": { "min": 1, "max": 1 }, "children": [ { "element": "contentArea", "w": 500, "h": 700 } ] },
                    { "element": "pageArea", "name": "appendix", "occur": { "min": 2, "max": 2 }, "children": [ { "element": "contentArea", "w": 500, "h": 700 } ] }
                ] }
            ] }"#,
        );
        p.pages.finish_paginated_page_sets(&mut p.doc);
        p.pages.finish_layout(&mut p.doc);
        assert_eq!(p.pages.page_count(), 3);
        assert_eq!(
            (0..3).map(|i| p.page_name(i)).collect::<Vec<_>>(),
            vec!["body", "appendix", "appendix"]
        );
    }
}
