//! Choosing the next page area and content area.

use super::{first_content_area, measure_h, next_same_sibling, PageLayoutManager, PageSetMode, Search};
use crate::geometry::LAYOUT_PRECISION;
use crate::model::{Document, Element, FormId, OddOrEven, PagePosition};

fn explicit_max(doc: &Document, form: FormId) -> Option<i32> {
    doc.template.explicit_max(doc.form.template(form))
}

fn explicit_min(doc: &Document, form: FormId) -> Option<i32> {
    doc.template.explicit_min(doc.form.template(form))
}

fn siblings_after(doc: &Document, node: FormId) -> Vec<FormId> {
    let Some(parent) = doc.form.parent(node) else {
        return Vec::new();
    };
    let siblings = doc.form.children(parent);
    match siblings.iter().position(|&c| c == node) {
        Some(pos) => siblings[pos + 1..].to_vec(),
        None => Vec::new(),
    }
}

impl PageLayoutManager {
    /// Advance to the next content area, opening a new page when the
    /// current one has no more. Returns the page area now current.
    pub(crate) fn next_avail_page_area(
        &mut self,
        doc: &mut Document,
        target_pa: Option<FormId>,
        target_ca: Option<FormId>,
        new_page: bool,
        search: Search,
    ) -> Option<FormId> {
        let Some(cur) = self.cur_page_area else {
            self.find_page_area(doc, self.page_set_root, None, target_pa, target_ca, new_page, search);
            return self.cur_page_area;
        };

        if target_pa.map_or(true, |t| t == cur) {
            if !new_page && self.next_content_area(doc, target_ca, search) {
                return Some(cur);
            }
            if self.is_ordered() {
                let max = explicit_max(doc, cur).unwrap_or(-1);
                if max < 0 || self.cur_page_count < max {
                    if search.commits() {
                        let record = self.create_view_record(doc, Some(cur), false);
                        self.add_page(doc, record, cur);
                        let ca = target_ca.or_else(|| first_content_area(doc, cur));
                        self.add_content_area(doc, record, ca);
                    }
                    self.cur_page_count += 1;
                    return Some(cur);
                }
            }
        }

        if search.commits() && self.is_ordered() {
            self.create_min_page_record(doc, Some(cur), false, true);
        }
        let parent = doc.form.parent(cur);
        if self.find_page_area(doc, parent, Some(cur), target_pa, target_ca, new_page, search) {
            return self.cur_page_area;
        }

        let mut page_set = doc.form.parent(cur);
        while let Some(ps) = page_set {
            if self.find_page_area(doc, Some(ps), None, target_pa, target_ca, new_page, search) {
                return self.cur_page_area;
            }
            if search.commits() && self.is_ordered() {
                self.create_min_page_set_record(doc, ps, false);
            }
            if self.find_page_area(doc, None, Some(ps), target_pa, target_ca, new_page, search) {
                return self.cur_page_area;
            }
            if Some(ps) == self.page_set_root {
                break;
            }
            page_set = doc.form.parent(ps);
        }
        None
    }

    /// Move to another content area of the current page. Without a target
    /// this is the next content area in document order.
    fn next_content_area(&mut self, doc: &mut Document, target_ca: Option<FormId>, search: Search) -> bool {
        let current_ca = self.record_form(doc, |r| r.content_area);
        let target = match target_ca {
            None => {
                let Some(next) = current_ca.and_then(|ca| next_same_sibling(doc, ca)) else {
                    return false;
                };
                next
            }
            Some(target) => {
                if doc.form.parent(target) != self.cur_page_area {
                    return false;
                }
                let page = self.current_record().and_then(|r| r.page_area);
                let realized = page.and_then(|page| {
                    doc.items
                        .children(page)
                        .iter()
                        .copied()
                        .find(|&c| doc.items.item(c).form == Some(target))
                });
                if let Some(item) = realized {
                    if doc.items.has_children(item) || Some(target) == current_ca {
                        return false;
                    }
                    if search.commits() {
                        let record = self.create_view_record_simple(doc);
                        self.records[record].content_area = Some(item);
                    }
                    return true;
                }
                target
            }
        };
        if search.commits() {
            let record = self.create_view_record_simple(doc);
            self.add_content_area(doc, record, Some(target));
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_page_area(
        &mut self,
        doc: &mut Document,
        page_set: Option<FormId>,
        start: Option<FormId>,
        target_pa: Option<FormId>,
        target_ca: Option<FormId>,
        new_page: bool,
        search: Search,
    ) -> bool {
        if page_set.is_none() && start.is_none() {
            return false;
        }
        if self.is_ordered() {
            self.find_ordered(doc, page_set, start, target_pa, target_ca, new_page, search)
        } else {
            let preferred = if self.current.is_some() {
                PagePosition::Rest
            } else {
                PagePosition::First
            };
            self.find_simplex(doc, page_set, start, target_pa, target_ca, search, preferred)
        }
    }

    /// Ordered search: the first eligible page area after `start`, or in
    /// `page_set` when `start` is none. Page areas and page sets skipped
    /// over are padded to their minimum occurrence.
    #[allow(clippy::too_many_arguments)]
    fn find_ordered(
        &mut self,
        doc: &mut Document,
        page_set: Option<FormId>,
        start: Option<FormId>,
        mut target_pa: Option<FormId>,
        target_ca: Option<FormId>,
        new_page: bool,
        search: Search,
    ) -> bool {
        let Some(page_set) = page_set.or_else(|| start.and_then(|s| doc.form.parent(s))) else {
            return false;
        };
        let candidates = match start {
            Some(s) => siblings_after(doc, s),
            None => doc.form.children(page_set).to_vec(),
        };
        let count = self.page_set_counts.get(&page_set).copied().unwrap_or(0);
        if start.is_none() && search.commits() {
            if let Some(max) = explicit_max(doc, page_set).filter(|&m| m >= 0) {
                if max <= count {
                    return false;
                }
            }
        }

        let mut found = false;
        for node in candidates {
            match doc.form.element(node) {
                Element::PageArea => {
                    if target_pa.map_or(true, |t| t == node) {
                        if first_content_area(doc, node).is_none() {
                            if target_pa == Some(node) && search.pads() {
                                self.create_min_page_record(doc, Some(node), true, false);
                                target_pa = None;
                            }
                            continue;
                        }
                        if search.commits() {
                            let record = self.create_view_record(doc, Some(node), start.is_none());
                            self.add_page(doc, record, node);
                            let ca = target_ca.or_else(|| first_content_area(doc, node));
                            self.add_content_area(doc, record, ca);
                        }
                        self.cur_page_area = Some(node);
                        self.cur_page_count = 1;
                        found = true;
                        break;
                    }
                    if search.commits() {
                        self.create_min_page_record(doc, Some(node), false, false);
                    }
                }
                Element::PageSet => {
                    if self.find_ordered(doc, Some(node), None, target_pa, target_ca, new_page, search) {
                        found = true;
                        break;
                    }
                    if search.commits() {
                        self.create_min_page_set_record(doc, node, true);
                    }
                }
                _ => {}
            }
        }

        if start.is_none() && found && search.commits() {
            self.page_set_counts.insert(page_set, count + 1);
        }
        found
    }

    /// Simplex/duplex search: the page area whose `pagePosition` matches
    /// `preferred` and whose parity fits the next page, falling back to the
    /// first `any` page area.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_simplex(
        &mut self,
        doc: &mut Document,
        page_set: Option<FormId>,
        start: Option<FormId>,
        mut target_pa: Option<FormId>,
        target_ca: Option<FormId>,
        search: Search,
        preferred: PagePosition,
    ) -> bool {
        let Some(parent) = page_set.or_else(|| start.and_then(|s| doc.form.parent(s))) else {
            return false;
        };
        let candidates = match start {
            Some(s) if doc.form.element(s) != Element::PageArea => siblings_after(doc, s),
            _ => doc.form.children(parent).to_vec(),
        };

        let mut chosen = None;
        let mut fallback = None;
        for node in candidates {
            match doc.form.element(node) {
                Element::PageArea => {
                    if !self.match_odd_or_even(doc, node) {
                        continue;
                    }
                    let attrs = doc.attrs(node);
                    let (position, parity) = (attrs.page_position(), attrs.odd_or_even());
                    match preferred {
                        PagePosition::Last => {
                            if position != PagePosition::Last {
                                continue;
                            }
                            if self.mode == PageSetMode::SimplexPaginated || parity == OddOrEven::Any {
                                chosen = Some(node);
                                break;
                            }
                            if search.pads() {
                                self.append_page_for(doc, node);
                            }
                            return false;
                        }
                        PagePosition::Only => {
                            if position != PagePosition::Only {
                                continue;
                            }
                            if self.mode != PageSetMode::DuplexPaginated || parity == OddOrEven::Any {
                                chosen = Some(node);
                                break;
                            }
                            return false;
                        }
                        _ => {}
                    }

                    if target_pa.map_or(true, |t| t == node) {
                        if first_content_area(doc, node).is_none() {
                            if target_pa == Some(node) && search.pads() {
                                let record = self.create_view_record_simple(doc);
                                self.add_page(doc, record, node);
                                target_pa = None;
                            }
                            continue;
                        }
                        if (preferred == PagePosition::Rest && position == PagePosition::Any) || position == preferred {
                            chosen = Some(node);
                            break;
                        }
                        if position == PagePosition::Any && fallback.is_none() {
                            fallback = Some(node);
                        }
                    } else if let Some(target) = target_pa {
                        if search.pads() && !self.match_odd_or_even(doc, target) {
                            self.append_page_for(doc, node);
                        }
                    }
                }
                Element::PageSet => {
                    if self.find_simplex(doc, Some(node), None, target_pa, target_ca, search, preferred) {
                        return true;
                    }
                }
                _ => {}
            }
        }

        let Some(node) = chosen.or(fallback) else {
            return false;
        };
        if search.commits() {
            let record = self.create_view_record_simple(doc);
            self.add_page(doc, record, node);
            let ca = target_ca.or_else(|| first_content_area(doc, node));
            self.add_content_area(doc, record, ca);
        }
        self.cur_page_area = Some(node);
        true
    }

    /// Whether `page_area` may be the next page given its `oddOrEven`.
    /// Only duplex page sets care; page numbers count from one.
    fn match_odd_or_even(&self, doc: &Document, page_area: FormId) -> bool {
        if self.mode != PageSetMode::DuplexPaginated {
            return true;
        }
        let count = self.avail_pages;
        match doc.attrs(page_area).odd_or_even() {
            OddOrEven::Any => true,
            OddOrEven::Odd => count % 2 == 0,
            OddOrEven::Even => count % 2 == 1,
        }
    }

    /// Pad `page_area` up to its `occur.min`. With `create_last` the pages
    /// already used in the current run count toward it.
    pub(super) fn create_min_page_record(
        &mut self,
        doc: &mut Document,
        page_area: Option<FormId>,
        target: bool,
        create_last: bool,
    ) -> i32 {
        let Some(page_area) = page_area else {
            return 0;
        };
        let declared = explicit_min(doc, page_area);
        if declared.is_none() && !target {
            return 0;
        }
        let content_area = first_content_area(doc, page_area);
        let mut min = declared.unwrap_or(0);
        if min < 1 && target && content_area.is_none() {
            min = 1;
        }
        let from = if create_last { self.cur_page_count } else { 0 };
        for _ in from..min {
            let record = self.create_view_record_simple(doc);
            self.add_page(doc, record, page_area);
            self.add_content_area(doc, record, content_area);
        }
        min
    }

    pub(super) fn create_min_page_set_record(&mut self, doc: &mut Document, page_set: FormId, create_all: bool) {
        let Some(&count) = self.page_set_counts.get(&page_set) else {
            return;
        };
        let count = if create_all { 0 } else { count };
        let Some(min) = explicit_min(doc, page_set).filter(|&m| m > count) else {
            return;
        };
        let children = doc.form.children(page_set).to_vec();
        for _ in 0..min - count {
            for &child in &children {
                match doc.form.element(child) {
                    Element::PageArea => {
                        self.create_min_page_record(doc, Some(child), false, false);
                    }
                    Element::PageSet => self.create_min_page_set_record(doc, child, true),
                    _ => {}
                }
            }
        }
        self.page_set_counts.insert(page_set, min);
    }

    fn create_next_min_record(&mut self, doc: &mut Document, node: FormId) {
        for sibling in siblings_after(doc, node) {
            match doc.form.element(sibling) {
                Element::PageArea => {
                    self.create_min_page_record(doc, Some(sibling), false, false);
                }
                Element::PageSet => self.create_min_page_set_record(doc, sibling, true),
                _ => {}
            }
        }
    }

    /// Pad everything after the current page area, up to the root page
    /// set, to its minimum occurrence.
    pub(super) fn process_last_page_set(&mut self, doc: &mut Document) {
        let Some(cur) = self.cur_page_area else {
            return;
        };
        self.create_min_page_record(doc, Some(cur), false, true);
        self.create_next_min_record(doc, cur);
        let mut page_set = doc.form.parent(cur);
        while let Some(ps) = page_set {
            self.create_min_page_set_record(doc, ps, false);
            if Some(ps) == self.page_set_root {
                break;
            }
            self.create_next_min_record(doc, ps);
            page_set = doc.form.parent(ps);
        }
    }

    /// Whether the content area after the current one is taller than
    /// `height`. Looks ahead without changing pagination state.
    pub fn next_avail_content_height(&mut self, doc: &mut Document, height: f64) -> bool {
        let Some(ca) = self.record_form(doc, |r| r.content_area) else {
            return false;
        };
        if let Some(next) = next_same_sibling(doc, ca) {
            return measure_h(doc, next) > height;
        }
        let Some(page) = self.record_form(doc, |r| r.page_area) else {
            return false;
        };
        if explicit_max(doc, page).is_some_and(|max| max == self.cur_page_count) {
            let saved = (self.cur_page_area, self.cur_page_count);
            let next = self.next_avail_page_area(doc, None, None, false, Search::Peek);
            (self.cur_page_area, self.cur_page_count) = saved;
            return next
                .and_then(|pa| first_content_area(doc, pa))
                .is_some_and(|next_ca| measure_h(doc, next_ca) > height);
        }
        let next_h = first_content_area(doc, page).map_or(0.0, |c| measure_h(doc, c));
        next_h < LAYOUT_PRECISION || next_h > height
    }
}
