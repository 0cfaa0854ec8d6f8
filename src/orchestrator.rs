//! # Layout Orchestrator
//!
//! Owns a merged [`Document`] and drives pagination one content area at a
//! time. A host calls [`LayoutOrchestrator::step`] until it reports
//! [`Progress::Done`], or [`LayoutOrchestrator::run`] to do it in one go.
//!
//! Each step asks the page manager for the height of the current content
//! area, resumes the root processor against it and submits what came out.
//! When the root reports done the pass is finished: page sets are
//! reconciled, page-area static content is laid out, pages left from the
//! previous pass are dropped and unreachable items are released. Layout
//! notifications are delivered at the end of every step.

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::config::LayoutConfig;
use crate::error::FlowError;
use crate::geometry::Point;
use crate::layout::{release_item, ContentLayoutProcessor, ItemKind, LayoutEnv, LayoutEvent, LayoutId, LayoutResult};
use crate::model::Document;
use crate::notify::{LayoutNotify, MeasureContent, NoNotify, TemplateMeasure};
use crate::page::PageLayoutManager;

/// Where a layout run stands after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More content remains; `pages` are realized so far.
    Continue { pages: usize },
    Done { pages: usize },
}

impl Progress {
    pub fn pages(self) -> usize {
        match self {
            Progress::Continue { pages } | Progress::Done { pages } => pages,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, Progress::Done { .. })
    }
}

pub struct LayoutOrchestrator<N: LayoutNotify = NoNotify> {
    doc: Document,
    pages: PageLayoutManager,
    measure: Box<dyn MeasureContent>,
    notify: N,
    config: LayoutConfig,
    root: Option<ContentLayoutProcessor>,
    pass: u32,
    steps: usize,
    needs_layout: bool,
    /// Content items the host has been told about and not yet told to drop.
    announced: FxHashSet<LayoutId>,
}

impl LayoutOrchestrator {
    pub fn new(doc: Document) -> Self {
        Self::with_notify(doc, NoNotify)
    }

    /// Parse and merge a template with optional data.
    pub fn from_json(template: &str, data: Option<&str>) -> Result<Self, FlowError> {
        Ok(Self::new(Document::from_json(template, data)?))
    }
}

impl<N: LayoutNotify> LayoutOrchestrator<N> {
    pub fn with_notify(mut doc: Document, notify: N) -> Self {
        if doc.root_subform().is_none() {
            doc.merge();
        }
        Self {
            doc,
            pages: PageLayoutManager::new(),
            measure: Box::new(TemplateMeasure),
            notify,
            config: LayoutConfig::default(),
            root: None,
            pass: 0,
            steps: 0,
            needs_layout: true,
            announced: FxHashSet::default(),
        }
    }

    pub fn with_measure(mut self, measure: Box<dyn MeasureContent>) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_config(mut self, config: LayoutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn notify(&self) -> &N {
        &self.notify
    }

    pub fn pages(&self) -> &PageLayoutManager {
        &self.pages
    }

    /// Begin a pass. Without `force` nothing happens while the last pass
    /// is still valid.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start_layout(&mut self, force: bool) -> Result<(), FlowError> {
        if !force && !self.needs_layout {
            return Ok(());
        }
        let root = self.doc.root_subform().ok_or(FlowError::MissingRootSubform)?;
        self.pass += 1;
        self.steps = 0;
        self.doc.ctx.reset_emitted();
        self.pages.init_layout_page(&mut self.doc, root, self.pass)?;
        self.pages.prepare_first_page(&mut self.doc, root)?;
        self.root = Some(ContentLayoutProcessor::new(&self.doc, root, true, self.pass));
        self.needs_layout = false;
        tracing::debug!(pass = self.pass, "layout pass started");
        Ok(())
    }

    /// Fill one content area, or finish the pass when content runs out.
    pub fn step(&mut self) -> Result<Progress, FlowError> {
        if self.root.is_none() {
            if !self.needs_layout {
                return Ok(Progress::Done {
                    pages: self.count_pages(),
                });
            }
            self.start_layout(false)?;
        }
        let Some(mut root) = self.root.take() else {
            return Ok(Progress::Done {
                pages: self.count_pages(),
            });
        };

        self.steps += 1;
        if self.steps > self.config.max_steps {
            self.needs_layout = true;
            return Err(FlowError::StepLimit(self.config.max_steps));
        }

        let origin = {
            let attrs = self.doc.attrs(root.form());
            let pt = |m: Option<crate::geometry::Measurement>| m.map_or(0.0, |m| m.to_pt());
            Point::new(pt(attrs.x), pt(attrs.y))
        };
        let mut env = LayoutEnv {
            doc: &mut self.doc,
            pages: &mut self.pages,
            measure: &*self.measure,
            pass: self.pass,
        };
        let height = env.pages.avail_height(env.doc);
        let result = root.do_layout(&mut env, true, height, height);
        let item = root.extract_item(&mut env);
        if let Some(item) = item {
            env.doc.items.set_pos(item, origin);
        }
        env.pages.submit_content_item(env.doc, item, result);

        let progress = if result == LayoutResult::Done {
            self.finish();
            Progress::Done {
                pages: self.count_pages(),
            }
        } else {
            self.root = Some(root);
            Progress::Continue {
                pages: self.count_pages(),
            }
        };
        self.deliver();
        Ok(progress)
    }

    /// Step until done. Returns the page count.
    pub fn run(&mut self) -> Result<usize, FlowError> {
        loop {
            if let Progress::Done { pages } = self.step()? {
                return Ok(pages);
            }
        }
    }

    /// Throw away the current pass; the next step starts over.
    pub fn force_relayout(&mut self) {
        self.root = None;
        self.needs_layout = true;
    }

    /// Merge the data again from scratch and schedule a relayout.
    pub fn remerge(&mut self) {
        self.doc.remerge();
        self.force_relayout();
    }

    pub fn count_pages(&self) -> usize {
        self.pages.page_count()
    }

    fn finish(&mut self) {
        self.pages.finish_paginated_page_sets(&mut self.doc);
        let mut env = LayoutEnv {
            doc: &mut self.doc,
            pages: &mut self.pages,
            measure: &*self.measure,
            pass: self.pass,
        };
        for index in 0..env.pages.page_count() {
            if let Some(page) = env.pages.page(index) {
                ContentLayoutProcessor::layout_page_area(&mut env, page);
            }
        }
        self.pages.finish_layout(&mut self.doc);
        self.doc.prune_unused();
        let released = self.sweep();
        tracing::debug!(pages = self.count_pages(), released, "layout pass finished");
    }

    /// Release every item no longer reachable from the page tree.
    fn sweep(&mut self) -> usize {
        let mut reachable = FxHashSet::default();
        let mut stack: Vec<LayoutId> = self.pages.roots().to_vec();
        while let Some(id) = stack.pop() {
            if !self.doc.items.contains(id) || !reachable.insert(id) {
                continue;
            }
            stack.extend_from_slice(self.doc.items.children(id));
        }
        let orphans: Vec<LayoutId> = self
            .doc
            .items
            .ids()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .collect();
        for &id in &orphans {
            release_item(&mut self.doc, id);
        }
        orphans.len()
    }

    /// Forward queued layout events. Items created and released within the
    /// same step are never announced.
    fn deliver(&mut self) {
        let events = self.doc.items.drain_events();
        let removed: FxHashSet<LayoutId> = events
            .iter()
            .filter_map(|e| match e {
                LayoutEvent::ItemRemoving { item, .. } => Some(*item),
                _ => None,
            })
            .collect();
        for event in events {
            match event {
                LayoutEvent::ItemAdded(item) => {
                    if !removed.contains(&item) && self.announced.insert(item) {
                        self.notify.on_layout_item_added(&self.doc, item);
                    }
                }
                LayoutEvent::ItemRemoving { item, form } => {
                    if self.announced.remove(&item) {
                        self.notify.on_layout_item_removing(&self.doc, item, form);
                    }
                }
                LayoutEvent::Page { page, event } => self.notify.on_page_event(page, event),
            }
        }
    }

    /// Snapshot of one realized page.
    pub fn page(&self, index: usize) -> Option<PageView> {
        let page = self.pages.page(index)?;
        let doc = &self.doc;
        let item = doc.items.get(page)?;
        let page_area = item.form.map(|f| doc.form.name(f).to_string()).unwrap_or_default();

        let mut content_areas = Vec::new();
        let mut boxes = Vec::new();
        let mut stack: Vec<LayoutId> = doc.items.children(page).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let it = doc.items.item(id);
            match it.kind {
                ItemKind::ContentArea => content_areas.push(AreaView {
                    name: it.form.map(|f| doc.form.name(f).to_string()).unwrap_or_default(),
                    x: it.pos.x,
                    y: it.pos.y,
                    width: it.size.width,
                    height: it.size.height,
                }),
                ItemKind::Content => {
                    if let Some(form) = it.form.filter(|&f| doc.form.contains(f)) {
                        let node = doc.form.node(form);
                        let pos = doc.items.absolute_pos(id, &doc.template);
                        let chain = node.layout_item.map(|h| doc.items.chain(h).len()).unwrap_or(1);
                        boxes.push(BoxView {
                            name: node.name.clone(),
                            element: node.element.name(),
                            x: pos.x,
                            y: pos.y,
                            width: it.size.width,
                            height: it.size.height,
                            value: node.value.clone().or_else(|| doc.attrs(form).value.clone()),
                            part: (chain > 1).then(|| doc.items.chain_index(id)),
                        });
                    }
                }
                ItemKind::PageSet | ItemKind::PageArea => {}
            }
            stack.extend(doc.items.children(id).iter().rev().copied());
        }

        Some(PageView {
            index,
            page_area,
            width: item.size.width,
            height: item.size.height,
            content_areas,
            boxes,
        })
    }

    pub fn summary(&self) -> PageSummary {
        PageSummary {
            page_count: self.count_pages(),
            pages: (0..self.count_pages()).filter_map(|i| self.page(i)).collect(),
            defects: self.doc.defects.entries().iter().map(|d| d.to_string()).collect(),
        }
    }
}

// ── Serializable layout snapshot ────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page_count: usize,
    pub pages: Vec<PageView>,
    pub defects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub index: usize,
    pub page_area: String,
    pub width: f64,
    pub height: f64,
    pub content_areas: Vec<AreaView>,
    /// Content boxes in document order, absolutely positioned.
    pub boxes: Vec<BoxView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaView {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxView {
    pub name: String,
    pub element: &'static str,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Position in the split chain, for content cut across pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<usize>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::notify::EventLog;

    // ─── Helpers ────────────────────────────────────────────────────

    fn fields(count: usize, height: f64) -> String {
        let children: Vec<String> = (0..count)
            .map(|i| format!(r#"{{ "element": "field", "name": "f{i}", "w": 100, "h": {height} }}"#))
            .collect();
        format!(
            r#"{{ "element": "subform", "name": "root", "layout": "tb", "children": [
                {{ "element": "pageSet", "children": [
                    {{ "element": "pageArea", "name": "page", "children": [ {{ "element": "contentArea", "w": 500, "h": 700 }} ] }}
                ] }},
                {children}
            ] }}"#,
            children = children.join(",")
        )
    }

    fn logged(template: &str) -> LayoutOrchestrator<EventLog> {
        let doc = Document::from_json(template, None).unwrap();
        LayoutOrchestrator::with_notify(doc, EventLog::default())
    }

    #[test]
    fn test_steps_one_content_area_at_a_time() {
        let mut orch = LayoutOrchestrator::from_json(&fields(5, 300.0), None).unwrap();
        assert_eq!(orch.step().unwrap(), Progress::Continue { pages: 2 });
        assert_eq!(orch.step().unwrap(), Progress::Continue { pages: 3 });
        assert_eq!(orch.step().unwrap(), Progress::Done { pages: 3 });
        assert_eq!(orch.step().unwrap(), Progress::Done { pages: 3 });
    }

    #[test]
    fn test_step_limit_stops_the_run() {
        let mut orch = LayoutOrchestrator::from_json(&fields(5, 300.0), None)
            .unwrap()
            .with_config(LayoutConfig {
                max_steps: 1,
                ..LayoutConfig::default()
            });
        assert!(orch.step().is_ok());
        let err = orch.step().unwrap_err();
        assert!(matches!(err, FlowError::StepLimit(1)));
    }

    #[test]
    fn test_relayout_reuses_pages() {
        let mut orch = logged(&fields(5, 300.0));
        assert_eq!(orch.run().unwrap(), 3);
        assert_eq!(orch.notify().pages_created(), 3);

        orch.force_relayout();
        assert_eq!(orch.run().unwrap(), 3);
        assert_eq!(orch.notify().pages_created(), 3);
        assert_eq!(orch.notify().pages_removed(), 0);
    }

    #[test]
    fn test_fewer_pages_after_remerge_are_removed() {
        let template = r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
            { "element": "pageSet", "children": [
                { "element": "pageArea", "children": [ { "element": "contentArea", "w": 500, "h": 700 } ] }
            ] },
            { "element": "subform", "name": "row", "occur": { "min": 0, "max": -1 }, "children": [
                { "element": "field", "name": "v", "w": 100, "h": 300 }
            ] }
        ] }"#;
        let doc = Document::from_json(
            template,
            Some(r#"{ "row": [ { "v": "a" }, { "v": "b" }, { "v": "c" }, { "v": "d" } ] }"#),
        )
        .unwrap();
        let mut orch = LayoutOrchestrator::with_notify(doc, EventLog::default());
        assert_eq!(orch.run().unwrap(), 2);

        orch.doc.data = crate::model::DataTree::from_json(r#"{ "row": [ { "v": "a" } ] }"#).unwrap();
        orch.remerge();
        assert_eq!(orch.run().unwrap(), 1);
        assert_eq!(orch.notify().pages_removed(), 1);
    }

    #[test]
    fn test_added_items_are_announced_once() {
        let mut orch = logged(&fields(2, 100.0));
        orch.run().unwrap();
        let added = orch.notify().items_added();
        assert!(added >= 3);
        orch.force_relayout();
        orch.run().unwrap();
        let announced: Vec<_> = orch
            .notify()
            .events
            .iter()
            .filter_map(|e| match e {
                LayoutEvent::ItemAdded(id) => Some(*id),
                _ => None,
            })
            .collect();
        let unique: FxHashSet<_> = announced.iter().copied().collect();
        assert_eq!(unique.len(), announced.len());
    }

    #[test]
    fn test_page_view_lists_boxes() {
        let mut orch = LayoutOrchestrator::from_json(&fields(2, 100.0), None).unwrap();
        orch.run().unwrap();
        let view = orch.page(0).unwrap();
        assert_eq!(view.page_area, "page");
        assert_eq!((view.width, view.height), (612.0, 792.0));
        assert_eq!(view.content_areas.len(), 1);
        let fields: Vec<(&str, f64)> = view
            .boxes
            .iter()
            .filter(|b| b.element == "field")
            .map(|b| (b.name.as_str(), b.y))
            .collect();
        assert_eq!(fields, vec![("f0", 0.0), ("f1", 100.0)]);
        assert!(orch.page(1).is_none());
    }
}
