//! Seams to the host: layout notifications and content measurement.
//!
//! The engine never measures text or draws anything itself. Widget sizes
//! come from a [`MeasureContent`] implementation and structural changes are
//! reported through [`LayoutNotify`] once per orchestrator step.

use crate::geometry::Size;
use crate::layout::{LayoutEvent, LayoutId, PageEvent};
use crate::model::{Document, Element, FormId};

/// Receives layout changes. Every method defaults to doing nothing.
pub trait LayoutNotify {
    fn on_layout_item_added(&mut self, _doc: &Document, _item: LayoutId) {}

    fn on_layout_item_removing(&mut self, _doc: &Document, _item: LayoutId, _form: Option<FormId>) {}

    fn on_page_event(&mut self, _page: LayoutId, _event: PageEvent) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNotify;

impl LayoutNotify for NoNotify {}

/// Records every event in order.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    pub events: Vec<LayoutEvent>,
}

impl EventLog {
    pub fn pages_created(&self) -> usize {
        self.count(|e| matches!(e, LayoutEvent::Page { event: PageEvent::Created, .. }))
    }

    pub fn pages_removed(&self) -> usize {
        self.count(|e| matches!(e, LayoutEvent::Page { event: PageEvent::Removed, .. }))
    }

    pub fn items_added(&self) -> usize {
        self.count(|e| matches!(e, LayoutEvent::ItemAdded(_)))
    }

    fn count(&self, f: impl Fn(&LayoutEvent) -> bool) -> usize {
        self.events.iter().filter(|e| f(e)).count()
    }
}

impl LayoutNotify for EventLog {
    fn on_layout_item_added(&mut self, _doc: &Document, item: LayoutId) {
        self.events.push(LayoutEvent::ItemAdded(item));
    }

    fn on_layout_item_removing(&mut self, _doc: &Document, item: LayoutId, form: Option<FormId>) {
        self.events.push(LayoutEvent::ItemRemoving { item, form });
    }

    fn on_page_event(&mut self, page: LayoutId, event: PageEvent) {
        self.events.push(LayoutEvent::Page { page, event });
    }
}

/// Sizes widget content (fields and draws).
pub trait MeasureContent {
    /// Natural size of `form`. A `Some` width or height is a fixed
    /// constraint the result must honour on that axis.
    fn measure(&self, doc: &Document, form: FormId, width: Option<f64>, height: Option<f64>) -> Size;

    /// Where the `chain_index`-th piece of `form` may be cut at or above
    /// `proposed`, relative to its top. `None` means the widget has no
    /// opinion and its children decide.
    fn find_split_pos(&self, doc: &Document, form: FormId, chain_index: usize, proposed: f64) -> Option<f64>;
}

/// Sizes from the template's `w`/`h`, clamped by `minW`..`maxW` and
/// `minH`..`maxH`. Widgets cannot be cut; they move whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateMeasure;

impl MeasureContent for TemplateMeasure {
    fn measure(&self, doc: &Document, form: FormId, width: Option<f64>, height: Option<f64>) -> Size {
        let attrs = doc.attrs(form);
        let pt = |m: Option<crate::geometry::Measurement>| m.map(|m| m.to_pt());
        let axis = |fixed: Option<f64>, own: Option<f64>, min: Option<f64>, max: Option<f64>| {
            if let Some(v) = fixed {
                return v.max(0.0);
            }
            let mut v = own.unwrap_or(0.0);
            if let Some(min) = min {
                v = v.max(min);
            }
            if let Some(max) = max.filter(|&m| m > 0.0) {
                v = v.min(max);
            }
            v
        };
        Size::new(
            axis(width, pt(attrs.w), pt(attrs.min_w), pt(attrs.max_w)),
            axis(height, pt(attrs.h), pt(attrs.min_h), pt(attrs.max_h)),
        )
    }

    fn find_split_pos(&self, doc: &Document, form: FormId, _chain_index: usize, _proposed: f64) -> Option<f64> {
        match doc.form.element(form) {
            Element::Field | Element::Draw => Some(0.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_doc(attrs: &str) -> (Document, FormId) {
        let template = format!(
            r#"{{ "element": "subform", "name": "root", "children": [ {{ "element": "field", "name": "f", {attrs} }} ] }}"#
        );
        let mut doc = Document::from_json(&template, None).unwrap();
        let root = doc.merge().unwrap();
        let field = doc
            .form
            .children(root)
            .iter()
            .copied()
            .find(|&c| doc.form.element(c) == Element::Field)
            .unwrap();
        (doc, field)
    }

    #[test]
    fn test_template_measure_clamps() {
        let (doc, f) = field_doc(r#""w": "1in", "minH": 20, "maxW": 50"#);
        let size = TemplateMeasure.measure(&doc, f, None, None);
        assert_eq!(size, Size::new(50.0, 20.0));
        let fixed = TemplateMeasure.measure(&doc, f, Some(30.0), Some(10.0));
        assert_eq!(fixed, Size::new(30.0, 10.0));
    }

    #[test]
    fn test_widgets_do_not_split() {
        let (doc, f) = field_doc(r#""h": 40"#);
        assert_eq!(TemplateMeasure.find_split_pos(&doc, f, 0, 25.0), Some(0.0));
        let root = doc.root_subform().unwrap();
        assert_eq!(TemplateMeasure.find_split_pos(&doc, root, 0, 25.0), None);
    }

    #[test]
    fn test_event_log_counts() {
        let mut log = EventLog::default();
        let page = slotmap::KeyData::from_ffi(1).into();
        log.on_page_event(page, PageEvent::Created);
        log.on_page_event(page, PageEvent::Removed);
        assert_eq!(log.pages_created(), 1);
        assert_eq!(log.pages_removed(), 1);
        assert_eq!(log.items_added(), 0);
    }
}
