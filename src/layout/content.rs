//! # Content Layout
//!
//! A [`ContentLayoutProcessor`] lays out one form container and, through
//! child processors, its subtree. Positioned, table and widget layouts
//! complete in one call. Flowed layouts (see [`super::flow`]) are
//! resumable: when the available height runs out the processor returns a
//! break result, the caller takes the finished part with
//! [`ContentLayoutProcessor::extract_item`], and the next call continues
//! where the previous one stopped.
//!
//! Items from the previous pass are recycled in chain order before new
//! ones are allocated; whatever is left when the processor finishes is
//! released.

use std::collections::VecDeque;

use super::page_break::{declared_layout, layout_strategy, requires_space, subform_set_parent};
use super::stage::{ChildCursor, Stage};
use super::{release_item, Context, ItemKind, LayoutEnv, LayoutId, LayoutResult};
use crate::geometry::{Point, Size, LAYOUT_PRECISION, UNBOUNDED};
use crate::model::{Document, Element, FormId, HAlign, LayoutStrategy};

/// Maps an anchor point through a quarter-turn rotation.
const ANCHOR_ROTATION: [[usize; 9]; 4] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8],
    [6, 3, 0, 7, 4, 1, 8, 5, 2],
    [8, 7, 6, 5, 4, 3, 2, 1, 0],
    [2, 5, 8, 1, 4, 7, 0, 3, 6],
];

#[derive(Debug)]
pub struct ContentLayoutProcessor {
    pub(super) form: FormId,
    /// Whether break, bookend and overflow processing consults the page
    /// manager. Leaders, trailers and page-area content are laid out
    /// without it.
    pub(super) paginated: bool,
    /// Item being built, or the next part to hand out.
    pub(super) item: Option<LayoutId>,
    pub(super) old_items: VecDeque<LayoutId>,
    /// Later parts of a split whose first part had no parent.
    pub(super) continuations: VecDeque<LayoutId>,
    pub(super) cursor: ChildCursor,
    pub(super) pending: VecDeque<FormId>,
    pub(super) break_pending: bool,
    pub(super) keep_items: Vec<LayoutId>,
    pub(super) column_widths: Vec<f64>,
    pub(super) used_size: f64,
    pub(super) last_row_width: f64,
    pub(super) last_row_y: f64,
    pub(super) width_limit: f64,
    pub(super) use_inherited: bool,
    pub(super) has_avail_height: bool,
    pub(super) pre_result: LayoutResult,
    /// Child suspended by a page or row break.
    pub(super) child: Option<Box<ContentLayoutProcessor>>,
}

impl ContentLayoutProcessor {
    pub fn new(doc: &Document, form: FormId, paginated: bool, pass: u32) -> Self {
        let old_items = doc
            .form
            .node(form)
            .layout_item
            .filter(|&head| doc.items.contains(head))
            .map(|head| doc.items.chain(head))
            .unwrap_or_default()
            .into_iter()
            .filter(|&id| doc.items.item(id).pass < pass)
            .collect();
        Self {
            form,
            paginated,
            item: None,
            old_items,
            continuations: VecDeque::new(),
            cursor: ChildCursor::default(),
            pending: VecDeque::new(),
            break_pending: false,
            keep_items: Vec::new(),
            column_widths: Vec::new(),
            used_size: 0.0,
            last_row_width: 0.0,
            last_row_y: 0.0,
            width_limit: 0.0,
            use_inherited: false,
            has_avail_height: true,
            pre_result: LayoutResult::Done,
            child: None,
        }
    }

    pub fn form(&self) -> FormId {
        self.form
    }

    pub fn has_item(&self) -> bool {
        self.item.is_some()
    }

    pub fn stage(&self) -> Stage {
        self.cursor.stage
    }

    /// Lay out as much of the container as fits in `height_limit`.
    #[tracing::instrument(level = "debug", skip_all, fields(height_limit = height_limit))]
    pub fn do_layout(
        &mut self,
        env: &mut LayoutEnv<'_>,
        use_break_control: bool,
        height_limit: f64,
        real_height: f64,
    ) -> LayoutResult {
        self.do_layout_internal(env, use_break_control, height_limit, real_height, None)
    }

    pub(super) fn do_layout_internal(
        &mut self,
        env: &mut LayoutEnv<'_>,
        use_break_control: bool,
        height_limit: f64,
        real_height: f64,
        ctx: Option<&Context<'_>>,
    ) -> LayoutResult {
        match env.doc.form.element(self.form) {
            Element::Subform | Element::Area | Element::ExclGroup | Element::SubformSet => {
                let layout_node = subform_set_parent(env.doc, self.form);
                let (strategy, root_force_tb) = layout_strategy(env.doc, layout_node);
                match strategy {
                    LayoutStrategy::Tb | LayoutStrategy::LrTb | LayoutStrategy::RlTb => self.do_layout_flowed(
                        env,
                        use_break_control,
                        strategy,
                        height_limit,
                        real_height,
                        ctx,
                        root_force_tb,
                    ),
                    LayoutStrategy::Table => {
                        self.do_layout_table(env, layout_node);
                        self.cursor.stage = Stage::Done;
                        LayoutResult::Done
                    }
                    LayoutStrategy::Position | LayoutStrategy::Row | LayoutStrategy::RlRow => {
                        self.do_layout_positioned(env, ctx);
                        self.cursor.stage = Stage::Done;
                        LayoutResult::Done
                    }
                }
            }
            Element::Field | Element::Draw => {
                self.do_layout_field(env);
                self.cursor.stage = Stage::Done;
                LayoutResult::Done
            }
            _ => LayoutResult::Done,
        }
    }

    /// Hand out the current item and move on to the next part, if any.
    pub fn extract_item(&mut self, env: &mut LayoutEnv<'_>) -> Option<LayoutId> {
        let item = self.item;
        if let Some(id) = item {
            let items = &mut env.doc.items;
            self.item = match items.parent(id) {
                Some(_) => items.next_sibling(id),
                None => self.continuations.pop_front(),
            };
            items.detach(id);
        }
        if self.cursor.stage == Stage::Done {
            while let Some(old) = self.old_items.pop_front() {
                if Some(old) != item {
                    release_item(env.doc, old);
                }
            }
        }
        item
    }

    /// Whether a split left another part to hand out after the current one.
    pub(super) fn has_continuation(&self, doc: &Document) -> bool {
        let sibling = self
            .item
            .filter(|&i| doc.items.parent(i).is_some())
            .and_then(|i| doc.items.next_sibling(i));
        sibling.is_some() || !self.continuations.is_empty()
    }

    /// Next item for `form`: a recycled one from the previous pass when
    /// `form` is this processor's node, otherwise a fresh one linked at the
    /// end of the node's split chain.
    pub(super) fn create_item(&mut self, env: &mut LayoutEnv<'_>, form: FormId) -> LayoutId {
        if form == self.form {
            while let Some(old) = self.old_items.pop_front() {
                if !env.doc.items.contains(old) {
                    continue;
                }
                let items = &mut env.doc.items;
                items.detach(old);
                items.take_children(old);
                let item = items.item_mut(old);
                item.pos = Point::default();
                item.size = Size::default();
                item.pass = env.pass;
                return old;
            }
        }
        let template = env.doc.form.template(form);
        let id = env
            .doc
            .items
            .create(ItemKind::Content, Some(form), template, env.pass);
        let head = env
            .doc
            .form
            .node(form)
            .layout_item
            .filter(|&h| env.doc.items.contains(h));
        match head {
            Some(head) => env.doc.items.chain_append(head, id),
            None => env.doc.form.node_mut(form).layout_item = Some(id),
        }
        id
    }

    pub(super) fn current_size(&self, doc: &Document) -> Size {
        self.item
            .map(|i| doc.items.item(i).size)
            .unwrap_or_default()
    }

    fn do_layout_field(&mut self, env: &mut LayoutEnv<'_>) {
        if self.item.is_some() {
            return;
        }
        let item = self.create_item(env, self.form);
        self.item = Some(item);
        let mut size = env.measure.measure(env.doc, self.form, None, None);
        if matches!(env.doc.attrs(self.form).rotation(), 90 | 270) {
            std::mem::swap(&mut size.width, &mut size.height);
        }
        env.doc.items.item_mut(item).size = size;
    }

    fn do_layout_positioned(&mut self, env: &mut LayoutEnv<'_>, ctx: Option<&Context<'_>>) {
        if self.item.is_some() {
            return;
        }
        let item = self.create_item(env, self.form);
        self.item = Some(item);
        let ignore_xy = declared_layout(env.doc, self.form) != LayoutStrategy::Position;
        let (container, w_auto, h_auto) = container_specified_size(env.doc, self.form);
        let mut content = Size::default();

        if self.cursor.node.is_none() {
            self.cursor.advance(env.doc, self.form);
        }
        let mut child_ctx = ctx.copied();
        let mut col_index = 0i32;
        while let Some(node) = self.cursor.node {
            if self.cursor.stage == Stage::Container {
                if let Some(c) = child_ctx.as_mut() {
                    assign_column_width(c, env.doc.attrs(node).col_span(), &mut col_index);
                }
                let mut child = ContentLayoutProcessor::new(env.doc, node, self.paginated, env.pass);
                child.do_layout_internal(env, false, UNBOUNDED, UNBOUNDED, child_ctx.as_ref());
                if let Some(child_item) = child.item {
                    let size = env.doc.items.item(child_item).size;
                    let pos = if ignore_xy {
                        Point::default()
                    } else {
                        positioned_pos(env.doc, node, size)
                    };
                    env.doc.items.item_mut(child_item).pos = pos;
                    if requires_space(env.doc, node) {
                        if w_auto {
                            content.width = content.width.max(pos.x + size.width);
                        }
                        if h_auto {
                            content.height = content.height.max(pos.y + size.height);
                        }
                    }
                    if let Some(extracted) = child.extract_item(env) {
                        env.doc.items.append_child(item, extracted);
                    }
                }
            }
            self.cursor.advance(env.doc, self.form);
        }

        let size = size_from_content(env.doc, self.form, w_auto, content.width, h_auto, content.height, container);
        env.doc.items.item_mut(item).size = size;
    }

    /// Lay out the static content of a realized page: every container in
    /// the page area is placed at its anchor, draws first.
    pub fn layout_page_area(env: &mut LayoutEnv<'_>, page: LayoutId) {
        let Some(page_form) = env.doc.items.item(page).form else {
            return;
        };
        let mut cursor = ChildCursor::default();
        let mut before: Option<LayoutId> = None;
        cursor.advance(env.doc, page_form);
        while let Some(node) = cursor.node {
            if cursor.stage == Stage::Container {
                let mut processor = ContentLayoutProcessor::new(env.doc, node, false, env.pass);
                processor.do_layout(env, false, UNBOUNDED, UNBOUNDED);
                if let Some(item) = processor.item {
                    let size = env.doc.items.item(item).size;
                    env.doc.items.item_mut(item).pos = positioned_pos(env.doc, node, size);
                    if let Some(item) = processor.extract_item(env) {
                        match before {
                            Some(b) => env.doc.items.insert_after(b, item),
                            None => env.doc.items.prepend_child(page, item),
                        }
                        before = Some(item);
                    }
                }
            }
            cursor.advance(env.doc, page_form);
        }

        let mut before: Option<LayoutId> = None;
        for child in env.doc.items.children(page).to_vec() {
            let item = env.doc.items.item(child);
            let is_draw = item.kind == ItemKind::Content
                && item.form.is_some_and(|f| env.doc.form.element(f) == Element::Draw);
            if !is_draw {
                continue;
            }
            match before {
                Some(b) => env.doc.items.insert_after(b, child),
                None => env.doc.items.prepend_child(page, child),
            }
            before = Some(child);
        }
    }
}

/// Width a table row gives the next cell: the sum of the columns it spans.
fn assign_column_width(ctx: &mut Context<'_>, span: i32, col_index: &mut i32) {
    let Some(widths) = ctx.column_widths else {
        return;
    };
    let len = widths.len() as i32;
    if span > len - *col_index {
        return;
    }
    let span = if span == -1 { len - *col_index } else { span };
    let start = (*col_index).clamp(0, len) as usize;
    let end = (*col_index + span.max(0)).clamp(0, len) as usize;
    let width: f64 = widths[start..end].iter().sum();
    ctx.cur_column_width = (width != 0.0).then_some(width);
    *col_index += span.max(0);
}

/// Top-left corner of `form` given its size, `x`/`y`, anchor and rotation.
pub fn positioned_pos(doc: &Document, form: FormId, size: Size) -> Point {
    let attrs = doc.attrs(form);
    let anchor = attrs.anchor_type.unwrap_or_default() as usize;
    let rotation = (attrs.rotation() / 90) as usize;
    let mut pos = Point::new(
        attrs.x.map_or(0.0, |m| m.to_pt()),
        attrs.y.map_or(0.0, |m| m.to_pt()),
    );
    let absolute = ANCHOR_ROTATION[rotation][anchor];
    match absolute / 3 {
        1 => pos.y -= size.height / 2.0,
        2 => pos.y -= size.height,
        _ => {}
    }
    match absolute % 3 {
        1 => pos.x -= size.width / 2.0,
        2 => pos.x -= size.width,
        _ => {}
    }
    pos
}

/// Size fixed by the container's own attributes, with a flag per axis
/// telling whether that axis is sized from content instead.
pub fn container_specified_size(doc: &Document, form: FormId) -> (Size, bool, bool) {
    let element = doc.form.element(form);
    let attrs = doc.attrs(form);
    let positive = |m: Option<crate::geometry::Measurement>| m.map(|m| m.to_pt()).filter(|&v| v > LAYOUT_PRECISION);

    let mut size = Size::default();
    let (mut w_auto, mut h_auto) = (true, true);
    if matches!(element, Element::Subform | Element::ExclGroup) {
        if let Some(w) = positive(attrs.w) {
            size.width = w;
            w_auto = false;
        }
        if let Some(h) = positive(attrs.h) {
            size.height = h;
            h_auto = false;
        }
    }
    if w_auto && element == Element::Subform {
        if let Some(w) = positive(attrs.max_w) {
            size.width = w;
            w_auto = false;
        }
        if let Some(h) = positive(attrs.max_h) {
            size.height = h;
            h_auto = false;
        }
    }
    (size, w_auto, h_auto)
}

/// Component size from content size: auto axes take the content extent
/// plus the margin insets.
pub fn size_from_content(
    doc: &Document,
    form: FormId,
    w_auto: bool,
    content_width: f64,
    h_auto: bool,
    content_height: f64,
    current: Size,
) -> Size {
    let inset = doc.attrs(form).insets();
    let mut size = current;
    if w_auto {
        size.width = content_width + inset.left + inset.right;
    }
    if h_auto {
        size.height = content_height + inset.top + inset.bottom;
    }
    size
}

/// Bucket index for a row: left 0, center 1, right 2.
pub(super) fn halign_index(doc: &Document, form: FormId) -> usize {
    match doc.attrs(form).h_align() {
        HAlign::Center => 1,
        HAlign::Right => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::tests::{child_named, Harness};

    #[test]
    fn test_anchor_rotation() {
        let h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "draw", "name": "br", "x": 100, "y": 50, "anchorType": "bottomRight" },
                { "element": "draw", "name": "rot", "x": 100, "y": 50, "rotate": 90 }
            ] }"#,
            None,
        );
        let root = h.doc.root_subform().unwrap();
        let size = Size::new(20.0, 10.0);
        let br = child_named(&h.doc, root, "br");
        assert_eq!(positioned_pos(&h.doc, br, size), Point::new(80.0, 40.0));
        // Rotated a quarter turn, the top-left anchor maps to bottom-left.
        let rot = child_named(&h.doc, root, "rot");
        assert_eq!(positioned_pos(&h.doc, rot, size), Point::new(100.0, 40.0));
    }

    #[test]
    fn test_positioned_container_unions_children() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "layout": "tb", "children": [
                { "element": "subform", "name": "box", "margin": { "leftInset": 5, "bottomInset": 5 }, "children": [
                    { "element": "field", "name": "a", "x": 10, "y": 10, "w": 50, "h": 20 },
                    { "element": "field", "name": "b", "x": 40, "y": 60, "w": 30, "h": 10 },
                    { "element": "field", "name": "hidden", "presence": "hidden", "x": 500, "y": 500, "w": 10, "h": 10 }
                ] }
            ] }"#,
            None,
        );
        let root = h.doc.root_subform().unwrap();
        let boxed = child_named(&h.doc, root, "box");
        let (item, _) = h.layout_unbounded(boxed);
        let size = h.doc.items.item(item).size;
        assert_eq!(size, Size::new(75.0, 75.0));
        assert_eq!(h.doc.items.children(item).len(), 3);
    }

    #[test]
    fn test_rotated_field_swaps_axes() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "field", "name": "f", "w": 40, "h": 10, "rotate": 270 }
            ] }"#,
            None,
        );
        let root = h.doc.root_subform().unwrap();
        let f = child_named(&h.doc, root, "f");
        let (item, result) = h.layout_unbounded(f);
        assert_eq!(result, LayoutResult::Done);
        assert_eq!(h.doc.items.item(item).size, Size::new(10.0, 40.0));
    }

    #[test]
    fn test_previous_pass_items_are_recycled() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "field", "name": "f", "w": 40, "h": 10 }
            ] }"#,
            None,
        );
        let root = h.doc.root_subform().unwrap();
        let f = child_named(&h.doc, root, "f");
        let (first, _) = h.layout_unbounded(f);
        h.pass += 1;
        let (second, _) = h.layout_unbounded(f);
        assert_eq!(first, second);
        assert_eq!(h.doc.items.item(second).pass, h.pass);
        assert_eq!(h.doc.form.node(f).layout_item, Some(first));
    }

    #[test]
    fn test_column_width_assignment() {
        let widths = [10.0, 20.0, 30.0];
        let mut ctx = Context {
            column_widths: Some(&widths),
            ..Default::default()
        };
        let mut col = 0;
        assign_column_width(&mut ctx, 2, &mut col);
        assert_eq!((ctx.cur_column_width, col), (Some(30.0), 2));
        assign_column_width(&mut ctx, -1, &mut col);
        assert_eq!((ctx.cur_column_width, col), (Some(30.0), 3));
        // Nothing left to span: the previous width stays.
        assign_column_width(&mut ctx, 1, &mut col);
        assert_eq!((ctx.cur_column_width, col), (Some(30.0), 3));
    }
}
