//! Flowed containers: `tb`, `lr-tb` and `rl-tb`.
//!
//! Children are collected into rows of three alignment buckets (left,
//! center, right). A row ends when the next child no longer fits beside
//! it, its alignment goes backwards, or the layout is top-to-bottom. When
//! the height runs out the container either splits a child, pushes it to
//! the next content area, or keeps it here as a last resort, and remembers
//! where to resume.

use super::content::{container_specified_size, halign_index, positioned_pos, size_from_content, ContentLayoutProcessor};
use super::page_break::{
    decide_break, declared_layout, exist_container_keep, intact, layout_strategy, requires_space, BreakDecision,
};
use super::stage::Stage;
use super::table::relocate_row_cells;
use super::{release_item, Context, ItemKind, LayoutEnv, LayoutId, LayoutResult, OverflowSource};
use crate::error::Defect;
use crate::geometry::{Size, LAYOUT_PRECISION, UNBOUNDED};
use crate::model::{Document, Element, FormId, HAlign, KeepValue, LayoutStrategy};

/// Per-call facts about the container being flowed.
pub(super) struct FlowFrame {
    pub flow: LayoutStrategy,
    pub w_auto: bool,
    pub h_auto: bool,
    pub container_height: f64,
    pub content_width_limit: f64,
}

/// The row being filled, plus the running vertical offset.
pub(super) struct RowState {
    pub buckets: [Vec<LayoutId>; 3],
    pub halign_state: usize,
    pub y: f64,
    pub avail_width: f64,
    pub height: f64,
    pub added: bool,
    pub force_end_page: bool,
}

impl RowState {
    fn start(&mut self, frame: &FlowFrame) {
        self.buckets = Default::default();
        self.halign_state = if frame.flow == LayoutStrategy::RlTb { 2 } else { 0 };
        self.avail_width = frame.content_width_limit;
        self.height = 0.0;
    }

    fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    fn place(&mut self, bucket: usize, item: Option<LayoutId>, size: Size, take_space: bool) {
        if let Some(item) = item {
            self.buckets[bucket].push(item);
        }
        self.added = true;
        if take_space {
            self.avail_width -= size.width;
            self.height = self.height.max(size.height);
        }
    }
}

/// Whether another copy of `node`'s template may be emitted as a leader or
/// trailer. Counts are shared by the whole document.
pub(super) fn judge_occur(doc: &mut Document, node: Option<FormId>) -> Option<FormId> {
    let node = node?;
    if doc.attrs(node).occur.is_none() {
        return Some(node);
    }
    let template = doc.form.template(node);
    let Some(max) = doc.template.occurrence(template).max else {
        return Some(node);
    };
    if doc.ctx.emitted(template) >= max {
        let name = doc.form.name(node).to_string();
        doc.defects.record(Defect::OccurrenceExhausted { name });
        return None;
    }
    doc.ctx.note_emitted(template);
    Some(node)
}

impl ContentLayoutProcessor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn do_layout_flowed(
        &mut self,
        env: &mut LayoutEnv<'_>,
        use_break: bool,
        flow: LayoutStrategy,
        height_limit: f64,
        real_height: f64,
        ctx: Option<&Context<'_>>,
        root_force_tb: bool,
    ) -> LayoutResult {
        self.has_avail_height = true;
        if let Some(child) = self.child.as_mut() {
            child.pre_result = LayoutResult::Done;
        }
        let (mut container, mut w_auto, mut h_auto) = container_specified_size(env.doc, self.form);
        self.adjust_specified_size(env.doc, ctx, &mut container, &mut w_auto, &mut h_auto);

        let inset = env.doc.attrs(self.form).insets();
        let frame = FlowFrame {
            flow,
            w_auto,
            h_auto,
            container_height: container.height,
            content_width_limit: if w_auto {
                UNBOUNDED
            } else {
                container.width - inset.left - inset.right
            },
        };
        let avail_height = height_limit - inset.top - inset.bottom;
        if avail_height < 0.0 {
            self.has_avail_height = false;
        }
        let real_height = real_height - inset.top - inset.bottom;

        let mut calculated = Size::default();
        let mut row = RowState {
            buckets: Default::default(),
            halign_state: 0,
            y: 0.0,
            avail_width: frame.content_width_limit,
            height: 0.0,
            added: false,
            force_end_page: false,
        };
        let mut last_child = None;
        if self.item.is_some() {
            last_child = self.find_last_content_item(env.doc, flow);
            calculated = self.calculate_item_size(env.doc, last_child);
            row.y = match last_child {
                Some(l) => env.doc.items.item(l).pos.y,
                None => calculated.height,
            };
        }

        row.y += self.insert_keep_items(env);
        if self.cursor.stage == Stage::None {
            self.cursor.advance(env.doc, self.form);
        }
        row.y += self.insert_pending_items(env, self.form);

        if self.cursor.stage == Stage::Container {
            let child_form = self.child.as_ref().map(|c| c.form);
            let kept = child_form.is_some_and(|f| exist_container_keep(env.doc, f, false));
            if let Some(head) = self.cursor.node.filter(|_| kept) {
                self.cursor.push_keep(head);
                self.cursor.stage = Stage::Keep;
            }
        }

        let mut break_done = false;
        let mut manual_break = false;
        while self.cursor.stage != Stage::Done {
            row.start(&frame);
            if let Some(last) = last_child.take() {
                self.reabsorb_last_row(env, last, &frame, &mut row);
            }

            while let Some(node) = self.cursor.node {
                let mut processor: Option<Box<ContentLayoutProcessor>> = None;
                let mut suspend = false;
                row.added = false;
                row.y += self.insert_pending_items(env, self.form);

                match self.cursor.stage {
                    Stage::BreakBefore => {
                        for &k in &self.keep_items {
                            env.doc.items.detach(k);
                            calculated.height -= env.doc.items.item(k).size.height;
                        }
                        if use_break && self.paginated {
                            let data = env.pages.process_break_before(env.doc, node);
                            let data = data.filter(|d| d.create_page && env.doc.form.element(self.form) != Element::Form);
                            if let Some(data) = data {
                                if let Some(leader) = judge_occur(env.doc, data.leader) {
                                    self.add_pending(leader, true);
                                }
                                if let Some(trailer) = judge_occur(env.doc, data.trailer) {
                                    let under_root = env
                                        .doc
                                        .form
                                        .parent(self.form)
                                        .is_some_and(|p| env.doc.form.element(p) == Element::Form);
                                    if under_root && self.item.is_none() {
                                        self.add_pending(trailer, true);
                                    } else {
                                        let mut temp = ContentLayoutProcessor::new(env.doc, trailer, false, env.pass);
                                        self.insert_flowed_item(
                                            env, &mut temp, &frame, &mut row, false, UNBOUNDED, UNBOUNDED, ctx, false,
                                        );
                                    }
                                }
                                self.cursor.advance(env.doc, self.form);
                                row.force_end_page = true;
                                manual_break = true;
                                suspend = true;
                            }
                        }
                    }
                    Stage::BreakAfter => {
                        let data = if use_break && self.paginated {
                            env.pages.process_break_after(env.doc, node)
                        } else {
                            None
                        };
                        if let Some(data) = data.filter(|_| env.doc.form.element(self.form) != Element::Form) {
                            if let Some(trailer) = judge_occur(env.doc, data.trailer) {
                                let mut temp = ContentLayoutProcessor::new(env.doc, trailer, false, env.pass);
                                self.insert_flowed_item(
                                    env, &mut temp, &frame, &mut row, false, UNBOUNDED, UNBOUNDED, ctx, false,
                                );
                            }
                            if !data.create_page {
                                if let Some(leader) = judge_occur(env.doc, data.leader) {
                                    self.calculate_row_child_position(env, &frame, &mut row, &mut calculated, false);
                                    row.start(&frame);
                                    let mut temp = ContentLayoutProcessor::new(env.doc, leader, false, env.pass);
                                    self.insert_flowed_item(
                                        env, &mut temp, &frame, &mut row, false, UNBOUNDED, UNBOUNDED, ctx, false,
                                    );
                                }
                            } else if let Some(leader) = judge_occur(env.doc, data.leader) {
                                self.add_pending(leader, true);
                            }
                            self.cursor.advance(env.doc, self.form);
                            if data.create_page {
                                row.force_end_page = true;
                                manual_break = true;
                                if self.cursor.stage == Stage::Done {
                                    break_done = true;
                                }
                            }
                            suspend = true;
                        }
                    }
                    Stage::BookendLeader | Stage::BookendTrailer => {
                        if let Some(child) = self.child.take() {
                            processor = Some(child);
                        } else if self.paginated {
                            let bookend = if self.cursor.stage == Stage::BookendLeader {
                                env.pages.process_bookend_leader(env.doc, node)
                            } else {
                                env.pages.process_bookend_trailer(env.doc, node)
                            };
                            processor = bookend.map(|n| Box::new(ContentLayoutProcessor::new(env.doc, n, true, env.pass)));
                        }
                        if let Some(p) = processor.as_mut() {
                            let result = self.insert_flowed_item(
                                env, p, &frame, &mut row, use_break, avail_height, real_height, ctx, false,
                            );
                            if result != LayoutResult::Done {
                                suspend = true;
                            }
                        }
                    }
                    Stage::Container => {
                        if row.y >= height_limit + LAYOUT_PRECISION && requires_space(env.doc, node) {
                            row.force_end_page = true;
                            suspend = true;
                        } else {
                            let (mut p, new_row) = match self.child.take() {
                                Some(child) => (child, true),
                                None => (
                                    Box::new(ContentLayoutProcessor::new(env.doc, node, self.paginated, env.pass)),
                                    false,
                                ),
                            };
                            p.insert_pending_items(env, node);
                            let result = self.insert_flowed_item(
                                env, &mut p, &frame, &mut row, use_break, avail_height, real_height, ctx, new_row,
                            );
                            match result {
                                LayoutResult::ManualBreak => {
                                    manual_break = true;
                                    row.force_end_page = true;
                                    suspend = true;
                                }
                                LayoutResult::PageFullBreak => {
                                    row.force_end_page = true;
                                    suspend = true;
                                }
                                LayoutResult::RowFullBreak => suspend = true,
                                LayoutResult::Done => row.y += p.insert_pending_items(env, node),
                            }
                            processor = Some(p);
                        }
                    }
                    Stage::None | Stage::Keep | Stage::Done => {}
                }

                if suspend {
                    if let Some(p) = processor {
                        self.child = Some(p);
                    }
                    break;
                }
                self.cursor.advance(env.doc, self.form);
                if row.added && flow == LayoutStrategy::Tb {
                    break;
                }
            }

            self.calculate_row_child_position(env, &frame, &mut row, &mut calculated, root_force_tb);
            self.width_limit = row.avail_width;
            if row.force_end_page {
                break;
            }
        }

        let done = self.cursor.stage == Stage::Done && self.pending.is_empty() && !break_done;
        let mut size = size_from_content(
            env.doc,
            self.form,
            w_auto,
            calculated.width,
            h_auto,
            calculated.height,
            container,
        );
        if size.height >= LAYOUT_PRECISION || self.item.is_some() || done {
            let item = match self.item {
                Some(item) => item,
                None => {
                    let item = self.create_item(env, self.form);
                    self.item = Some(item);
                    item
                }
            };
            size.height = size.height.max(0.0);
            env.doc.items.item_mut(item).size = size;
            if row.force_end_page {
                self.used_size = 0.0;
            } else {
                self.used_size += size.height;
            }
        }

        if done {
            LayoutResult::Done
        } else if manual_break {
            LayoutResult::ManualBreak
        } else {
            LayoutResult::PageFullBreak
        }
    }

    /// A fixed height shrinks by what earlier parts used; a table cell
    /// takes its column width.
    fn adjust_specified_size(
        &self,
        doc: &Document,
        ctx: Option<&Context<'_>>,
        size: &mut Size,
        w_auto: &mut bool,
        h_auto: &mut bool,
    ) {
        if let Some(width) = ctx.and_then(|c| c.cur_column_width) {
            size.width = width;
            *w_auto = false;
        }
        if *h_auto {
            return;
        }
        size.height -= self.used_size;
        let Some(parent) = doc.form.parent(self.form) else {
            return;
        };
        if layout_strategy(doc, parent).0 != LayoutStrategy::Row {
            return;
        }
        let Some(first) = doc.form.first_container_child(self.form) else {
            return;
        };
        if doc.form.next_container_sibling(first).is_none() {
            return;
        }
        size.height = 0.0;
        *h_auto = true;
    }

    /// First item of the last row of a continued item, when rows may hold
    /// more than one child.
    fn find_last_content_item(&self, doc: &Document, flow: LayoutStrategy) -> Option<LayoutId> {
        if self.cursor.stage == Stage::Done || flow == LayoutStrategy::Tb {
            return None;
        }
        let item = self.item?;
        let children = doc.items.children(item);
        let mut last = *children.first()?;
        for &c in children {
            if doc.items.item(c).kind == ItemKind::Content && doc.items.item(c).pos.y != doc.items.item(last).pos.y {
                last = c;
            }
        }
        Some(last)
    }

    /// Content extent of the current item's children before `stop`.
    fn calculate_item_size(&self, doc: &Document, stop: Option<LayoutId>) -> Size {
        let mut size = Size::default();
        let Some(item) = self.item else {
            return size;
        };
        for &c in doc.items.children(item) {
            if Some(c) == stop {
                break;
            }
            let it = doc.items.item(c);
            if it.kind != ItemKind::Content {
                continue;
            }
            size.width = size.width.max(it.pos.x + it.size.width);
            size.height = size.height.max(it.pos.y + it.size.height);
        }
        size
    }

    /// Move the last row of a continued item back into the row buckets so
    /// it can grow. A trailing part of the suspended child is handed back
    /// to that child instead.
    fn reabsorb_last_row(&mut self, env: &mut LayoutEnv<'_>, last: LayoutId, frame: &FlowFrame, row: &mut RowState) {
        let Some(item) = self.item else {
            return;
        };
        let children = env.doc.items.children(item);
        let Some(start) = children.iter().position(|&c| c == last) else {
            return;
        };
        let tail: Vec<LayoutId> = children[start..].to_vec();
        for (i, &next) in tail.iter().enumerate() {
            let next_form = env.doc.items.item(next).form;
            if i + 1 == tail.len() {
                if let Some(child) = self.child.as_mut().filter(|c| Some(c.form) == next_form) {
                    if let Some(current) = child.item {
                        child.continuations.push_front(current);
                    }
                    child.item = Some(next);
                    break;
                }
            }
            let Some(form) = next_form else {
                continue;
            };
            let bucket = halign_index(env.doc, form);
            row.buckets[bucket].push(next);
            if frame.flow == LayoutStrategy::LrTb {
                row.halign_state = row.halign_state.max(bucket);
            } else {
                row.halign_state = row.halign_state.min(bucket);
            }
            if requires_space(env.doc, form) {
                let size = env.doc.items.item(next).size;
                row.height = row.height.max(size.height);
                row.avail_width -= size.width;
            }
        }
        for next in tail {
            env.doc.items.detach(next);
        }
    }

    /// Position the row's buckets, append them to the item and advance to
    /// the next row.
    fn calculate_row_child_position(
        &mut self,
        env: &mut LayoutEnv<'_>,
        frame: &FlowFrame,
        row: &mut RowState,
        calculated: &mut Size,
        root_force_tb: bool,
    ) -> bool {
        let mut group_widths = [0.0f64; 3];
        for (i, bucket) in row.buckets.iter().enumerate() {
            for &it in bucket {
                let form = env.doc.items.item(it).form;
                if form.is_some_and(|f| requires_space(env.doc, f)) {
                    group_widths[i] += env.doc.items.item(it).size.width;
                }
            }
        }
        if row.is_empty() {
            if frame.h_auto {
                calculated.height = calculated.height.min(row.y);
            }
            return false;
        }

        let item = match self.item {
            Some(item) => item,
            None => {
                let item = self.create_item(env, self.form);
                self.item = Some(item);
                item
            }
        };
        let limit = frame.content_width_limit;
        let [g0, g1, g2] = group_widths;
        let buckets = std::mem::take(&mut row.buckets);
        if frame.flow != LayoutStrategy::RlTb {
            let starts = [0.0, (limit + g0 - g1 - g2) / 2.0, limit - g2];
            for (bucket, start) in buckets.iter().zip(starts) {
                let mut x = start;
                for &it in bucket {
                    let (form, size) = {
                        let i = env.doc.items.item(it);
                        (i.form, i.size)
                    };
                    let pos = match form {
                        Some(f) if root_force_tb => positioned_pos(env.doc, f, size),
                        _ => {
                            let pos = crate::geometry::Point::new(x, row.y);
                            if form.is_some_and(|f| requires_space(env.doc, f)) {
                                x += size.width;
                            }
                            pos
                        }
                    };
                    env.doc.items.item_mut(it).pos = pos;
                    env.doc.items.append_child(item, it);
                    self.last_row_width = x;
                }
            }
        } else {
            let starts = [g0, (limit + g0 + g1 - g2) / 2.0, limit];
            for (bucket, start) in buckets.iter().zip(starts) {
                let mut x = start;
                for &it in bucket {
                    let (form, size) = {
                        let i = env.doc.items.item(it);
                        (i.form, i.size)
                    };
                    if form.is_some_and(|f| requires_space(env.doc, f)) {
                        x -= size.width;
                    }
                    env.doc.items.item_mut(it).pos = crate::geometry::Point::new(x, row.y);
                    env.doc.items.append_child(item, it);
                    self.last_row_width = x;
                }
            }
        }
        self.last_row_y = row.y;
        row.y += row.height;

        if frame.w_auto {
            let mut supplied = g0;
            if limit < UNBOUNDED && limit > supplied {
                supplied = limit;
            }
            calculated.width = calculated.width.max(supplied);
        }
        if frame.h_auto {
            calculated.height = calculated.height.max(row.y);
        }
        true
    }

    /// Lay out (or resume) the child behind `p` and decide whether it goes
    /// in the current row, splits, or waits for the next content area.
    #[allow(clippy::too_many_arguments)]
    fn insert_flowed_item(
        &mut self,
        env: &mut LayoutEnv<'_>,
        p: &mut ContentLayoutProcessor,
        frame: &FlowFrame,
        row: &mut RowState,
        use_break: bool,
        mut avail_height: f64,
        real_height: f64,
        ctx: Option<&Context<'_>>,
        new_row: bool,
    ) -> LayoutResult {
        let take_space = requires_space(env.doc, p.form);
        let mut bucket = self.cursor.node.map_or(0, |n| halign_index(env.doc, n));
        if frame.w_auto {
            bucket = 0;
        }
        let regressed = if frame.flow == LayoutStrategy::RlTb {
            bucket > row.halign_state
        } else {
            bucket < row.halign_state
        };
        if regressed {
            return LayoutResult::RowFullBreak;
        }
        row.halign_state = bucket;

        let own_split = intact(env.doc, p.form) == KeepValue::None;
        let parent_splits = env
            .doc
            .form
            .parent(p.form)
            .is_some_and(|par| intact(env.doc, par) == KeepValue::None);
        let use_real_height = take_space && frame.h_auto && own_split && parent_splits;
        let mut trans_height = take_space;
        if trans_height && !own_split {
            let (strategy, _) = layout_strategy(env.doc, p.form);
            if matches!(strategy, LayoutStrategy::LrTb | LayoutStrategy::RlTb) {
                trans_height = false;
            }
        }

        let mut use_inherited = false;
        let overflow_ctx;
        let mut ctx = ctx;
        if self.paginated {
            if let Some(node) = env.pages.query_overflow(env.doc, self.form) {
                overflow_ctx = Context {
                    overflow: Some(OverflowSource { node, owner: self.form }),
                    ..Default::default()
                };
                ctx = Some(&overflow_ctx);
            }
        }

        let result = if !new_row || p.pre_result == LayoutResult::Done {
            let limit = if use_real_height { real_height - row.y } else { UNBOUNDED };
            let real = if trans_height { real_height - row.y } else { UNBOUNDED };
            let result = p.do_layout_internal(env, take_space && use_break, limit, real, ctx);
            p.pre_result = result;
            result
        } else {
            let result = p.pre_result;
            p.pre_result = LayoutResult::Done;
            result
        };
        let Some(p_item) = p.item else {
            return result;
        };
        let mut child_size = env.doc.items.item(p_item).size;
        if use_real_height && real_height < LAYOUT_PRECISION {
            avail_height = UNBOUNDED;
        }
        if take_space
            && child_size.width > row.avail_width + LAYOUT_PRECISION
            && frame.content_width_limit - row.avail_width > LAYOUT_PRECISION
        {
            return LayoutResult::RowFullBreak;
        }

        let mut overflow_leader = None;
        let mut overflow_trailer = None;
        let mut overflow_node = None;
        let mut trailer_item = None;
        let mut add_trailer_height = false;
        if self.paginated && intact(env.doc, p.form) == KeepValue::None {
            overflow_node = env.pages.query_overflow(env.doc, p.form);
            if overflow_node.is_none() {
                if let Some(source) = ctx.and_then(|c| c.overflow) {
                    overflow_node = Some(source.node);
                    use_inherited = true;
                }
            }
            if let Some(data) = env.pages.process_overflow(env.doc, overflow_node, false) {
                overflow_leader = data.leader;
                overflow_trailer = data.trailer;
                if let Some(trailer) = judge_occur(env.doc, overflow_trailer) {
                    let mut tp = ContentLayoutProcessor::new(env.doc, trailer, false, env.pass);
                    tp.do_layout(env, false, UNBOUNDED, UNBOUNDED);
                    if tp.item.is_some() {
                        trailer_item = tp.extract_item(env);
                    }
                    add_trailer_height = if use_inherited {
                        self.is_add_new_row_for_trailer(env.doc, trailer_item)
                    } else {
                        p.is_add_new_row_for_trailer(env.doc, trailer_item)
                    };
                    if add_trailer_height {
                        if let Some(t) = trailer_item {
                            child_size.height += env.doc.items.item(t).size.height;
                        }
                    }
                }
            }
        }

        let fits = !take_space
            || row.y + child_size.height <= avail_height + LAYOUT_PRECISION
            || (!frame.h_auto && self.used_size + avail_height + LAYOUT_PRECISION >= frame.container_height);
        if fits {
            if !take_space || result == LayoutResult::Done {
                if p.use_inherited {
                    if let Some(t) = trailer_item {
                        p.add_trailer_before_split(env, child_size.height, t, false);
                    }
                    if let Some(leader) = judge_occur(env.doc, overflow_leader) {
                        p.add_pending(leader, false);
                    }
                    p.use_inherited = false;
                } else {
                    if add_trailer_height {
                        if let Some(t) = trailer_item {
                            child_size.height -= env.doc.items.item(t).size.height;
                        }
                    }
                    p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                }
                let child_item = p.extract_item(env);
                if let Some(ci) = child_item {
                    if exist_container_keep(env.doc, p.form, false) && intact(env.doc, p.form) == KeepValue::None {
                        self.keep_items.push(ci);
                    } else {
                        self.keep_items.clear();
                    }
                }
                row.place(bucket, child_item, child_size, take_space);
                return LayoutResult::Done;
            }
            if result == LayoutResult::PageFullBreak {
                if p.use_inherited {
                    if let Some(t) = trailer_item {
                        p.add_trailer_before_split(env, child_size.height, t, false);
                    }
                    if let Some(leader) = judge_occur(env.doc, overflow_leader) {
                        p.add_pending(leader, false);
                    }
                    p.use_inherited = false;
                } else {
                    if add_trailer_height {
                        if let Some(t) = trailer_item {
                            child_size.height -= env.doc.items.item(t).size.height;
                        }
                    }
                    p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                }
            }
            let child_item = p.extract_item(env);
            row.place(bucket, child_item, child_size, take_space);
            return result;
        }

        if let Some(kept) = self.process_keep_for_split(env, p, result, bucket, row) {
            return kept;
        }

        row.force_end_page = true;
        let split_pos = p.find_split_pos(env, avail_height - row.y);
        let at_top = row.y <= LAYOUT_PRECISION;
        let child_height = p.current_size(env.doc).height;
        let next_fits = split_pos <= LAYOUT_PRECISION
            && at_top
            && p.paginated
            && env.pages.next_avail_content_height(env.doc, child_height);

        match decide_break(split_pos, at_top, next_fits) {
            BreakDecision::Split { at } => {
                tracing::debug!(at, avail_height, "splitting child");
                if declared_layout(env.doc, p.form) == LayoutStrategy::Tb && result == LayoutResult::Done {
                    p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                    let child_item = p.extract_item(env);
                    row.place(bucket, child_item, child_size, take_space);
                    return LayoutResult::PageFullBreak;
                }
                if self.paginated && !p.use_inherited && result != LayoutResult::PageFullBreak {
                    env.pages.process_overflow(env.doc, overflow_node, true);
                }
                match trailer_item.filter(|_| add_trailer_height) {
                    Some(t) => p.add_trailer_before_split(env, at, t, use_inherited),
                    None => p.split_item_at(env, at),
                }
                if use_inherited {
                    p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                    self.use_inherited = true;
                } else {
                    let generated_only = p.item.is_some_and(|i| {
                        let children = env.doc.items.children(i);
                        children.len() == 1
                            && env.doc.items.item(children[0])
                                .form
                                .is_some_and(|f| env.doc.form.node(f).flags.layout_generated)
                    });
                    if generated_only {
                        p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                    } else if let Some(leader) = judge_occur(env.doc, overflow_leader) {
                        p.add_pending(leader, false);
                    }
                }
                if p.has_continuation(env.doc) {
                    child_size = p.current_size(env.doc);
                    let child_item = p.extract_item(env);
                    row.place(bucket, child_item, child_size, take_space);
                }
                return LayoutResult::PageFullBreak;
            }
            BreakDecision::Place => {
                child_size = p.current_size(env.doc);
                let child_item = p.extract_item(env);
                row.place(bucket, child_item, child_size, take_space);
                if result == LayoutResult::Done {
                    row.force_end_page = false;
                }
                return result;
            }
            BreakDecision::MoveToNextPage if at_top => {
                self.record_deferred(env.doc, p.form);
                if self.paginated {
                    let node = overflow_node.or_else(|| ctx.and_then(|c| c.overflow).map(|o| o.owner));
                    env.pages.process_overflow(env.doc, node, true);
                }
                if use_inherited {
                    p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, overflow_node);
                    self.use_inherited = true;
                }
                return LayoutResult::PageFullBreak;
            }
            BreakDecision::MoveToNextPage => {}
        }

        if intact(env.doc, p.form) == KeepValue::None && declared_layout(env.doc, p.form) == LayoutStrategy::Tb {
            if self.paginated {
                if let Some(data) = env.pages.process_overflow(env.doc, overflow_node, true) {
                    overflow_leader = data.leader;
                }
            }
            if let Some(t) = trailer_item {
                p.add_trailer_before_split(env, split_pos, t, false);
            }
            if let Some(leader) = judge_occur(env.doc, overflow_leader) {
                p.add_pending(leader, false);
            }
            return LayoutResult::PageFullBreak;
        }
        if result != LayoutResult::Done {
            return LayoutResult::PageFullBreak;
        }

        self.record_deferred(env.doc, p.form);
        let node = overflow_node.or_else(|| ctx.and_then(|c| c.overflow).map(|o| o.owner));
        if self.paginated {
            if let Some(data) = env.pages.process_overflow(env.doc, node, true) {
                overflow_leader = data.leader;
                overflow_trailer = data.trailer;
            }
        }
        if use_inherited {
            p.process_unuse_overflow(env, overflow_leader, overflow_trailer, trailer_item, node);
            self.use_inherited = true;
        }
        LayoutResult::PageFullBreak
    }

    fn record_deferred(&self, doc: &mut Document, form: FormId) {
        let name = doc.form.name(form).to_string();
        doc.defects.record(Defect::NonSplittableOverflow { name });
    }

    /// A child kept with its predecessor that cannot be cut: move it
    /// together with the kept run to the next page if that helps,
    /// otherwise place it here.
    fn process_keep_for_split(
        &mut self,
        env: &mut LayoutEnv<'_>,
        p: &mut ContentLayoutProcessor,
        result: LayoutResult,
        bucket: usize,
        row: &mut RowState,
    ) -> Option<LayoutResult> {
        let cur = self.cursor.node?;
        if intact(env.doc, cur) == KeepValue::None && p.has_avail_height {
            return None;
        }
        if !exist_container_keep(env.doc, cur, true) {
            return None;
        }
        let child_size = p.current_size(env.doc);
        let mut kept = Vec::new();
        if self.judge_put_next_page(env, child_size.height, &mut kept) {
            tracing::debug!(kept = kept.len(), "moving kept run to next page");
            self.keep_items.clear();
            for it in kept {
                env.doc.items.detach(it);
                row.y -= env.doc.items.item(it).size.height;
                self.keep_items.push(it);
            }
            row.added = true;
            row.force_end_page = true;
            return Some(LayoutResult::PageFullBreak);
        }
        let child_item = p.extract_item(env);
        row.place(bucket, child_item, child_size, true);
        Some(result)
    }

    /// Whether the run of kept items ending the current item, plus a child
    /// of `child_height`, would fit in a following content area.
    fn judge_put_next_page(&self, env: &mut LayoutEnv<'_>, child_height: f64, kept: &mut Vec<LayoutId>) -> bool {
        let Some(item) = self.item else {
            return false;
        };
        let mut height = 0.0;
        for &c in env.doc.items.children(item) {
            let it = env.doc.items.item(c);
            if it.kind != ItemKind::Content {
                continue;
            }
            if it.form.is_some_and(|f| exist_container_keep(env.doc, f, false)) {
                kept.push(c);
                height += it.size.height;
            } else {
                kept.clear();
                height = 0.0;
            }
        }
        height += child_height;
        self.paginated && env.pages.next_avail_content_height(env.doc, height)
    }

    pub(super) fn add_pending(&mut self, node: FormId, break_pending: bool) {
        self.pending.push_back(node);
        self.break_pending = break_pending;
    }

    /// Lay out queued leaders at the top of the current item. Returns the
    /// height they push later content down by.
    pub(super) fn insert_pending_items(&mut self, env: &mut LayoutEnv<'_>, cur_child: FormId) -> f64 {
        if self.pending.is_empty() {
            return 0.0;
        }
        if self.item.is_none() {
            let item = self.create_item(env, cur_child);
            self.item = Some(item);
        }
        let mut total = 0.0;
        while let Some(node) = self.pending.pop_front() {
            let mut p = ContentLayoutProcessor::new(env.doc, node, false, env.pass);
            p.do_layout(env, false, UNBOUNDED, UNBOUNDED);
            if p.item.is_none() {
                continue;
            }
            if let Some(leader) = p.extract_item(env) {
                self.add_leader_after_split(env, leader);
                if self.break_pending {
                    total += env.doc.items.item(leader).size.height;
                }
            }
        }
        total
    }

    /// Put back items held over from a keep run that moved pages.
    fn insert_keep_items(&mut self, env: &mut LayoutEnv<'_>) -> f64 {
        if self.keep_items.is_empty() {
            return 0.0;
        }
        if self.item.is_none() {
            let item = self.create_item(env, self.form);
            self.item = Some(item);
        }
        let mut total = 0.0;
        for it in std::mem::take(&mut self.keep_items).into_iter().rev() {
            self.add_leader_after_split(env, it);
            total += env.doc.items.item(it).size.height;
        }
        total
    }

    /// Insert `leader` at the top of the current item, pushing the
    /// existing children down.
    pub(super) fn add_leader_after_split(&mut self, env: &mut LayoutEnv<'_>, leader: LayoutId) {
        self.update_pending_item_layout(env, leader);
        let Some(item) = self.item else {
            return;
        };
        let inset = env.doc.attrs(self.form).insets();
        let leader_size = env.doc.items.item(leader).size;
        for c in env.doc.items.children(item).to_vec() {
            if env.doc.items.item(c).kind == ItemKind::Content {
                env.doc.items.item_mut(c).pos.y += leader_size.height;
            }
        }
        let item_width = env.doc.items.item(item).size.width;
        let x = self.aligned_x(env.doc, leader, item_width, leader_size.width, inset.left, inset.right);
        let it = env.doc.items.item_mut(leader);
        it.pos = crate::geometry::Point::new(x, 0.0);
        env.doc.items.item_mut(item).size.height += leader_size.height;
        env.doc.items.append_child(item, leader);
    }

    /// Append `trailer` below the content, cutting the item first so the
    /// trailer still fits above `split_pos`.
    pub(super) fn add_trailer_before_split(
        &mut self,
        env: &mut LayoutEnv<'_>,
        split_pos: f64,
        trailer: LayoutId,
        use_inherited: bool,
    ) {
        let trailer_size = env.doc.items.item(trailer).size;
        if use_inherited {
            let mut new_split = 0.0;
            if split_pos - trailer_size.height > LAYOUT_PRECISION {
                new_split = self.find_split_pos(env, split_pos - trailer_size.height);
            }
            if new_split > LAYOUT_PRECISION {
                self.split_item_at(env, new_split);
            }
            return;
        }

        self.update_pending_item_layout(env, trailer);
        let Some(item) = self.item else {
            return;
        };
        if !self.is_add_new_row_for_trailer(env.doc, Some(trailer)) {
            env.doc.items.item_mut(trailer).pos = crate::geometry::Point::new(self.last_row_width, self.last_row_y);
            env.doc.items.item_mut(item).size.width += trailer_size.width;
            env.doc.items.append_child(item, trailer);
            return;
        }

        let inset = env.doc.attrs(self.form).insets();
        let mut new_split = 0.0;
        if split_pos - trailer_size.height > LAYOUT_PRECISION {
            new_split = self.find_split_pos(env, split_pos - trailer_size.height);
        }
        let y = if new_split > LAYOUT_PRECISION {
            self.split_item_at(env, new_split);
            new_split - inset.top - inset.bottom
        } else {
            split_pos - inset.top - inset.bottom
        };
        let item_width = env.doc.items.item(item).size.width;
        let x = self.aligned_x(env.doc, trailer, item_width, trailer_size.width, inset.left, inset.right);
        env.doc.items.item_mut(trailer).pos = crate::geometry::Point::new(x, y);
        env.doc.items.item_mut(item).size.height += trailer_size.height;
        env.doc.items.append_child(item, trailer);
    }

    fn aligned_x(&self, doc: &Document, it: LayoutId, outer: f64, width: f64, left: f64, right: f64) -> f64 {
        let align = doc
            .items
            .item(it)
            .form
            .map(|f| doc.attrs(f).h_align())
            .unwrap_or_default();
        match align {
            HAlign::Right => outer - right - width,
            HAlign::Center => (outer - left - right - width) / 2.0,
            _ => left,
        }
    }

    /// A trailer needs its own row unless the layout is `lr-tb`/`rl-tb`
    /// and it fits beside the last row.
    pub(super) fn is_add_new_row_for_trailer(&self, doc: &Document, trailer: Option<LayoutId>) -> bool {
        trailer.is_some_and(|t| {
            declared_layout(doc, self.form) == LayoutStrategy::Tb
                || self.width_limit <= doc.items.item(t).size.width
        })
    }

    /// Leaders and trailers that turn out to be rows are re-laid against
    /// this container's columns.
    fn update_pending_item_layout(&self, env: &mut LayoutEnv<'_>, it: LayoutId) {
        let Some(form) = env.doc.items.item(it).form else {
            return;
        };
        let layout = declared_layout(env.doc, form);
        if layout.is_row() {
            relocate_row_cells(env, it, &self.column_widths, layout);
        }
    }

    /// Drop overflow leaders and trailers that were prepared but not used.
    pub(super) fn process_unuse_overflow(
        &mut self,
        env: &mut LayoutEnv<'_>,
        leader: Option<FormId>,
        trailer: Option<FormId>,
        trailer_item: Option<LayoutId>,
        form: Option<FormId>,
    ) {
        for node in [leader, trailer].into_iter().flatten() {
            if env.doc.form.contains(node) {
                env.doc.set_unused(node);
            }
        }
        if form.is_none() {
            return;
        }
        for node in [leader, trailer].into_iter().flatten() {
            if env.doc.form.contains(node) {
                env.doc.delete_form(node);
            }
        }
        if let Some(t) = trailer_item {
            release_item(env.doc, t);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::layout::tests::{child_named, Harness};

    // ─── Helpers ────────────────────────────────────────────────────

    fn positions(h: &Harness, item: LayoutId) -> Vec<(f64, f64)> {
        h.doc
            .items
            .children(item)
            .iter()
            .map(|&c| {
                let p = h.doc.items.item(c).pos;
                (p.x, p.y)
            })
            .collect()
    }

    fn body(h: &Harness) -> FormId {
        let root = h.doc.root_subform().unwrap();
        child_named(&h.doc, root, "body")
    }

    #[test]
    fn test_top_to_bottom_stacks_children() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "tb", "margin": { "topInset": 5, "bottomInset": 5 }, "children": [
                    { "element": "field", "name": "a", "w": 100, "h": 30 },
                    { "element": "field", "name": "gone", "presence": "hidden", "w": 100, "h": 30 },
                    { "element": "field", "name": "b", "w": 60, "h": 20, "hAlign": "right" }
                ] }
            ] }"#,
            None,
        );
        let (item, result) = h.layout_unbounded(body(&h));
        assert_eq!(result, LayoutResult::Done);
        assert_eq!(h.child_names(item), vec!["a", "gone", "b"]);
        assert_eq!(positions(&h, item), vec![(0.0, 0.0), (0.0, 30.0), (0.0, 30.0)]);
        assert_eq!(h.doc.items.item(item).size, Size::new(100.0, 60.0));
    }

    #[test]
    fn test_left_to_right_wraps_rows() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "lr-tb", "w": 100, "children": [
                    { "element": "field", "name": "a", "w": 40, "h": 10 },
                    { "element": "field", "name": "b", "w": 40, "h": 20 },
                    { "element": "field", "name": "c", "w": 40, "h": 10 }
                ] }
            ] }"#,
            None,
        );
        let (item, _) = h.layout_unbounded(body(&h));
        assert_eq!(positions(&h, item), vec![(0.0, 0.0), (40.0, 0.0), (0.0, 20.0)]);
        assert_eq!(h.doc.items.item(item).size, Size::new(100.0, 30.0));
    }

    #[test]
    fn test_right_to_left_mirrors_rows() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "rl-tb", "w": 100, "children": [
                    { "element": "field", "name": "a", "w": 30, "h": 10 },
                    { "element": "field", "name": "b", "w": 30, "h": 10 }
                ] }
            ] }"#,
            None,
        );
        let (item, _) = h.layout_unbounded(body(&h));
        // Left-aligned children hug the start of the row, which is its
        // right edge here; the first child ends up rightmost.
        assert_eq!(positions(&h, item), vec![(30.0, 0.0), (0.0, 0.0)]);
    }

    #[test]
    fn test_center_and_right_buckets() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "lr-tb", "w": 100, "children": [
                    { "element": "field", "name": "l", "w": 20, "h": 10 },
                    { "element": "field", "name": "c", "w": 20, "h": 10, "hAlign": "center" },
                    { "element": "field", "name": "r", "w": 20, "h": 10, "hAlign": "right" }
                ] }
            ] }"#,
            None,
        );
        let (item, _) = h.layout_unbounded(body(&h));
        assert_eq!(positions(&h, item), vec![(0.0, 0.0), (40.0, 0.0), (80.0, 0.0)]);
    }

    #[test]
    fn test_page_full_break_resumes() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "tb", "children": [
                    { "element": "field", "name": "a", "w": 100, "h": 40 },
                    { "element": "field", "name": "b", "w": 100, "h": 40 },
                    { "element": "field", "name": "c", "w": 100, "h": 40 }
                ] }
            ] }"#,
            None,
        );
        let (mut processor, result) = h.layout(body(&h), 100.0);
        assert_eq!(result, LayoutResult::PageFullBreak);
        let first = h.extract(&mut processor).unwrap();
        assert_eq!(h.child_names(first), vec!["a", "b"]);
        assert_eq!(h.doc.items.item(first).size.height, 80.0);

        let result = h.resume(&mut processor, 100.0);
        assert_eq!(result, LayoutResult::Done);
        let second = h.extract(&mut processor).unwrap();
        assert_eq!(h.child_names(second), vec!["c"]);
        assert_eq!(positions(&h, second), vec![(0.0, 0.0)]);
        assert_eq!(h.doc.items.chain(first), vec![first, second]);
        assert!(h
            .doc
            .defects
            .entries()
            .contains(&Defect::NonSplittableOverflow { name: "c".into() }));
    }

    #[test]
    fn test_nested_container_splits_across_budget() {
        let mut h = Harness::new(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "subform", "name": "body", "layout": "tb", "children": [
                    { "element": "subform", "name": "inner", "layout": "tb", "children": [
                        { "element": "field", "name": "a", "w": 100, "h": 40 },
                        { "element": "field", "name": "b", "w": 100, "h": 40 },
                        { "element": "field", "name": "c", "w": 100, "h": 40 }
                    ] }
                ] }
            ] }"#,
            None,
        );
        let (mut processor, result) = h.layout(body(&h), 100.0);
        assert_eq!(result, LayoutResult::PageFullBreak);
        let first = h.extract(&mut processor).unwrap();
        let result = h.resume(&mut processor, 100.0);
        assert_eq!(result, LayoutResult::Done);
        let second = h.extract(&mut processor).unwrap();

        let inner_parts: Vec<LayoutId> = [first, second]
            .iter()
            .flat_map(|&p| h.doc.items.children(p).to_vec())
            .collect();
        assert_eq!(inner_parts.len(), 2);
        let heights: Vec<f64> = inner_parts
            .iter()
            .map(|&i| h.doc.items.item(i).size.height)
            .collect();
        // Every field lands in exactly one part; nothing is lost or doubled.
        assert_eq!(heights.iter().sum::<f64>(), 120.0);
        let fields: Vec<String> = inner_parts.iter().flat_map(|&i| h.child_names(i)).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }
}
