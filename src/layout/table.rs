//! Table containers and their rows.
//!
//! A table's `columnWidths` lists one width per column; a zero or missing
//! width makes the column take the widest single-column cell in it. Rows
//! are subforms with `row` or `rl-row` layout whose cells are stretched
//! across the columns they span and to the tallest cell in the row.

use super::content::{container_specified_size, size_from_content, ContentLayoutProcessor};
use super::page_break::{declared_layout, requires_space};
use super::stage::Stage;
use super::{Context, ItemKind, LayoutEnv, LayoutId};
use crate::geometry::{parse_measurement_list, Size, LAYOUT_PRECISION, UNBOUNDED};
use crate::model::{Element, FormId, HAlign, LayoutStrategy, VAlign};

impl ContentLayoutProcessor {
    pub(super) fn do_layout_table(&mut self, env: &mut LayoutEnv<'_>, layout_node: FormId) {
        if self.item.is_some() {
            return;
        }
        let item = self.create_item(env, self.form);
        self.item = Some(item);
        let (container, w_auto, h_auto) = container_specified_size(env.doc, self.form);
        let inset = env.doc.attrs(self.form).insets();
        let content_width_limit = if w_auto {
            UNBOUNDED
        } else {
            container.width - inset.left - inset.right
        };

        if let Some(widths) = &env.doc.attrs(layout_node).column_widths {
            self.column_widths = parse_measurement_list(widths)
                .iter()
                .map(|m| m.to_pt())
                .collect();
        }
        let specified = self.column_widths.clone();
        let ctx = Context {
            column_widths: Some(&specified),
            ..Default::default()
        };
        let child_ctx = (!specified.is_empty()).then_some(&ctx);

        if self.cursor.node.is_none() {
            self.cursor.advance(env.doc, self.form);
        }
        while let Some(node) = self.cursor.node {
            if self.cursor.stage == Stage::Container {
                let mut child = ContentLayoutProcessor::new(env.doc, node, self.paginated, env.pass);
                child.do_layout_internal(env, false, UNBOUNDED, UNBOUNDED, child_ctx);
                if child.item.is_some() {
                    if let Some(child_item) = child.extract_item(env) {
                        env.doc.items.append_child(item, child_item);
                    }
                }
            }
            self.cursor.advance(env.doc, self.form);
        }

        self.compute_auto_columns(env, item);

        let mut row_y = 0.0;
        let mut content_width = 0.0f64;
        for child in env.doc.items.children(item).to_vec() {
            let Some(form) = content_form(env, child) else {
                continue;
            };
            if !requires_space(env.doc, form) {
                continue;
            }
            if env.doc.form.element(form) == Element::Subform {
                let layout = declared_layout(env.doc, form);
                if layout.is_row() {
                    relocate_row_cells(env, child, &self.column_widths, layout);
                }
            }
            let size = env.doc.items.item(child).size;
            let x = if w_auto {
                0.0
            } else {
                match env.doc.attrs(form).h_align() {
                    HAlign::Center => (content_width_limit - size.width) / 2.0,
                    HAlign::Right => content_width_limit - size.width,
                    _ => 0.0,
                }
            };
            env.doc.items.item_mut(child).pos = crate::geometry::Point::new(x, row_y);
            if w_auto {
                let mut supplied = x + size.width;
                if content_width_limit < UNBOUNDED && content_width_limit > supplied {
                    supplied = content_width_limit;
                }
                content_width = content_width.max(supplied);
            }
            row_y += size.height;
        }

        let content_height = if h_auto { row_y.max(0.0) } else { 0.0 };
        let size = size_from_content(env.doc, self.form, w_auto, content_width, h_auto, content_height, container);
        env.doc.items.item_mut(item).size = size;
    }

    /// Widen zero-width columns to their widest single-column cell,
    /// walking every row's cells column by column.
    fn compute_auto_columns(&mut self, env: &LayoutEnv<'_>, table: LayoutId) {
        let doc = &*env.doc;
        let mut cells: Vec<Option<LayoutId>> = Vec::new();
        let mut spans: Vec<i32> = Vec::new();
        let mut widths: Vec<f64> = Vec::new();
        for &row in doc.items.children(table) {
            let it = doc.items.item(row);
            let Some(form) = it.form.filter(|_| it.kind == ItemKind::Content) else {
                continue;
            };
            if doc.form.element(form) != Element::Subform
                || !requires_space(doc, form)
                || !declared_layout(doc, form).is_row()
            {
                continue;
            }
            let first = doc.items.children(row).first().copied();
            cells.push(first);
            spans.push(first.and_then(|c| doc.items.item(c).form).map_or(0, |f| doc.attrs(f).col_span()));
            widths.push(first.map_or(0.0, |c| doc.items.item(c).size.width));
        }

        let next_cell = |cell: LayoutId| -> Option<LayoutId> {
            doc.items
                .next_sibling(cell)
                .filter(|&n| doc.items.item(n).kind == ItemKind::Content)
        };
        let cell_form = |cell: LayoutId| doc.items.item(cell).form;

        let mut col = 0usize;
        loop {
            let mut more = false;
            let mut auto_col = false;
            for i in 0..cells.len() {
                while let Some(cell) = cells[i] {
                    let visible = cell_form(cell).is_some_and(|f| requires_space(doc, f));
                    if spans[i] > 0 && visible {
                        break;
                    }
                    let next = if spans[i] < 0 && visible { None } else { next_cell(cell) };
                    cells[i] = next;
                    spans[i] = next.and_then(cell_form).map_or(0, |f| doc.attrs(f).col_span());
                    widths[i] = next.map_or(0.0, |c| doc.items.item(c).size.width);
                }
                if cells[i].is_none() {
                    continue;
                }
                more = true;
                if spans[i] != 1 {
                    continue;
                }
                while self.column_widths.len() <= col {
                    self.column_widths.push(0.0);
                }
                if self.column_widths[col] < LAYOUT_PRECISION {
                    auto_col = true;
                }
                if auto_col && self.column_widths[col] < widths[i] {
                    self.column_widths[col] = widths[i];
                }
            }
            if !more {
                break;
            }
            let final_width = self.column_widths.get(col).copied().unwrap_or(0.0);
            for i in 0..cells.len() {
                if cells[i].is_some() {
                    spans[i] -= 1;
                    widths[i] -= final_width;
                }
            }
            col += 1;
        }
    }
}

fn content_form(env: &LayoutEnv<'_>, item: LayoutId) -> Option<FormId> {
    let it = env.doc.items.item(item);
    it.form.filter(|_| it.kind == ItemKind::Content)
}

/// Size of `item` once its width and/or height are forced. Containers keep
/// their own size on unforced axes; widgets are measured again.
pub(super) fn update_widget_size(env: &LayoutEnv<'_>, item: LayoutId, width: Option<f64>, height: Option<f64>) -> Size {
    let it = env.doc.items.item(item);
    let Some(form) = it.form else {
        return it.size;
    };
    match env.doc.form.element(form) {
        Element::Subform | Element::Area | Element::ExclGroup | Element::SubformSet => {
            Size::new(width.unwrap_or(it.size.width), height.unwrap_or(it.size.height))
        }
        Element::Field | Element::Draw => env.measure.measure(env.doc, form, width, height),
        _ => it.size,
    }
}

/// Lay the cells of a row item out across `widths`.
pub(super) fn relocate_row_cells(env: &mut LayoutEnv<'_>, row: LayoutId, widths: &[f64], layout: LayoutStrategy) {
    let Some(row_form) = env.doc.items.item(row).form else {
        return;
    };
    let (container, w_auto, h_auto) = container_specified_size(env.doc, row_form);
    let inset = env.doc.attrs(row_form).insets();
    let content_width_limit = if w_auto {
        UNBOUNDED
    } else {
        container.width - inset.left - inset.right
    };
    let content_height = env.doc.items.item(row).size.height - inset.top - inset.bottom;

    let columns = widths.len() as i32;
    let mut content_width = 0.0f64;
    let mut tallest = 0.0f64;
    let mut x = 0.0;
    let mut col = 0i32;
    let mut met_whole_row = false;
    let cells: Vec<LayoutId> = env
        .doc
        .items
        .children(row)
        .iter()
        .copied()
        .filter(|&c| env.doc.items.item(c).kind == ItemKind::Content)
        .collect();

    for &cell in &cells {
        let Some(cell_form) = env.doc.items.item(cell).form else {
            continue;
        };
        let original = env.doc.attrs(cell_form).col_span();
        if original <= 0 && original != -1 {
            continue;
        }
        let mut span = original;
        if span == -1 || col + span > columns {
            span = columns - col;
        }
        let mut span_width: f64 = (0..span.max(0))
            .filter_map(|i| widths.get((col + i) as usize))
            .sum();
        if span != original {
            span_width = if met_whole_row {
                0.0
            } else {
                span_width.max(env.doc.items.item(cell).size.height)
            };
        }
        if original == -1 {
            met_whole_row = true;
        }

        {
            let it = env.doc.items.item_mut(cell);
            it.pos = crate::geometry::Point::new(x, 0.0);
            it.size.width = span_width;
        }
        if !requires_space(env.doc, cell_form) {
            continue;
        }
        x += span_width;
        col += span;

        let forced_height = (!h_auto).then_some(content_height);
        let size = update_widget_size(env, cell, Some(span_width), forced_height);
        env.doc.items.item_mut(cell).size.height = size.height;
        if h_auto {
            tallest = tallest.max(size.height);
        }
    }

    if h_auto {
        for &cell in &cells {
            let width = env.doc.items.item(cell).size.width;
            let size = update_widget_size(env, cell, Some(width), Some(tallest));
            let old_height = env.doc.items.item(cell).size.height;
            {
                let it = env.doc.items.item_mut(cell);
                it.size.width = size.width;
                it.size.height = tallest;
            }
            let Some(cell_form) = env.doc.items.item(cell).form else {
                continue;
            };
            let Some(v_align) = env.doc.attrs(cell_form).v_align else {
                continue;
            };
            let offset = tallest - old_height;
            let offset = match v_align {
                VAlign::Middle => offset / 2.0,
                VAlign::Bottom => offset,
                VAlign::Top => 0.0,
            };
            if offset <= 0.0 {
                continue;
            }
            for child in env.doc.items.children(cell).to_vec() {
                if env.doc.items.item(child).kind == ItemKind::Content {
                    env.doc.items.item_mut(child).pos.y += offset;
                }
            }
        }
    }

    if w_auto {
        let mut supplied = x;
        if content_width_limit < UNBOUNDED && content_width_limit > supplied {
            supplied = content_width_limit;
        }
        content_width = content_width.max(supplied);
    } else {
        content_width = container.width - inset.left - inset.right;
    }

    if layout == LayoutStrategy::RlRow {
        for &cell in &cells {
            let it = env.doc.items.item_mut(cell);
            it.pos.x = content_width - it.pos.x - it.size.width;
        }
    }

    let size = size_from_content(env.doc, row_form, w_auto, content_width, h_auto, tallest, container);
    env.doc.items.item_mut(row).size = size;
}
