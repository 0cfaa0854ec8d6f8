//! Cutting a laid-out item in two.
//!
//! [`ContentLayoutProcessor::find_split_pos`] searches for the lowest cut
//! at or above a proposed offset that does not pass through anything kept
//! intact; [`ContentLayoutProcessor::split_item`] then moves everything
//! below the cut into a new item linked after the original in its split
//! chain.

use super::content::ContentLayoutProcessor;
use super::page_break::{declared_layout, exist_container_keep, intact};
use super::{ItemKind, LayoutEnv, LayoutId};
use crate::geometry::{Point, Size, LAYOUT_PRECISION};
use crate::model::{Document, KeepValue, LayoutStrategy};
use crate::notify::MeasureContent;

impl ContentLayoutProcessor {
    /// Best cut for the current item at or above `proposed`, measured from
    /// its top. Zero means no cut is possible.
    pub(super) fn find_split_pos(&self, env: &LayoutEnv<'_>, proposed: f64) -> f64 {
        let Some(item) = self.item else {
            return proposed;
        };
        let margin = declared_layout(env.doc, self.form) != LayoutStrategy::Position;
        let mut proposed = proposed;
        while proposed > LAYOUT_PRECISION {
            let mut changed = false;
            if !find_item_split_pos(env.doc, env.measure, item, 0.0, &mut proposed, &mut changed, margin) {
                break;
            }
        }
        proposed
    }

    pub(super) fn split_item_at(&mut self, env: &mut LayoutEnv<'_>, split_pos: f64) {
        if let Some(item) = self.item {
            self.split_item(env, item, None, split_pos);
        }
    }

    /// Cut `item` at `split_pos`. The lower part becomes a new item in the
    /// same split chain, appended to `second_parent` when given, placed
    /// after `item` when `item` has a parent, and queued as this
    /// processor's next part otherwise.
    pub(super) fn split_item(
        &mut self,
        env: &mut LayoutEnv<'_>,
        item: LayoutId,
        second_parent: Option<LayoutId>,
        split_pos: f64,
    ) {
        let Some(item_form) = env.doc.items.item(item).form else {
            return;
        };
        let margin = declared_layout(env.doc, self.form) != LayoutStrategy::Position;
        let (top, bottom) = if margin {
            let inset = env.doc.attrs(item_form).insets();
            (inset.top, inset.bottom)
        } else {
            (0.0, 0.0)
        };

        let second = if let Some(child) = self.child.as_deref_mut().filter(|c| c.form == item_form) {
            child.create_item(env, item_form)
        } else {
            self.create_item(env, item_form)
        };

        let (pos, size) = {
            let it = env.doc.items.item(item);
            (it.pos, it.size)
        };
        let has_children = env.doc.items.has_children(item);
        let mut second_height = size.height - split_pos;
        env.doc.items.item_mut(item).size.height -= second_height;
        if has_children {
            second_height += top;
        }
        {
            let it = env.doc.items.item_mut(second);
            it.pos = Point::new(pos.x, 0.0);
            it.size = Size::new(size.width, second_height);
        }

        let mut orphan = false;
        if let Some(parent) = second_parent {
            env.doc.items.append_child(parent, second);
            if top > 0.0 && has_children {
                env.doc.items.item_mut(parent).size.height += top;
                let mut up = env.doc.items.parent(parent);
                while let Some(p) = up {
                    if env.doc.items.item(p).kind == ItemKind::Content {
                        env.doc.items.item_mut(p).size.height += top;
                    }
                    up = env.doc.items.parent(p);
                }
            }
        } else if env.doc.items.parent(item).is_some() {
            env.doc.items.insert_after(item, second);
        } else {
            orphan = true;
        }

        let mut keep_height = 0.0;
        let mut add_margin = 0.0;
        let mut keep_items: Vec<LayoutId> = Vec::new();
        for child in env.doc.items.take_children(item) {
            let (child_y, child_h, child_form) = {
                let it = env.doc.items.item(child);
                (it.pos.y, it.size.height, it.form)
            };
            if split_pos <= top + child_y + bottom + LAYOUT_PRECISION {
                let kept_with_previous = child_form.is_some_and(|f| exist_container_keep(env.doc, f, true));
                if kept_with_previous && keep_height < LAYOUT_PRECISION {
                    for pre in keep_items.drain(..) {
                        env.doc.items.detach(pre);
                        let pre_h = env.doc.items.item(pre).size.height;
                        let it = env.doc.items.item_mut(pre);
                        it.pos.y = (it.pos.y - split_pos).max(0.0);
                        if it.pos.y + pre_h > keep_height {
                            it.pos.y = keep_height;
                            keep_height += pre_h;
                            env.doc.items.item_mut(second).size.height += pre_h;
                            if let Some(parent) = second_parent {
                                env.doc.items.item_mut(parent).size.height += pre_h;
                            }
                        }
                        env.doc.items.append_child(second, pre);
                    }
                }
                let offset = if kept_with_previous { split_pos } else { split_pos - bottom };
                env.doc.items.item_mut(child).pos.y += keep_height + add_margin - offset;
                env.doc.items.append_child(second, child);
                continue;
            }

            if split_pos + LAYOUT_PRECISION >= top + bottom + child_y + child_h {
                env.doc.items.append_child(item, child);
                if child_form.is_some_and(|f| exist_container_keep(env.doc, f, false)) {
                    keep_items.push(child);
                } else {
                    keep_items.clear();
                }
                continue;
            }

            let old_height = env.doc.items.item(second).size.height;
            self.split_item(env, child, Some(second), split_pos - top - bottom - child_y);
            add_margin = env.doc.items.item(second).size.height - old_height;
            env.doc.items.append_child(item, child);
        }

        if orphan {
            self.continuations.push_back(second);
        }
    }
}

/// Search `item`, whose top sits at `offset`, for a cut at or above
/// `proposed`. Returns whether `proposed` moved.
fn find_item_split_pos(
    doc: &Document,
    measure: &dyn MeasureContent,
    item: LayoutId,
    offset: f64,
    proposed: &mut f64,
    app_changed: &mut bool,
    margin: bool,
) -> bool {
    let it = doc.items.item(item);
    let Some(form) = it.form else {
        return false;
    };
    let height = it.size.height;
    if *proposed <= offset + LAYOUT_PRECISION || *proposed > offset + height - LAYOUT_PRECISION {
        return false;
    }

    if intact(doc, form) != KeepValue::None {
        *proposed = offset;
        return true;
    }

    let (top, bottom) = if margin {
        let inset = doc.attrs(form).insets();
        (inset.top, inset.bottom)
    } else {
        (0.0, 0.0)
    };
    let mut any_changed = false;
    let mut changed = true;
    while changed {
        changed = false;
        let index = doc.items.chain_index(item);
        if let Some(rel) = measure.find_split_pos(doc, form, index, *proposed - offset) {
            let cut = offset + rel;
            if cut < *proposed - LAYOUT_PRECISION {
                any_changed = true;
                changed = true;
                *proposed = cut;
                *app_changed = true;
                if *proposed <= offset + LAYOUT_PRECISION {
                    return true;
                }
            }
        }

        let mut rel_split = *proposed - bottom;
        for &child in doc.items.children(item) {
            let child_item = doc.items.item(child);
            if child_item.kind != ItemKind::Content {
                continue;
            }
            let child_offset = offset + top + child_item.pos.y;
            let mut child_changed = false;
            if !find_item_split_pos(doc, measure, child, child_offset, &mut rel_split, &mut child_changed, margin) {
                continue;
            }
            if rel_split - child_offset < LAYOUT_PRECISION && child_changed {
                *proposed = rel_split - top;
            } else {
                *proposed = rel_split + bottom;
            }
            any_changed = true;
            changed = true;
            if *proposed <= offset + LAYOUT_PRECISION {
                return true;
            }
            break;
        }
    }
    any_changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::tests::{child_named, Harness};
    use crate::notify::TemplateMeasure;

    // ─── Helpers ────────────────────────────────────────────────────

    const STACK: &str = r#"{ "element": "subform", "name": "root", "children": [
        { "element": "subform", "name": "body", "layout": "tb", "w": 200, "children": [
            { "element": "field", "name": "a", "w": 100, "h": 30 },
            { "element": "field", "name": "b", "w": 100, "h": 30 },
            { "element": "field", "name": "c", "w": 100, "h": 30 }
        ] }
    ] }"#;

    fn split_pos(h: &mut Harness, processor: &ContentLayoutProcessor, proposed: f64) -> f64 {
        let env = LayoutEnv {
            doc: &mut h.doc,
            pages: &mut h.pages,
            measure: &TemplateMeasure,
            pass: h.pass,
        };
        processor.find_split_pos(&env, proposed)
    }

    #[test]
    fn test_split_pos_snaps_to_widget_boundary() {
        let mut h = Harness::new(STACK, None);
        let root = h.doc.root_subform().unwrap();
        let body = child_named(&h.doc, root, "body");
        let (processor, _) = h.layout(body, crate::geometry::UNBOUNDED);
        assert_eq!(split_pos(&mut h, &processor, 45.0), 30.0);
        assert_eq!(split_pos(&mut h, &processor, 60.0), 60.0);
        assert_eq!(split_pos(&mut h, &processor, 20.0), 0.0);
    }

    #[test]
    fn test_split_moves_lower_children() {
        let mut h = Harness::new(STACK, None);
        let root = h.doc.root_subform().unwrap();
        let body = child_named(&h.doc, root, "body");
        let (mut processor, _) = h.layout(body, crate::geometry::UNBOUNDED);
        let first = processor.item.unwrap();
        {
            let mut env = LayoutEnv {
                doc: &mut h.doc,
                pages: &mut h.pages,
                measure: &TemplateMeasure,
                pass: h.pass,
            };
            processor.split_item_at(&mut env, 30.0);
        }
        let second = *processor.continuations.front().unwrap();
        assert_eq!(h.child_names(first), vec!["a"]);
        assert_eq!(h.child_names(second), vec!["b", "c"]);
        assert_eq!(h.doc.items.item(first).size.height, 30.0);
        assert_eq!(h.doc.items.item(second).size.height, 60.0);
        let ys: Vec<f64> = h
            .doc
            .items
            .children(second)
            .iter()
            .map(|&c| h.doc.items.item(c).pos.y)
            .collect();
        assert_eq!(ys, vec![0.0, 30.0]);
        assert_eq!(h.doc.items.chain(first), vec![first, second]);

        // The split parts are handed out in order.
        assert_eq!(h.extract(&mut processor), Some(first));
        assert_eq!(h.extract(&mut processor), Some(second));
        assert_eq!(h.extract(&mut processor), None);
    }
}
