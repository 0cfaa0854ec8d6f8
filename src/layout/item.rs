//! Layout items: positioned boxes for form nodes and page structure.
//!
//! Items live in a slotmap arena. Parent/child links are the ownership
//! edges; the prev/next split chain and the form node's cache slot are
//! plain keys. Structural changes queue [`LayoutEvent`]s which the
//! orchestrator forwards to the host after each step.

use slotmap::{new_key_type, SlotMap};

use crate::geometry::{Point, Rect, Size};
use crate::model::{FormId, Template, TemplateId};

new_key_type! { pub struct LayoutId; }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Box of a form node.
    Content,
    PageSet,
    PageArea,
    ContentArea,
}

impl ItemKind {
    pub fn is_view(self) -> bool {
        !matches!(self, ItemKind::Content)
    }
}

#[derive(Debug, Clone)]
pub struct LayoutItem {
    pub kind: ItemKind,
    /// Set for content items.
    pub form: Option<FormId>,
    pub template: TemplateId,
    pub pos: Point,
    pub size: Size,
    pub parent: Option<LayoutId>,
    pub children: Vec<LayoutId>,
    pub prev: Option<LayoutId>,
    pub next: Option<LayoutId>,
    /// Layout pass that last produced or reused this item.
    pub pass: u32,
}

impl LayoutItem {
    pub fn rect(&self) -> Rect {
        Rect::from_parts(self.pos, self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Created,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEvent {
    ItemAdded(LayoutId),
    ItemRemoving { item: LayoutId, form: Option<FormId> },
    Page { page: LayoutId, event: PageEvent },
}

#[derive(Debug, Default)]
pub struct LayoutArena {
    items: SlotMap<LayoutId, LayoutItem>,
    events: Vec<LayoutEvent>,
}

impl LayoutArena {
    pub fn create(&mut self, kind: ItemKind, form: Option<FormId>, template: TemplateId, pass: u32) -> LayoutId {
        let id = self.items.insert(LayoutItem {
            kind,
            form,
            template,
            pos: Point::default(),
            size: Size::default(),
            parent: None,
            children: Vec::new(),
            prev: None,
            next: None,
            pass,
        });
        if kind == ItemKind::Content {
            self.events.push(LayoutEvent::ItemAdded(id));
        }
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: LayoutId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: LayoutId) -> Option<&LayoutItem> {
        self.items.get(id)
    }

    pub fn item(&self, id: LayoutId) -> &LayoutItem {
        &self.items[id]
    }

    pub fn item_mut(&mut self, id: LayoutId) -> &mut LayoutItem {
        &mut self.items[id]
    }

    pub fn ids(&self) -> Vec<LayoutId> {
        self.items.keys().collect()
    }

    pub fn children(&self, id: LayoutId) -> &[LayoutId] {
        self.items.get(id).map_or(&[], |i| i.children.as_slice())
    }

    pub fn has_children(&self, id: LayoutId) -> bool {
        !self.children(id).is_empty()
    }

    pub fn parent(&self, id: LayoutId) -> Option<LayoutId> {
        self.items.get(id).and_then(|i| i.parent)
    }

    pub fn next_sibling(&self, id: LayoutId) -> Option<LayoutId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn set_pos(&mut self, id: LayoutId, pos: Point) {
        self.items[id].pos = pos;
    }

    pub fn set_size(&mut self, id: LayoutId, size: Size) {
        self.items[id].size = size;
    }

    pub fn detach(&mut self, child: LayoutId) {
        let Some(parent) = self.items.get_mut(child).and_then(|c| c.parent.take()) else {
            return;
        };
        if let Some(p) = self.items.get_mut(parent) {
            p.children.retain(|&c| c != child);
        }
    }

    pub fn append_child(&mut self, parent: LayoutId, child: LayoutId) {
        self.detach(child);
        self.items[child].parent = Some(parent);
        self.items[parent].children.push(child);
    }

    pub fn prepend_child(&mut self, parent: LayoutId, child: LayoutId) {
        self.detach(child);
        self.items[child].parent = Some(parent);
        self.items[parent].children.insert(0, child);
    }

    /// Insert `child` right after `after` in `after`'s parent.
    pub fn insert_after(&mut self, after: LayoutId, child: LayoutId) {
        let Some(parent) = self.parent(after) else {
            return;
        };
        self.detach(child);
        let siblings = &mut self.items[parent].children;
        let pos = siblings
            .iter()
            .position(|&c| c == after)
            .map_or(siblings.len(), |p| p + 1);
        siblings.insert(pos, child);
        self.items[child].parent = Some(parent);
    }

    /// Detach every child of `id` and return them in order.
    pub fn take_children(&mut self, id: LayoutId) -> Vec<LayoutId> {
        let children = std::mem::take(&mut self.items[id].children);
        for &c in &children {
            if let Some(child) = self.items.get_mut(c) {
                child.parent = None;
            }
        }
        children
    }

    /// Link `item` at the end of the chain that starts at `head`.
    pub fn chain_append(&mut self, head: LayoutId, item: LayoutId) {
        let mut last = head;
        while let Some(next) = self.items[last].next {
            last = next;
        }
        if last == item {
            return;
        }
        self.items[last].next = Some(item);
        self.items[item].prev = Some(last);
    }

    /// Position of `id` within its split chain.
    pub fn chain_index(&self, id: LayoutId) -> usize {
        let mut index = 0;
        let mut cur = self.items.get(id).and_then(|i| i.prev);
        while let Some(prev) = cur {
            index += 1;
            cur = self.items.get(prev).and_then(|i| i.prev);
        }
        index
    }

    pub fn chain(&self, head: LayoutId) -> Vec<LayoutId> {
        let mut out = Vec::new();
        let mut cur = Some(head);
        while let Some(id) = cur.filter(|&c| self.contains(c)) {
            out.push(id);
            cur = self.items[id].next;
        }
        out
    }

    /// Remove a single item. Its children become parentless; the split
    /// chain is relinked around it.
    pub fn release(&mut self, id: LayoutId) -> Option<LayoutItem> {
        self.detach(id);
        let item = self.items.remove(id)?;
        for &c in &item.children {
            if let Some(child) = self.items.get_mut(c) {
                if child.parent == Some(id) {
                    child.parent = None;
                }
            }
        }
        if let Some(prev) = item.prev.and_then(|p| self.items.get_mut(p)) {
            prev.next = item.next;
        }
        if let Some(next) = item.next.and_then(|n| self.items.get_mut(n)) {
            next.prev = item.prev;
        }
        self.events.push(LayoutEvent::ItemRemoving {
            item: id,
            form: item.form,
        });
        Some(item)
    }

    pub fn push_event(&mut self, event: LayoutEvent) {
        self.events.push(event);
    }

    pub fn drain_events(&mut self) -> Vec<LayoutEvent> {
        std::mem::take(&mut self.events)
    }

    /// Absolute origin of `id`, summing parent offsets. Children of a
    /// content item sit inside its left and top insets.
    pub fn absolute_pos(&self, id: LayoutId, template: &Template) -> Point {
        let mut pos = Point::default();
        let mut cur = Some(id);
        while let Some(item) = cur.and_then(|c| self.items.get(c)) {
            pos.x += item.pos.x;
            pos.y += item.pos.y;
            cur = item.parent;
            if let Some(parent) = cur.and_then(|p| self.items.get(p)) {
                if parent.kind == ItemKind::Content {
                    let inset = template.attrs(parent.template).insets();
                    pos.x += inset.left;
                    pos.y += inset.top;
                }
            }
        }
        pos
    }
}
