//! The merged form tree.
//!
//! Form nodes are owned by their parent through the `children` list; the
//! bound data node, the originating template node and the cached layout
//! item are plain keys, checked for liveness before use.

use slotmap::{new_key_type, SlotMap};

use super::{DataId, Element, TemplateId};
use crate::layout::LayoutId;

new_key_type! { pub struct FormId; }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormFlags {
    /// Left over from an earlier merge or leader emission; pruned later.
    pub unused: bool,
    pub initialized: bool,
    /// Created by the layout engine (leader, trailer, bookend, overflow).
    pub layout_generated: bool,
}

#[derive(Debug, Clone)]
pub struct FormNode {
    pub element: Element,
    pub name: String,
    pub template: TemplateId,
    pub parent: Option<FormId>,
    pub children: Vec<FormId>,
    pub bound: Option<DataId>,
    pub flags: FormFlags,
    pub value: Option<String>,
    /// Head of this node's split chain from the latest layout pass.
    pub layout_item: Option<LayoutId>,
}

#[derive(Debug, Clone)]
pub struct FormTree {
    nodes: SlotMap<FormId, FormNode>,
    root: FormId,
}

impl FormTree {
    pub fn new(root_template: TemplateId) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(FormNode {
            element: Element::Form,
            name: String::new(),
            template: root_template,
            parent: None,
            children: Vec::new(),
            bound: None,
            flags: FormFlags::default(),
            value: None,
            layout_item: None,
        });
        Self { nodes, root }
    }

    pub fn root(&self) -> FormId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: FormId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: FormId) -> Option<&FormNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: FormId) -> &FormNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: FormId) -> &mut FormNode {
        &mut self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormId, &FormNode)> {
        self.nodes.iter()
    }

    pub fn create(
        &mut self,
        parent: FormId,
        template: TemplateId,
        element: Element,
        name: &str,
    ) -> FormId {
        let id = self.nodes.insert(FormNode {
            element,
            name: name.to_string(),
            template,
            parent: Some(parent),
            children: Vec::new(),
            bound: None,
            flags: FormFlags::default(),
            value: None,
            layout_item: None,
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn element(&self, id: FormId) -> Element {
        self.nodes[id].element
    }

    pub fn template(&self, id: FormId) -> TemplateId {
        self.nodes[id].template
    }

    pub fn name(&self, id: FormId) -> &str {
        &self.nodes[id].name
    }

    pub fn parent(&self, id: FormId) -> Option<FormId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: FormId) -> &[FormId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn first_child(&self, id: FormId) -> Option<FormId> {
        self.children(id).first().copied()
    }

    pub fn next_sibling(&self, id: FormId) -> Option<FormId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn is_container(&self, id: FormId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.element.is_container())
    }

    pub fn first_container_child(&self, id: FormId) -> Option<FormId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.is_container(c))
    }

    pub fn next_container_sibling(&self, id: FormId) -> Option<FormId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings[pos + 1..]
            .iter()
            .copied()
            .find(|&c| self.is_container(c))
    }

    pub fn prev_container_sibling(&self, id: FormId) -> Option<FormId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings[..pos]
            .iter()
            .rev()
            .copied()
            .find(|&c| self.is_container(c))
    }

    /// Nearest ancestor that is a container.
    pub fn container_parent(&self, id: FormId) -> Option<FormId> {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if self.is_container(p) {
                return Some(p);
            }
            cur = self.parent(p);
        }
        None
    }

    /// Pre-order walk of `id` and its descendants.
    pub fn descendants(&self, id: FormId) -> Vec<FormId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if !self.contains(cur) {
                continue;
            }
            out.push(cur);
            stack.extend(self.children(cur).iter().rev().copied());
        }
        out
    }

    /// Detach `id` from its parent and delete it with its subtree.
    /// Returns the deleted nodes so callers can drop bindings and items.
    pub fn remove_subtree(&mut self, id: FormId) -> Vec<(FormId, FormNode)> {
        if let Some(parent) = self.parent(id) {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.nodes.remove(n).map(|node| (n, node)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Template;

    fn tree() -> (FormTree, TemplateId) {
        let t = Template::from_json(r#"{ "element": "subform" }"#).unwrap();
        (FormTree::new(t.root()), t.root_subform())
    }

    #[test]
    fn test_container_navigation() {
        let (mut forms, tpl) = tree();
        let root = forms.root();
        let sub = forms.create(root, tpl, Element::Subform, "body");
        let brk = forms.create(sub, tpl, Element::BreakBefore, "");
        let a = forms.create(sub, tpl, Element::Field, "a");
        let b = forms.create(sub, tpl, Element::Field, "b");

        assert_eq!(forms.first_container_child(sub), Some(a));
        assert_eq!(forms.next_container_sibling(a), Some(b));
        assert_eq!(forms.prev_container_sibling(a), None);
        assert_eq!(forms.container_parent(brk), Some(sub));
        assert_eq!(forms.next_sibling(brk), Some(a));
    }

    #[test]
    fn test_remove_subtree() {
        let (mut forms, tpl) = tree();
        let root = forms.root();
        let sub = forms.create(root, tpl, Element::Subform, "body");
        let a = forms.create(sub, tpl, Element::Field, "a");

        let removed = forms.remove_subtree(sub);
        assert_eq!(removed.len(), 2);
        assert!(!forms.contains(a));
        assert!(forms.children(root).is_empty());
    }
}
