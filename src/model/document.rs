//! The document: template, data, merged form and layout items under one
//! owner.
//!
//! Everything the engines mutate lives here so that a merge or layout pass
//! is a sequence of `&mut Document` calls with no shared ownership.

use super::{Attributes, DataId, DataTree, Element, FormId, FormTree, Template};
use crate::error::{DefectLog, FlowError};
use crate::layout::LayoutArena;
use crate::merge::{BindingContext, TemplateBinder};

#[derive(Debug)]
pub struct Document {
    pub template: Template,
    pub data: DataTree,
    pub form: FormTree,
    pub items: LayoutArena,
    pub ctx: BindingContext,
    pub defects: DefectLog,
}

impl Document {
    pub fn new(template: Template, data: DataTree) -> Self {
        let form = FormTree::new(template.root());
        Self {
            template,
            data,
            form,
            items: LayoutArena::default(),
            ctx: BindingContext::default(),
            defects: DefectLog::default(),
        }
    }

    /// Parse a template and an optional data instance.
    pub fn from_json(template: &str, data: Option<&str>) -> Result<Self, FlowError> {
        let template = Template::from_json(template)?;
        let data = match data {
            Some(json) => DataTree::from_json(json)?,
            None => DataTree::new(),
        };
        Ok(Self::new(template, data))
    }

    pub fn binder(&mut self) -> TemplateBinder<'_> {
        TemplateBinder {
            template: &self.template,
            data: &mut self.data,
            form: &mut self.form,
            ctx: &mut self.ctx,
            defects: &mut self.defects,
        }
    }

    /// Build the form tree from scratch. Returns the root subform instance.
    pub fn merge(&mut self) -> Option<FormId> {
        self.form = FormTree::new(self.template.root());
        let root = self.binder().merge();
        self.prune_unused();
        root
    }

    /// Drop every binding, the form tree and its layout items, then merge
    /// again.
    pub fn remerge(&mut self) -> Option<FormId> {
        let form_root = self.form.root();
        for child in self.form.children(form_root).to_vec() {
            self.delete_form(child);
        }
        self.data.clear_bindings();
        self.ctx.clear_globals();
        self.ctx.reset_emitted();
        self.merge()
    }

    pub fn bind(&mut self, form: FormId, data: DataId) {
        self.binder().bind(form, data);
    }

    pub fn unbind(&mut self, form: FormId) {
        self.binder().unbind(form);
    }

    pub fn bound_data(&self, form: FormId) -> Option<DataId> {
        self.form
            .get(form)
            .and_then(|n| n.bound)
            .filter(|&d| self.data.contains(d))
    }

    /// The top-level subform of the merged form.
    pub fn root_subform(&self) -> Option<FormId> {
        let root = self.form.root();
        self.form
            .children(root)
            .iter()
            .copied()
            .find(|&c| self.form.element(c) == Element::Subform)
    }

    /// Attributes of the template node a form node was cloned from.
    pub fn attrs(&self, form: FormId) -> &Attributes {
        self.template.attrs(self.form.template(form))
    }

    /// Nearest data node bound to `form` or one of its ancestors.
    pub fn data_scope(&self, form: FormId) -> DataId {
        let mut cur = Some(form);
        while let Some(id) = cur {
            if let Some(data) = self.bound_data(id) {
                if self.data.node(data).kind == super::DataKind::Group {
                    return data;
                }
            }
            cur = self.form.parent(id);
        }
        self.data.root()
    }

    /// Delete a form subtree together with its bindings and layout items.
    pub fn delete_form(&mut self, form: FormId) {
        for (id, node) in self.form.remove_subtree(form) {
            if let Some(data) = node.bound.filter(|&d| self.data.contains(d)) {
                self.data.node_mut(data).bound.retain(|&f| f != id);
            }
            if let Some(head) = node.layout_item.filter(|&h| self.items.contains(h)) {
                for item in self.items.chain(head) {
                    self.items.release(item);
                }
            }
        }
    }

    /// Remove form nodes left flagged as unused.
    pub fn prune_unused(&mut self) -> usize {
        let root = self.form.root();
        let unused: Vec<FormId> = self
            .form
            .descendants(root)
            .into_iter()
            .filter(|&id| self.form.node(id).flags.unused)
            .collect();
        let mut removed = 0;
        for id in unused {
            if self.form.contains(id) {
                self.delete_form(id);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "pruned unused form nodes");
        }
        removed
    }

    /// Flag `form` and its descendants unused and drop their bindings.
    pub fn set_unused(&mut self, form: FormId) {
        for id in self.form.descendants(form) {
            self.unbind(id);
            self.form.node_mut(id).flags.unused = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Helpers ────────────────────────────────────────────────────

    fn doc(template: &str, data: &str) -> Document {
        let mut doc = Document::from_json(template, Some(data)).unwrap();
        doc.merge();
        doc
    }

    const TEMPLATE: &str = r#"{ "element": "subform", "name": "root", "children": [
        { "element": "subform", "name": "body", "children": [ { "element": "field", "name": "x" } ] }
    ] }"#;

    #[test]
    fn test_merge_builds_root_subform() {
        let d = doc(TEMPLATE, r#"{ "body": { "x": "1" } }"#);
        let root = d.root_subform().unwrap();
        assert_eq!(d.form.name(root), "root");
        assert_eq!(d.data_scope(root), d.data.root());
    }

    #[test]
    fn test_remerge_is_idempotent() {
        let mut d = doc(TEMPLATE, r#"{ "body": { "x": "1" } }"#);
        let forms = d.form.len();
        let bindings = d.data.binding_count();
        d.remerge();
        assert_eq!(d.form.len(), forms);
        assert_eq!(d.data.binding_count(), bindings);
    }

    #[test]
    fn test_prune_unused_drops_bindings() {
        let mut d = doc(TEMPLATE, r#"{ "body": { "x": "1" } }"#);
        let root = d.root_subform().unwrap();
        let body = d
            .form
            .children(root)
            .iter()
            .copied()
            .find(|&c| d.form.name(c) == "body")
            .unwrap();
        d.set_unused(body);
        assert_eq!(d.data.binding_count(), 0);
        assert_eq!(d.prune_unused(), 1);
        assert!(!d.form.contains(body));
    }
}
