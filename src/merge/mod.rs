//! # Data Merge
//!
//! Clones template nodes into form nodes, replicates them according to
//! their occurrence, and binds each instance to a data node.
//!
//! ## Binding modes
//!
//! - `none`: no data access; the instance keeps its template value.
//! - `once`: nearest unbound data node with the same name, searching the
//!   current scope and then each ancestor scope.
//! - `global`: values are looked up in a per-document registry keyed by
//!   name hash, then by an unrestricted search whose hit is registered, so
//!   every `global` field with that name shares one data node. A miss, and
//!   any group match, degrades to `once`.
//! - `dataRef`: an explicit path, created in the data tree when missing.
//!
//! All state that must survive between lookups (the global registry and the
//! per-template leader/trailer counters) lives in [`BindingContext`], which
//! is owned by the document rather than by any global.

pub mod matching;

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::error::{Defect, DefectLog};
use crate::model::{
    BindMatch, DataId, DataKind, DataTree, Element, FormId, FormTree, Relation, Template,
    TemplateId,
};
use matching::DataRef;

/// Hash used to key global bindings.
pub fn name_hash(name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Binding state threaded through merge and layout.
#[derive(Debug, Default)]
pub struct BindingContext {
    globals: FxHashMap<u64, DataId>,
    emitted: FxHashMap<TemplateId, u32>,
}

impl BindingContext {
    pub fn global(&self, name: &str) -> Option<DataId> {
        self.globals.get(&name_hash(name)).copied()
    }

    pub fn register_global(&mut self, name: &str, data: DataId) {
        self.globals.insert(name_hash(name), data);
    }

    pub fn clear_globals(&mut self) {
        self.globals.clear();
    }

    /// How many times a leader/trailer template was emitted this pass.
    pub fn emitted(&self, template: TemplateId) -> u32 {
        self.emitted.get(&template).copied().unwrap_or(0)
    }

    pub fn note_emitted(&mut self, template: TemplateId) {
        *self.emitted.entry(template).or_insert(0) += 1;
    }

    pub fn reset_emitted(&mut self) {
        self.emitted.clear();
    }
}

/// A data node found for a template node during the subtree walk.
#[derive(Debug, Clone, Copy)]
struct Match {
    data: DataId,
    template: TemplateId,
}

/// Pre-order walk over the container descendants of one template node.
struct ContainerWalk {
    current: Option<TemplateId>,
    stack: Vec<TemplateId>,
}

impl ContainerWalk {
    fn new(start: TemplateId) -> Self {
        Self {
            current: Some(start),
            stack: Vec::new(),
        }
    }

    fn move_next(&mut self, template: &Template) {
        if let Some(cur) = self.current {
            self.stack.extend(
                template
                    .children(cur)
                    .iter()
                    .rev()
                    .copied()
                    .filter(|&c| template.element(c).is_container()),
            );
        }
        self.current = self.stack.pop();
    }

    fn skip_children(&mut self) {
        self.current = self.stack.pop();
    }
}

/// Merges a template into the form tree.
pub struct TemplateBinder<'a> {
    pub template: &'a Template,
    pub data: &'a mut DataTree,
    pub form: &'a mut FormTree,
    pub ctx: &'a mut BindingContext,
    pub defects: &'a mut DefectLog,
}

impl<'a> TemplateBinder<'a> {
    /// Merge the root subform under the form root. Returns the root subform
    /// instance.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn merge(&mut self) -> Option<FormId> {
        let tpl = self.template;
        let root_template = tpl.root_subform();
        let form_root = self.form.root();
        let scope = self.data.root();
        let root = self.copy_container(root_template, form_root, scope, true, true, true);
        tracing::debug!(
            forms = self.form.len(),
            bindings = self.data.binding_count(),
            "merge complete"
        );
        root
    }

    /// Single-instance merge for content the layout engine creates on
    /// demand (leaders, trailers, bookends, overflow content).
    pub fn instantiate(
        &mut self,
        template: TemplateId,
        parent: FormId,
        scope: DataId,
    ) -> Option<FormId> {
        let node = self.copy_container(template, parent, scope, true, true, true)?;
        for id in self.form.descendants(node) {
            self.form.node_mut(id).flags.unused = false;
        }
        // Only the instance root is generated.
        self.form.node_mut(node).flags.layout_generated = true;
        Some(node)
    }

    pub fn bind(&mut self, form: FormId, data: DataId) {
        self.unbind(form);
        self.form.node_mut(form).bound = Some(data);
        let node = self.data.node_mut(data);
        if !node.bound.contains(&form) {
            node.bound.push(form);
        }
        if node.kind == DataKind::Value {
            let value = node.value.clone();
            self.form.node_mut(form).value = value;
        }
    }

    pub fn unbind(&mut self, form: FormId) {
        let Some(data) = self.form.node_mut(form).bound.take() else {
            return;
        };
        if self.data.contains(data) {
            self.data.node_mut(data).bound.retain(|&f| f != form);
        }
    }

    fn copy_container(
        &mut self,
        template: TemplateId,
        parent: FormId,
        scope: DataId,
        one_instance: bool,
        data_merge: bool,
        up_level: bool,
    ) -> Option<FormId> {
        let tpl = self.template;
        match tpl.element(template) {
            Element::Subform | Element::SubformSet | Element::Area => {
                self.copy_subform_set(template, parent, scope, one_instance, data_merge, up_level)
            }
            Element::Field | Element::Draw | Element::ExclGroup | Element::ContentArea => {
                Some(self.copy_field(template, parent, scope, data_merge, up_level))
            }
            Element::PageSet | Element::PageArea => Some(self.copy_page_structure(template, parent, scope)),
            _ => Some(self.clone_descriptor(template, parent)),
        }
    }

    fn create_instance(&mut self, template: TemplateId, parent: FormId) -> FormId {
        let tpl = self.template;
        let node = tpl.node(template);
        let id = self
            .form
            .create(parent, template, node.element, node.attrs.name());
        let form = self.form.node_mut(id);
        form.value = node.attrs.value.clone();
        form.flags.initialized = true;
        id
    }

    fn copy_subform_set(
        &mut self,
        template: TemplateId,
        parent: FormId,
        scope: DataId,
        one_instance: bool,
        data_merge: bool,
        up_level: bool,
    ) -> Option<FormId> {
        let tpl = self.template;
        let element = tpl.element(template);
        let occur = if one_instance {
            crate::model::Occurrence::ONCE
        } else {
            tpl.occurrence(template)
        };
        if occur.max == Some(0) {
            return None;
        }
        let relation = match element {
            Element::SubformSet => tpl.relation(template).unwrap_or(Relation::Ordered),
            _ => Relation::Ordered,
        };

        let mut count = 0u32;
        let mut first = None;
        if data_merge {
            if element == Element::Subform {
                let mut bound = Vec::new();
                while occur.allows(count) {
                    let Some(m) = self.find_matching_data(template, scope, false, up_level) else {
                        break;
                    };
                    if m.template != template {
                        break;
                    }
                    let instance = self.create_instance(template, parent);
                    self.bind(instance, m.data);
                    bound.push((instance, m.data));
                    first.get_or_insert(instance);
                    count += 1;
                }
                if !occur.allows(count) && self.has_more_once_data(template, scope) {
                    self.defects.record(Defect::OccurrenceExhausted {
                        name: tpl.name(template).to_string(),
                    });
                }
                for (instance, data) in bound {
                    self.merge_children(template, instance, data, relation, data_merge, up_level);
                }
            }

            // Instances without data of their own whose descendants match.
            while occur.allows(count) {
                let before = self.data.binding_count();
                if self
                    .find_matching_data(template, scope, false, up_level)
                    .is_none()
                {
                    break;
                }
                let instance = self.create_instance(template, parent);
                first.get_or_insert(instance);
                count += 1;
                self.merge_children(template, instance, scope, relation, data_merge, up_level);
                if self.data.binding_count() == before {
                    break;
                }
            }
        }

        let minimal = if count == 0 { occur.initial } else { occur.min };
        while count < minimal {
            let instance = self.create_instance(template, parent);
            first.get_or_insert(instance);
            count += 1;
            if relation == Relation::Choice {
                self.clone_descriptors(template, instance);
                let chosen = self
                    .template
                    .children(template)
                    .iter()
                    .copied()
                    .find(|&c| tpl.element(c).is_container());
                if let Some(child) = chosen {
                    self.copy_container(child, instance, scope, false, data_merge, up_level);
                }
            } else {
                self.merge_children(template, instance, scope, Relation::Ordered, data_merge, up_level);
            }
        }
        tracing::trace!(name = tpl.name(template), count, "replicated");
        first
    }

    fn merge_children(
        &mut self,
        template: TemplateId,
        instance: FormId,
        scope: DataId,
        relation: Relation,
        data_merge: bool,
        up_level: bool,
    ) {
        let tpl = self.template;
        if data_merge && matches!(relation, Relation::Choice | Relation::Unordered) {
            self.merge_related_children(template, instance, scope, relation, up_level);
            return;
        }
        for &child in tpl.children(template) {
            self.copy_container(child, instance, scope, false, data_merge, up_level);
        }
    }

    /// Children of a `choice` or `unordered` subform set.
    fn merge_related_children(
        &mut self,
        template: TemplateId,
        instance: FormId,
        scope: DataId,
        relation: Relation,
        up_level: bool,
    ) {
        let tpl = self.template;
        let choice = relation == Relation::Choice;
        let mut matched: Vec<(TemplateId, DataId)> = Vec::new();
        let mut unmatched = Vec::new();
        for &child in tpl.children(template) {
            if !tpl.element(child).is_container() {
                self.clone_descriptor(child, instance);
                continue;
            }
            match self.find_matching_data(child, scope, false, up_level) {
                Some(m) if m.template == child => matched.insert(0, (child, m.data)),
                Some(m) => matched.push((child, m.data)),
                None => unmatched.push(child),
            }
        }
        sort_by_data_order(self.data, &mut matched, scope, choice);

        if choice {
            if let Some(&(child, _)) = matched.first() {
                self.copy_container(child, instance, scope, false, true, up_level);
            }
            return;
        }
        for (child, _) in matched {
            self.copy_container(child, instance, scope, false, true, up_level);
        }
        for child in unmatched {
            self.copy_container(child, instance, scope, false, true, up_level);
        }
    }

    fn copy_field(
        &mut self,
        template: TemplateId,
        parent: FormId,
        scope: DataId,
        data_merge: bool,
        up_level: bool,
    ) -> FormId {
        let tpl = self.template;
        let node = self.create_instance(template, parent);
        let element = tpl.element(template);
        for &child in tpl.children(template) {
            let child_element = tpl.element(child);
            if element == Element::ExclGroup && child_element == Element::Field {
                self.copy_field(child, node, scope, false, up_level);
            } else if child_element.is_container() {
                self.copy_container(child, node, scope, false, data_merge, up_level);
            } else {
                self.clone_descriptor(child, node);
            }
        }

        if !data_merge || !matches!(element, Element::Field | Element::ExclGroup) {
            return node;
        }
        match self.find_matching_data(template, scope, true, up_level) {
            Some(m) if m.template == template => self.bind(node, m.data),
            _ => {
                if tpl.attrs(template).bind_match() != BindMatch::None {
                    self.defects.record(Defect::UnboundElement {
                        name: tpl.name(template).to_string(),
                    });
                }
            }
        }
        node
    }

    /// Page sets and page areas are copied once, unbound; the pagination
    /// code decides how often each page area is realized.
    fn copy_page_structure(&mut self, template: TemplateId, parent: FormId, scope: DataId) -> FormId {
        let tpl = self.template;
        let node = self.create_instance(template, parent);
        for &child in tpl.children(template) {
            self.copy_container(child, node, scope, true, false, false);
        }
        node
    }

    fn clone_descriptor(&mut self, template: TemplateId, parent: FormId) -> FormId {
        let node = self.create_instance(template, parent);
        self.clone_descriptors(template, node);
        node
    }

    /// Clone the non-container children of `template` under `instance`.
    fn clone_descriptors(&mut self, template: TemplateId, instance: FormId) {
        let tpl = self.template;
        for &child in tpl.children(template) {
            if !tpl.element(child).is_container() {
                self.clone_descriptor(child, instance);
            }
        }
    }

    fn has_more_once_data(&self, template: TemplateId, scope: DataId) -> bool {
        let tpl = self.template;
        let attrs = tpl.attrs(template);
        attrs.bind_match() == BindMatch::Once
            && matching::find_once(self.data, attrs.name(), scope, DataKind::Group).is_some()
    }

    /// Find data for `start` or, failing that, for the first descendant
    /// container that has some.
    fn find_matching_data(
        &mut self,
        start: TemplateId,
        scope: DataId,
        force_bind: bool,
        up_level: bool,
    ) -> Option<Match> {
        let tpl = self.template;
        let mut walk = ContainerWalk::new(start);
        while let Some(cur) = walk.current {
            let kind = match tpl.element(cur) {
                Element::Subform => DataKind::Group,
                Element::Field | Element::ExclGroup => DataKind::Value,
                Element::PageSet => {
                    walk.skip_children();
                    continue;
                }
                _ => {
                    walk.move_next(tpl);
                    continue;
                }
            };
            if tpl.occurrence(cur).max == Some(0) {
                walk.move_next(tpl);
                continue;
            }

            let attrs = tpl.attrs(cur);
            let name = attrs.name();
            let found = match attrs.bind_match() {
                BindMatch::None => None,
                BindMatch::Global if kind == DataKind::Value => {
                    if !force_bind {
                        walk.move_next(tpl);
                        continue;
                    }
                    self.find_global(name, scope, kind, up_level)
                        .or_else(|| matching::find_once(self.data, name, scope, kind))
                }
                BindMatch::Global | BindMatch::Once => matching::find_once(self.data, name, scope, kind),
                BindMatch::DataRef => {
                    let Some(reference) = attrs.bind_ref() else {
                        walk.move_next(tpl);
                        continue;
                    };
                    let found = match matching::resolve_data_ref(self.data, reference, scope, kind) {
                        Some(DataRef::Many(candidates)) => {
                            candidates.into_iter().find(|&d| !self.data.is_bound(d))
                        }
                        Some(DataRef::One(d)) if force_bind || !self.data.is_bound(d) => Some(d),
                        _ => None,
                    };
                    if found.is_none() {
                        walk.skip_children();
                        continue;
                    }
                    found
                }
            };
            match found {
                Some(data) => return Some(Match { data, template: cur }),
                None => walk.move_next(tpl),
            }
        }
        None
    }

    fn find_global(&mut self, name: &str, scope: DataId, kind: DataKind, up_level: bool) -> Option<DataId> {
        if let Some(hit) = self.ctx.global(name).filter(|&d| self.data.contains(d)) {
            return Some(hit);
        }
        let hit = matching::scope_match_global(self.data, name, scope, kind, up_level)?;
        self.ctx.register_global(name, hit);
        Some(hit)
    }
}

/// Order matched children by the position of their data among the
/// children of `scope`. `choice` keeps only the first.
fn sort_by_data_order(
    data: &DataTree,
    records: &mut Vec<(TemplateId, DataId)>,
    scope: DataId,
    choice: bool,
) {
    let mut sorted = Vec::with_capacity(records.len());
    for &d in data.children(scope) {
        if let Some(pos) = records.iter().position(|r| r.1 == d) {
            sorted.push(records.remove(pos));
            if choice {
                break;
            }
        }
    }
    if sorted.is_empty() {
        return;
    }
    if !choice {
        sorted.append(records);
    }
    *records = sorted;
}
