//! The immutable template arena.
//!
//! A [`TemplateDef`] tree is flattened into a vector of nodes indexed by
//! [`TemplateId`]. The top node is always a synthetic `form` element whose
//! first subform child is the root subform. The root subform always owns a
//! page set with at least one page area; a default letter-size page is
//! supplied when the input declares none.

use rustc_hash::FxHashMap;

use super::{Attributes, Element, Medium, Orientation, Relation, TemplateDef};
use crate::error::FlowError;
use crate::geometry::{Measurement, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(u32);

impl TemplateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct TemplateNode {
    pub element: Element,
    pub attrs: Attributes,
    pub parent: Option<TemplateId>,
    pub children: Vec<TemplateId>,
}

/// Normalised replication bounds: `min <= initial <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub min: u32,
    pub initial: u32,
    /// `None` is unbounded.
    pub max: Option<u32>,
}

impl Occurrence {
    pub const ONCE: Occurrence = Occurrence {
        min: 1,
        initial: 1,
        max: Some(1),
    };

    pub fn allows(&self, count: u32) -> bool {
        self.max.map_or(true, |max| count < max)
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<TemplateNode>,
    ids: FxHashMap<String, TemplateId>,
}

impl Template {
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let def: TemplateDef =
            serde_json::from_str(json).map_err(|e| FlowError::parse("template", e))?;
        Self::from_def(def)
    }

    pub fn from_def(def: TemplateDef) -> Result<Self, FlowError> {
        let mut root = if def.element == Element::Form {
            def
        } else {
            let mut form = TemplateDef::new(Element::Form);
            form.children.push(def);
            form
        };

        let subform = root
            .children
            .iter_mut()
            .find(|c| c.element == Element::Subform)
            .ok_or(FlowError::MissingRootSubform)?;
        ensure_page_set(subform);

        let mut template = Template {
            nodes: Vec::new(),
            ids: FxHashMap::default(),
        };
        template.push(root, None);
        Ok(template)
    }

    fn push(&mut self, def: TemplateDef, parent: Option<TemplateId>) -> TemplateId {
        let id = TemplateId(self.nodes.len() as u32);
        if let Some(key) = &def.attrs.id {
            self.ids.entry(key.clone()).or_insert(id);
        }
        self.nodes.push(TemplateNode {
            element: def.element,
            attrs: def.attrs,
            parent,
            children: Vec::with_capacity(def.children.len()),
        });
        for child in def.children {
            let child_id = self.push(child, Some(id));
            self.nodes[id.index()].children.push(child_id);
        }
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The synthetic `form` node.
    pub fn root(&self) -> TemplateId {
        TemplateId(0)
    }

    pub fn root_subform(&self) -> TemplateId {
        self.first_child_of(self.root(), Element::Subform)
            .unwrap_or_else(|| self.root())
    }

    pub fn page_set_root(&self) -> Option<TemplateId> {
        self.first_child_of(self.root_subform(), Element::PageSet)
    }

    pub fn node(&self, id: TemplateId) -> &TemplateNode {
        &self.nodes[id.index()]
    }

    pub fn attrs(&self, id: TemplateId) -> &Attributes {
        &self.nodes[id.index()].attrs
    }

    pub fn element(&self, id: TemplateId) -> Element {
        self.nodes[id.index()].element
    }

    pub fn name(&self, id: TemplateId) -> &str {
        self.nodes[id.index()].attrs.name()
    }

    pub fn parent(&self, id: TemplateId) -> Option<TemplateId> {
        self.nodes[id.index()].parent
    }

    pub fn children(&self, id: TemplateId) -> &[TemplateId] {
        &self.nodes[id.index()].children
    }

    pub fn by_id(&self, key: &str) -> Option<TemplateId> {
        self.ids.get(key).copied()
    }

    pub fn first_child(&self, id: TemplateId) -> Option<TemplateId> {
        self.children(id).first().copied()
    }

    pub fn first_child_of(&self, id: TemplateId, element: Element) -> Option<TemplateId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.element(c) == element)
    }

    pub fn next_sibling(&self, id: TemplateId) -> Option<TemplateId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Next sibling with the same element kind.
    pub fn next_same_sibling(&self, id: TemplateId) -> Option<TemplateId> {
        let element = self.element(id);
        let mut cur = self.next_sibling(id);
        while let Some(c) = cur {
            if self.element(c) == element {
                return Some(c);
            }
            cur = self.next_sibling(c);
        }
        None
    }

    /// Pre-order walk of `id` and its descendants.
    pub fn descendants(&self, id: TemplateId) -> Vec<TemplateId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.children(cur).iter().rev().copied());
        }
        out
    }

    pub fn occurrence(&self, id: TemplateId) -> Occurrence {
        let Some(occur) = self.attrs(id).occur else {
            return Occurrence::ONCE;
        };
        let min = occur.min.unwrap_or(1).max(0) as u32;
        let max = match occur.max {
            Some(0) => {
                return Occurrence {
                    min: 0,
                    initial: 0,
                    max: Some(0),
                }
            }
            Some(m) if m < 0 => None,
            Some(m) => Some((m as u32).max(min)),
            None => Some(min.max(1)),
        };
        let mut initial = occur.initial.unwrap_or(1).max(0) as u32;
        initial = initial.max(min);
        if let Some(max) = max {
            initial = initial.min(max);
        }
        Occurrence { min, initial, max }
    }

    /// `occur.max` only when it was written down; `-1` means unbounded.
    pub fn explicit_max(&self, id: TemplateId) -> Option<i32> {
        self.attrs(id).occur.and_then(|o| o.max)
    }

    pub fn explicit_min(&self, id: TemplateId) -> Option<i32> {
        self.attrs(id).occur.and_then(|o| o.min)
    }

    pub fn relation(&self, id: TemplateId) -> Option<Relation> {
        self.attrs(id).relation
    }

    /// Physical page size of a page area, in points.
    pub fn page_size(&self, page_area: TemplateId) -> (f64, f64) {
        let Some(medium) = &self.attrs(page_area).medium else {
            return (612.0, 792.0);
        };
        let (short, long) = (medium.short.to_pt(), medium.long.to_pt());
        match medium.orientation {
            Orientation::Portrait => (short, long),
            Orientation::Landscape => (long, short),
        }
    }

    /// Resolve a reference written on a break, bookend or overflow.
    ///
    /// `#id` looks the node up by id. With `allow_som`, `som(path)` and bare
    /// paths are resolved relative to `scope`.
    pub fn resolve_reference(
        &self,
        scope: TemplateId,
        expr: &str,
        allow_som: bool,
    ) -> Option<TemplateId> {
        let expr = expr.trim();
        if let Some(key) = expr.strip_prefix('#') {
            return self.by_id(key);
        }
        if !allow_som || expr.is_empty() {
            return None;
        }
        let path = expr
            .strip_prefix("som(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(expr);
        self.resolve_som(scope, path)
    }

    /// Resolve a dotted path such as `pageSet.page2` or `$template.root.a[1]`.
    ///
    /// The first segment is searched among the children of `scope`, then
    /// among the ancestors of `scope` and their children.
    pub fn resolve_som(&self, scope: TemplateId, path: &str) -> Option<TemplateId> {
        let path = path.trim();
        let (mut cur, rest) = if path == "$template" {
            return Some(self.root());
        } else if let Some(rest) = path.strip_prefix("$template.") {
            (self.root(), rest)
        } else {
            (scope, path)
        };

        let mut segments = rest.split('.').map(parse_segment);
        let (first, index) = segments.next()?;
        cur = self.find_upward(cur, first, index)?;
        for (name, index) in segments {
            cur = self.nth_named_child(cur, name, index)?;
        }
        Some(cur)
    }

    fn find_upward(&self, scope: TemplateId, name: &str, index: usize) -> Option<TemplateId> {
        let mut level = Some(scope);
        while let Some(node) = level {
            if let Some(hit) = self.nth_named_child(node, name, index) {
                return Some(hit);
            }
            if self.name(node) == name && index == 0 {
                return Some(node);
            }
            level = self.parent(node);
        }
        None
    }

    fn nth_named_child(&self, id: TemplateId, name: &str, index: usize) -> Option<TemplateId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.name(c) == name)
            .nth(index)
    }
}

/// Split `name[3]` into `("name", 3)`. `[*]` selects the first match.
pub(crate) fn parse_segment(segment: &str) -> (&str, usize) {
    match segment.find('[') {
        Some(open) => {
            let name = &segment[..open];
            let inner = segment[open + 1..].trim_end_matches(']');
            (name, inner.trim().parse().unwrap_or(0))
        }
        None => (segment, 0),
    }
}

fn inches(v: f64) -> Option<Measurement> {
    Some(Measurement::new(v, Unit::In))
}

fn default_page_area() -> TemplateDef {
    let mut content = TemplateDef::new(Element::ContentArea);
    content.attrs.x = inches(0.25);
    content.attrs.y = inches(0.25);
    content.attrs.w = inches(8.0);
    content.attrs.h = inches(10.5);

    let mut page = TemplateDef::new(Element::PageArea);
    page.attrs.medium = Some(Medium {
        short: Measurement::new(8.5, Unit::In),
        long: Measurement::new(11.0, Unit::In),
        orientation: Orientation::Portrait,
    });
    page.children.push(content);
    page
}

fn has_page_area(def: &TemplateDef) -> bool {
    def.children
        .iter()
        .any(|c| c.element == Element::PageArea || (c.element == Element::PageSet && has_page_area(c)))
}

fn ensure_page_set(subform: &mut TemplateDef) {
    let page_set = match subform
        .children
        .iter()
        .position(|c| c.element == Element::PageSet)
    {
        Some(i) => &mut subform.children[i],
        None => {
            subform.children.insert(0, TemplateDef::new(Element::PageSet));
            &mut subform.children[0]
        }
    };
    if !has_page_area(page_set) {
        page_set.children.push(default_page_area());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Helpers ────────────────────────────────────────────────────

    fn template(json: &str) -> Template {
        Template::from_json(json).unwrap()
    }

    #[test]
    fn test_wraps_root_and_supplies_default_page() {
        let t = template(r#"{ "element": "subform", "name": "root" }"#);
        assert_eq!(t.element(t.root()), Element::Form);
        let root = t.root_subform();
        assert_eq!(t.name(root), "root");

        let page_set = t.page_set_root().unwrap();
        let page_area = t.first_child_of(page_set, Element::PageArea).unwrap();
        let content = t.first_child_of(page_area, Element::ContentArea).unwrap();
        assert_eq!(t.attrs(content).h.unwrap().to_pt(), 756.0);
        assert_eq!(t.page_size(page_area), (612.0, 792.0));
    }

    #[test]
    fn test_missing_root_subform() {
        let err = Template::from_json(r#"{ "element": "form" }"#).unwrap_err();
        assert!(matches!(err, FlowError::MissingRootSubform));
    }

    #[test]
    fn test_occurrence_normalisation() {
        let t = template(
            r#"{ "element": "subform", "children": [
                { "element": "subform", "name": "a" },
                { "element": "subform", "name": "b", "occur": { "min": 2, "max": 1 } },
                { "element": "subform", "name": "c", "occur": { "min": 0, "max": -1, "initial": 3 } },
                { "element": "subform", "name": "d", "occur": { "max": 0 } }
            ] }"#,
        );
        let root = t.root_subform();
        let by_name = |n: &str| t.resolve_som(root, n).unwrap();

        assert_eq!(t.occurrence(by_name("a")), Occurrence::ONCE);
        let b = t.occurrence(by_name("b"));
        assert_eq!((b.min, b.initial, b.max), (2, 2, Some(2)));
        let c = t.occurrence(by_name("c"));
        assert_eq!((c.min, c.initial, c.max), (0, 3, None));
        assert_eq!(t.occurrence(by_name("d")).max, Some(0));
    }

    #[test]
    fn test_resolve_references() {
        let t = template(
            r#"{ "element": "subform", "name": "root", "children": [
                { "element": "pageSet", "children": [
                    { "element": "pageArea", "name": "first", "id": "p1" },
                    { "element": "pageArea", "name": "next" }
                ] },
                { "element": "subform", "name": "body", "children": [
                    { "element": "subform", "name": "header" }
                ] }
            ] }"#,
        );
        let page_set = t.page_set_root().unwrap();
        let body = t.resolve_som(t.root_subform(), "body").unwrap();
        let header = t.resolve_som(body, "header").unwrap();

        assert_eq!(t.resolve_reference(page_set, "#p1", true).map(|n| t.name(n)), Some("first"));
        assert_eq!(t.resolve_reference(page_set, "next", true).map(|n| t.name(n)), Some("next"));
        assert_eq!(t.resolve_reference(header, "som(body.header)", true), Some(header));
        assert_eq!(t.resolve_reference(header, "next", false), None);
        assert_eq!(t.resolve_som(header, "$template.root.body"), Some(body));
        assert_eq!(t.resolve_reference(page_set, "nowhere", true), None);
    }
}
