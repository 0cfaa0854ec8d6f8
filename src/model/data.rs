//! The data instance: a tree of groups and values.
//!
//! Built from JSON. Objects become groups, arrays become runs of
//! same-named siblings, scalars become values. Every node keeps the form
//! nodes bound to it as non-owning back-references.

use serde_json::Value;
use slotmap::{new_key_type, SlotMap};

use super::FormId;
use crate::error::FlowError;

new_key_type! { pub struct DataId; }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Group,
    Value,
}

#[derive(Debug, Clone)]
pub struct DataNode {
    pub name: String,
    pub kind: DataKind,
    pub value: Option<String>,
    pub parent: Option<DataId>,
    pub children: Vec<DataId>,
    pub bound: Vec<FormId>,
}

impl DataNode {
    pub fn is_bound(&self) -> bool {
        !self.bound.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DataTree {
    nodes: SlotMap<DataId, DataNode>,
    root: DataId,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(DataNode {
            name: "data".to_string(),
            kind: DataKind::Group,
            value: None,
            parent: None,
            children: Vec::new(),
            bound: Vec::new(),
        });
        Self { nodes, root }
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let value: Value = serde_json::from_str(json).map_err(|e| FlowError::parse("data", e))?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        let mut tree = Self::new();
        let root = tree.root;
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    tree.insert_value(root, key, v);
                }
            }
            Value::Null => {}
            other => {
                tree.nodes[root].value = Some(scalar_text(other));
            }
        }
        tree
    }

    fn insert_value(&mut self, parent: DataId, name: &str, value: &Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.insert_value(parent, name, item);
                }
            }
            Value::Object(map) => {
                let group = self.create_child(parent, name, DataKind::Group);
                for (key, v) in map {
                    self.insert_value(group, key, v);
                }
            }
            scalar => {
                let node = self.create_child(parent, name, DataKind::Value);
                self.nodes[node].value = Some(scalar_text(scalar));
            }
        }
    }

    pub fn root(&self) -> DataId {
        self.root
    }

    pub fn get(&self, id: DataId) -> Option<&DataNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: DataId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: DataId) -> &DataNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: DataId) -> &mut DataNode {
        &mut self.nodes[id]
    }

    pub fn parent(&self, id: DataId) -> Option<DataId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: DataId) -> &[DataId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn children_named<'a>(
        &'a self,
        id: DataId,
        name: &'a str,
    ) -> impl Iterator<Item = DataId> + 'a {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.nodes[c].name == name)
    }

    pub fn create_child(&mut self, parent: DataId, name: &str, kind: DataKind) -> DataId {
        let id = self.nodes.insert(DataNode {
            name: name.to_string(),
            kind,
            value: None,
            parent: Some(parent),
            children: Vec::new(),
            bound: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn is_bound(&self, id: DataId) -> bool {
        self.nodes.get(id).is_some_and(DataNode::is_bound)
    }

    /// Total number of bindings held by all nodes.
    pub fn binding_count(&self) -> usize {
        self.nodes.values().map(|n| n.bound.len()).sum()
    }

    pub fn clear_bindings(&mut self) {
        for node in self.nodes.values_mut() {
            node.bound.clear();
        }
    }

    /// Slash separated path from the root, for logs.
    pub fn path(&self, id: DataId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur.and_then(|c| self.nodes.get(c)) {
            parts.push(node.name.as_str());
            cur = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_arrays_and_scalars() {
        let tree = DataTree::from_json(
            r#"{ "order": { "id": 7, "item": [ { "sku": "a" }, { "sku": "b" } ], "note": null } }"#,
        )
        .unwrap();

        let order = tree.children_named(tree.root(), "order").next().unwrap();
        assert_eq!(tree.node(order).kind, DataKind::Group);

        let items: Vec<_> = tree.children_named(order, "item").collect();
        assert_eq!(items.len(), 2);
        let sku = tree.children_named(items[1], "sku").next().unwrap();
        assert_eq!(tree.node(sku).value.as_deref(), Some("b"));

        let id = tree.children_named(order, "id").next().unwrap();
        assert_eq!(tree.node(id).kind, DataKind::Value);
        assert_eq!(tree.node(id).value.as_deref(), Some("7"));

        let note = tree.children_named(order, "note").next().unwrap();
        assert_eq!(tree.node(note).value.as_deref(), Some(""));
        assert_eq!(tree.path(sku), "data/order/item/sku");
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        assert!(matches!(
            DataTree::from_json("{ \"a\": "),
            Err(FlowError::Parse { what: "data", .. })
        ));
    }
}
