//! Data lookups used by the binder: `once`, `global` and `dataRef`.

use crate::model::template::parse_segment;
use crate::model::{DataId, DataKind, DataTree};

/// `once`: walk from `scope` towards the data root. At each level take the
/// first unbound child with the right name and kind, skipping the level we
/// just came from.
pub fn find_once(data: &DataTree, name: &str, scope: DataId, kind: DataKind) -> Option<DataId> {
    let mut last = None;
    let mut level = Some(scope);
    while let Some(cur) = level {
        let hit = data.children_named(cur, name).find(|&child| {
            Some(child) != last && !data.is_bound(child) && data.node(child).kind == kind
        });
        if hit.is_some() {
            return hit;
        }
        if cur == data.root() {
            break;
        }
        last = Some(cur);
        level = data.parent(cur);
    }
    None
}

/// Unrestricted search used by `global` when the registry has no entry:
/// siblings by name first, then every nested group, then one level up.
pub fn scope_match_global(
    data: &DataTree,
    name: &str,
    scope: DataId,
    kind: DataKind,
    up_level: bool,
) -> Option<DataId> {
    let mut last = None;
    let mut level = Some(scope);
    while let Some(cur) = level {
        let hit = data.children_named(cur, name).find(|&child| {
            Some(child) != last && !data.is_bound(child) && data.node(child).kind == kind
        });
        if hit.is_some() {
            return hit;
        }
        for &group in data.children(cur) {
            if data.node(group).kind != DataKind::Group {
                continue;
            }
            if let Some(found) = scope_match_global(data, name, group, kind, false) {
                return Some(found);
            }
        }
        if !up_level || cur == data.root() {
            break;
        }
        last = Some(cur);
        level = data.parent(cur);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRef {
    One(DataId),
    /// A `[*]` path; candidates in data order.
    Many(Vec<DataId>),
}

#[derive(Clone, Copy)]
enum Index {
    Nth(usize),
    All,
}

/// Resolve a data reference such as `$.order.item[*]`, `$record.total` or
/// `address.city`.
///
/// `$` is the current scope, `$data` and `$record` the data root. Paths
/// without a `$` prefix also search the ancestors of `scope` for their
/// first segment. Missing nodes are created; the last one with `kind`,
/// intermediate ones as groups.
pub fn resolve_data_ref(
    data: &mut DataTree,
    expr: &str,
    scope: DataId,
    kind: DataKind,
) -> Option<DataRef> {
    let expr = expr.trim();
    let (base, rest, relative) = match expr {
        "" => return None,
        "$" => return Some(DataRef::One(scope)),
        "$data" | "$record" => return Some(DataRef::One(data.root())),
        _ => {
            if let Some(rest) = expr.strip_prefix("$.") {
                (scope, rest, false)
            } else if let Some(rest) = expr
                .strip_prefix("$data.")
                .or_else(|| expr.strip_prefix("$record."))
            {
                (data.root(), rest, false)
            } else {
                (scope, expr, true)
            }
        }
    };

    let segments: Vec<(&str, Index)> = rest
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.ends_with("[*]") {
                (&s[..s.len() - 3], Index::All)
            } else {
                let (name, n) = parse_segment(s);
                (name, Index::Nth(n))
            }
        })
        .collect();
    if segments.is_empty() {
        return Some(DataRef::One(base));
    }

    let mut many = false;
    let mut current = vec![base];
    let last_index = segments.len() - 1;
    for (i, &(name, index)) in segments.iter().enumerate() {
        let mut next = select(data, &current, name, index);
        if next.is_empty() && i == 0 && relative {
            let mut level = data.parent(base);
            while let Some(anc) = level {
                next = select(data, &[anc], name, index);
                if !next.is_empty() {
                    break;
                }
                level = data.parent(anc);
            }
        }
        if next.is_empty() {
            let parent = current[0];
            let child_kind = if i == last_index { kind } else { DataKind::Group };
            next = vec![data.create_child(parent, name, child_kind)];
            tracing::debug!(path = %data.path(next[0]), "created data node for reference");
        }
        many |= matches!(index, Index::All);
        current = next;
    }

    if many {
        Some(DataRef::Many(current))
    } else {
        current.first().copied().map(DataRef::One)
    }
}

fn select(data: &DataTree, parents: &[DataId], name: &str, index: Index) -> Vec<DataId> {
    let mut out = Vec::new();
    for &p in parents {
        match index {
            Index::All => out.extend(data.children_named(p, name)),
            Index::Nth(n) => out.extend(data.children_named(p, name).nth(n)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Helpers ────────────────────────────────────────────────────

    fn tree(json: &str) -> DataTree {
        DataTree::from_json(json).unwrap()
    }

    fn child(data: &DataTree, parent: DataId, name: &str, nth: usize) -> DataId {
        data.children_named(parent, name).nth(nth).unwrap()
    }

    #[test]
    fn test_once_walks_upward_and_skips_bound() {
        let mut data = tree(r#"{ "a": 1, "g": { "b": 2 }, "b": 3 }"#);
        let g = child(&data, data.root(), "g", 0);
        let inner_b = child(&data, g, "b", 0);
        let outer_b = child(&data, data.root(), "b", 0);

        assert_eq!(find_once(&data, "b", g, DataKind::Value), Some(inner_b));
        assert_eq!(find_once(&data, "a", g, DataKind::Value), Some(child(&data, data.root(), "a", 0)));
        assert_eq!(find_once(&data, "b", g, DataKind::Group), None);

        let form = slotmap::KeyData::from_ffi(1).into();
        data.node_mut(inner_b).bound.push(form);
        assert_eq!(find_once(&data, "b", g, DataKind::Value), Some(outer_b));
    }

    #[test]
    fn test_once_does_not_rematch_the_scope_it_left() {
        let data = tree(r#"{ "g": { "g": { "x": 1 } } }"#);
        let outer = child(&data, data.root(), "g", 0);
        let inner = child(&data, outer, "g", 0);
        // Each level up only offers the scope just left.
        assert_eq!(find_once(&data, "g", inner, DataKind::Group), None);

        let data = tree(r#"{ "g": [ { "g": { "x": 1 } }, { "y": 2 } ] }"#);
        let outer = child(&data, data.root(), "g", 0);
        let inner = child(&data, outer, "g", 0);
        let sibling = child(&data, data.root(), "g", 1);
        assert_eq!(find_once(&data, "g", inner, DataKind::Group), Some(sibling));
    }

    #[test]
    fn test_global_search_descends_into_groups() {
        let data = tree(r#"{ "head": { "meta": { "total": 9 } }, "body": {} }"#);
        let body = child(&data, data.root(), "body", 0);
        let found = scope_match_global(&data, "total", body, DataKind::Value, true).unwrap();
        assert_eq!(data.node(found).value.as_deref(), Some("9"));
        assert_eq!(scope_match_global(&data, "total", body, DataKind::Value, false), None);
    }

    #[test]
    fn test_data_ref_paths() {
        let mut data = tree(r#"{ "order": { "item": [ { "sku": "a" }, { "sku": "b" } ] } }"#);
        let order = child(&data, data.root(), "order", 0);
        let items = match resolve_data_ref(&mut data, "$.item[*]", order, DataKind::Group) {
            Some(DataRef::Many(v)) => v,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(items.len(), 2);

        let second = resolve_data_ref(&mut data, "$record.order.item[1].sku", order, DataKind::Value);
        let Some(DataRef::One(sku)) = second else {
            panic!("expected single node");
        };
        assert_eq!(data.node(sku).value.as_deref(), Some("b"));

        // Relative paths find `order` through the ancestors of the scope.
        let item0 = items[0];
        assert_eq!(
            resolve_data_ref(&mut data, "order", item0, DataKind::Group),
            Some(DataRef::One(order))
        );
    }

    #[test]
    fn test_data_ref_creates_missing_nodes() {
        let mut data = tree(r#"{}"#);
        let root = data.root();
        let Some(DataRef::One(city)) = resolve_data_ref(&mut data, "$.address.city", root, DataKind::Value) else {
            panic!("expected creation");
        };
        assert_eq!(data.path(city), "data/address/city");
        assert_eq!(data.node(city).kind, DataKind::Value);
        let address = data.parent(city).unwrap();
        assert_eq!(data.node(address).kind, DataKind::Group);
    }
}
