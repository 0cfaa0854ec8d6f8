//! # Template Model
//!
//! The input representation of a form template: a tree of elements, each
//! with an element kind, a flat set of attributes and children. The schema
//! is JSON, produced by whatever converts authoring formats into the
//! engine's input. Attribute names follow the usual form-template
//! vocabulary (`layout`, `occur`, `bind`, `keep`, `breakBefore`, ...).
//!
//! Parsed definitions are flattened into an immutable [`Template`] arena;
//! the data instance lives in [`DataTree`] and the merged, bound result in
//! [`FormTree`].

pub mod data;
pub mod document;
pub mod form;
pub mod template;

pub use data::{DataId, DataKind, DataNode, DataTree};
pub use document::Document;
pub use form::{FormFlags, FormId, FormNode, FormTree};
pub use template::{Occurrence, Template, TemplateId, TemplateNode};

use serde::{Deserialize, Serialize};

use crate::geometry::{Insets, Measurement};

/// A template element as written in the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDef {
    pub element: Element,

    #[serde(flatten)]
    pub attrs: Attributes,

    #[serde(default)]
    pub children: Vec<TemplateDef>,
}

impl TemplateDef {
    pub fn new(element: Element) -> Self {
        Self {
            element,
            attrs: Attributes::default(),
            children: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Element {
    /// Root of the template and of the merged form. Never authored below
    /// the top level.
    Form,
    Subform,
    SubformSet,
    Area,
    Field,
    Draw,
    ExclGroup,
    PageSet,
    PageArea,
    ContentArea,
    Break,
    BreakBefore,
    BreakAfter,
    Bookend,
    Overflow,
}

impl Element {
    /// Containers are the elements that take part in layout; the rest are
    /// descriptors read by their container.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Element::Form
                | Element::Subform
                | Element::SubformSet
                | Element::Area
                | Element::Field
                | Element::Draw
                | Element::ExclGroup
                | Element::PageSet
                | Element::PageArea
                | Element::ContentArea
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Element::Form => "form",
            Element::Subform => "subform",
            Element::SubformSet => "subformSet",
            Element::Area => "area",
            Element::Field => "field",
            Element::Draw => "draw",
            Element::ExclGroup => "exclGroup",
            Element::PageSet => "pageSet",
            Element::PageArea => "pageArea",
            Element::ContentArea => "contentArea",
            Element::Break => "break",
            Element::BreakBefore => "breakBefore",
            Element::BreakAfter => "breakAfter",
            Element::Bookend => "bookend",
            Element::Overflow => "overflow",
        }
    }
}

/// Every attribute an element may carry. Which ones are meaningful depends
/// on the element; unset attributes fall back to per-element defaults in
/// the code that reads them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attributes {
    pub name: Option<String>,
    pub id: Option<String>,

    // ── Geometry ──
    pub layout: Option<LayoutStrategy>,
    pub x: Option<Measurement>,
    pub y: Option<Measurement>,
    pub w: Option<Measurement>,
    pub h: Option<Measurement>,
    pub min_w: Option<Measurement>,
    pub min_h: Option<Measurement>,
    pub max_w: Option<Measurement>,
    pub max_h: Option<Measurement>,
    pub anchor_type: Option<AnchorType>,
    pub rotate: Option<i32>,
    pub margin: Option<Margin>,
    pub col_span: Option<i32>,
    pub column_widths: Option<String>,
    pub h_align: Option<HAlign>,
    pub v_align: Option<VAlign>,
    pub presence: Option<Presence>,
    pub medium: Option<Medium>,

    // ── Merge ──
    pub occur: Option<Occur>,
    pub bind: Option<Bind>,
    pub value: Option<String>,
    pub relation: Option<Relation>,

    // ── Pagination ──
    pub keep: Option<Keep>,
    pub page_position: Option<PagePosition>,
    pub odd_or_even: Option<OddOrEven>,

    // ── Break, bookend and overflow descriptors ──
    pub target_type: Option<BreakTarget>,
    pub target: Option<String>,
    pub start_new: Option<bool>,
    pub leader: Option<String>,
    pub trailer: Option<String>,
    pub before: Option<BreakTarget>,
    pub after: Option<BreakTarget>,
    pub before_target: Option<String>,
    pub after_target: Option<String>,
    pub overflow_target: Option<String>,
    pub overflow_leader: Option<String>,
    pub overflow_trailer: Option<String>,
    pub bookend_leader: Option<String>,
    pub bookend_trailer: Option<String>,
}

impl Attributes {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn h_align(&self) -> HAlign {
        self.h_align.unwrap_or_default()
    }

    pub fn presence(&self) -> Presence {
        self.presence.unwrap_or_default()
    }

    /// Rotation normalised to 0, 90, 180 or 270.
    pub fn rotation(&self) -> i32 {
        let r = self.rotate.unwrap_or(0).rem_euclid(360);
        r / 90 * 90
    }

    pub fn col_span(&self) -> i32 {
        self.col_span.unwrap_or(1)
    }

    pub fn insets(&self) -> Insets {
        let Some(m) = &self.margin else {
            return Insets::default();
        };
        let pt = |v: &Option<Measurement>| v.map(|m| m.to_pt()).unwrap_or(0.0);
        Insets {
            left: pt(&m.left_inset),
            top: pt(&m.top_inset),
            right: pt(&m.right_inset),
            bottom: pt(&m.bottom_inset),
        }
    }

    pub fn bind_match(&self) -> BindMatch {
        self.bind
            .as_ref()
            .and_then(|b| b.match_mode)
            .unwrap_or_default()
    }

    pub fn bind_ref(&self) -> Option<&str> {
        self.bind.as_ref().and_then(|b| b.reference.as_deref())
    }

    pub fn keep_intact(&self) -> Option<KeepValue> {
        self.keep.as_ref().and_then(|k| k.intact)
    }

    pub fn keep_next(&self) -> KeepValue {
        self.keep.as_ref().and_then(|k| k.next).unwrap_or_default()
    }

    pub fn keep_previous(&self) -> KeepValue {
        self.keep.as_ref().and_then(|k| k.previous).unwrap_or_default()
    }

    pub fn page_position(&self) -> PagePosition {
        self.page_position.unwrap_or_default()
    }

    pub fn odd_or_even(&self) -> OddOrEven {
        self.odd_or_even.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutStrategy {
    #[serde(rename = "position")]
    Position,
    #[serde(rename = "tb")]
    Tb,
    #[serde(rename = "lr-tb")]
    LrTb,
    #[serde(rename = "rl-tb")]
    RlTb,
    #[serde(rename = "row")]
    Row,
    #[serde(rename = "rl-row")]
    RlRow,
    #[serde(rename = "table")]
    Table,
}

impl LayoutStrategy {
    pub fn is_flowed(self) -> bool {
        matches!(self, LayoutStrategy::Tb | LayoutStrategy::LrTb | LayoutStrategy::RlTb)
    }

    pub fn is_row(self) -> bool {
        matches!(self, LayoutStrategy::Row | LayoutStrategy::RlRow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnchorType {
    #[default]
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    MiddleCenter,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HAlign {
    #[default]
    Left,
    Center,
    Right,
    Justify,
    JustifyAll,
    Radix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Presence {
    #[default]
    Visible,
    Invisible,
    Hidden,
    Inactive,
}

impl Presence {
    /// Visible and invisible nodes take up room; hidden ones do not.
    pub fn requires_space(self) -> bool {
        matches!(self, Presence::Visible | Presence::Invisible)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Margin {
    pub top_inset: Option<Measurement>,
    pub bottom_inset: Option<Measurement>,
    pub left_inset: Option<Measurement>,
    pub right_inset: Option<Measurement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medium {
    pub short: Measurement,
    pub long: Measurement,
    #[serde(default)]
    pub orientation: Orientation,
}

/// Occurrence as authored. Missing values take defaults when normalised
/// into an [`Occurrence`]; `-1` for `max` means unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Occur {
    pub min: Option<i32>,
    pub initial: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindMatch {
    #[default]
    Once,
    None,
    Global,
    DataRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Bind {
    #[serde(rename = "match")]
    pub match_mode: Option<BindMatch>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeepValue {
    #[default]
    None,
    ContentArea,
    PageArea,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Keep {
    pub intact: Option<KeepValue>,
    pub next: Option<KeepValue>,
    pub previous: Option<KeepValue>,
}

/// Relation among a subform set's children, or the pagination mode of a
/// page set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    Ordered,
    Unordered,
    Choice,
    OrderedOccurrence,
    SimplexPaginated,
    DuplexPaginated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PagePosition {
    First,
    Last,
    Rest,
    Only,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OddOrEven {
    Odd,
    Even,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakTarget {
    #[default]
    Auto,
    ContentArea,
    PageArea,
    PageOdd,
    PageEven,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_definition() {
        let def: TemplateDef = serde_json::from_str(
            r##"{
                "element": "subform",
                "name": "root",
                "layout": "lr-tb",
                "w": "4in",
                "occur": { "min": 0, "max": -1 },
                "bind": { "match": "dataRef", "ref": "$.items[*]" },
                "children": [
                    { "element": "field", "name": "a", "h": 20 },
                    { "element": "breakBefore", "targetType": "pageArea", "target": "#p2" }
                ]
            }"##,
        )
        .unwrap();

        assert_eq!(def.element, Element::Subform);
        assert_eq!(def.attrs.layout, Some(LayoutStrategy::LrTb));
        assert_eq!(def.attrs.w.unwrap().to_pt(), 288.0);
        assert_eq!(def.attrs.bind_match(), BindMatch::DataRef);
        assert_eq!(def.attrs.bind_ref(), Some("$.items[*]"));
        assert_eq!(def.children.len(), 2);
        assert_eq!(def.children[1].attrs.target_type, Some(BreakTarget::PageArea));
    }

    #[test]
    fn test_rotation_normalised() {
        let attrs = Attributes {
            rotate: Some(-90),
            ..Default::default()
        };
        assert_eq!(attrs.rotation(), 270);
        let attrs = Attributes {
            rotate: Some(405),
            ..Default::default()
        };
        assert_eq!(attrs.rotation(), 0);
    }

    #[test]
    fn test_containers() {
        assert!(Element::Field.is_container());
        assert!(Element::PageArea.is_container());
        assert!(!Element::BreakBefore.is_container());
        assert!(!Element::Overflow.is_container());
    }
}
