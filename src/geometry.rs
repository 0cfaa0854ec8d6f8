//! # Geometry and Measurements
//!
//! Physical units, points, sizes and rectangles. Everything inside the
//! engine is expressed in points (1/72 inch) as `f64`; [`Measurement`] is
//! only the authoring form that templates carry ("0.25in", "10mm", 12).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Comparisons closer than this are treated as equal by the layout code.
pub const LAYOUT_PRECISION: f64 = 0.0005;

/// Stand-in for "no height limit".
pub const UNBOUNDED: f64 = f64::INFINITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Unit {
    #[default]
    Pt,
    In,
    Cm,
    Mm,
    /// Millipoints.
    Mp,
    Percent,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::Pt => "pt",
            Unit::In => "in",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
            Unit::Mp => "mp",
            Unit::Percent => "%",
        }
    }
}

/// A value with a physical unit, as written in a template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MeasurementRepr", into = "String")]
pub struct Measurement {
    pub value: f64,
    pub unit: Unit,
}

impl Measurement {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn pt(value: f64) -> Self {
        Self::new(value, Unit::Pt)
    }

    /// Convert to points. Percentages have no absolute size and yield 0.
    pub fn to_pt(&self) -> f64 {
        match self.unit {
            Unit::Pt => self.value,
            Unit::In => self.value * 72.0,
            Unit::Cm => self.value * 72.0 / 2.54,
            Unit::Mm => self.value * 72.0 / 25.4,
            Unit::Mp => self.value / 1000.0,
            Unit::Percent => 0.0,
        }
    }

    /// Convert to points, resolving percentages against `reference`.
    pub fn resolve(&self, reference: f64) -> f64 {
        match self.unit {
            Unit::Percent => reference * self.value / 100.0,
            _ => self.to_pt(),
        }
    }
}

impl FromStr for Measurement {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
            .unwrap_or(text.len());
        let (number, suffix) = text.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| FlowError::InvalidMeasurement(s.to_string()))?;
        let unit = match suffix.trim() {
            "" | "pt" => Unit::Pt,
            "in" => Unit::In,
            "cm" => Unit::Cm,
            "mm" => Unit::Mm,
            "mp" => Unit::Mp,
            "%" => Unit::Percent,
            _ => return Err(FlowError::InvalidMeasurement(s.to_string())),
        };
        Ok(Self { value, unit })
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MeasurementRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<MeasurementRepr> for Measurement {
    type Error = FlowError;

    fn try_from(repr: MeasurementRepr) -> Result<Self, Self::Error> {
        match repr {
            MeasurementRepr::Number(v) => Ok(Measurement::pt(v)),
            MeasurementRepr::Text(s) => s.parse(),
        }
    }
}

impl From<Measurement> for String {
    fn from(m: Measurement) -> Self {
        m.to_string()
    }
}

/// Parse a space separated list of measurements, skipping malformed entries.
pub fn parse_measurement_list(list: &str) -> Vec<Measurement> {
    list.split_whitespace()
        .filter_map(|token| match token.parse::<Measurement>() {
            Ok(m) => Some(m),
            Err(_) => {
                tracing::debug!(token, "skipping malformed measurement");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_parts(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x - LAYOUT_PRECISION
            && other.y >= self.y - LAYOUT_PRECISION
            && other.right() <= self.right() + LAYOUT_PRECISION
            && other.bottom() <= self.bottom() + LAYOUT_PRECISION
    }
}

/// Margin insets of a container, in points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Insets {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Insets {
    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_units() {
        let m: Measurement = "0.25in".parse().unwrap();
        assert_eq!(m.unit, Unit::In);
        assert!(approx(m.to_pt(), 18.0));

        assert!(approx("25.4mm".parse::<Measurement>().unwrap().to_pt(), 72.0));
        assert!(approx("2.54cm".parse::<Measurement>().unwrap().to_pt(), 72.0));
        assert!(approx("12".parse::<Measurement>().unwrap().to_pt(), 12.0));
        assert!(approx("1500mp".parse::<Measurement>().unwrap().to_pt(), 1.5));
    }

    #[test]
    fn test_percent_resolves_against_reference() {
        let m: Measurement = "50%".parse().unwrap();
        assert_eq!(m.to_pt(), 0.0);
        assert!(approx(m.resolve(200.0), 100.0));
    }

    #[test]
    fn test_rejects_unknown_unit() {
        assert!("3furlongs".parse::<Measurement>().is_err());
        assert!("in".parse::<Measurement>().is_err());
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let a: Measurement = serde_json::from_str("36").unwrap();
        let b: Measurement = serde_json::from_str("\"0.5in\"").unwrap();
        assert!(approx(a.to_pt(), b.to_pt()));
    }

    #[test]
    fn test_measurement_list_skips_garbage() {
        let list = parse_measurement_list("1in  2in bogus 36pt");
        let widths: Vec<f64> = list.iter().map(|m| m.to_pt()).collect();
        assert_eq!(widths, vec![72.0, 144.0, 36.0]);
    }
}
