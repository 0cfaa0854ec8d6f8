//! Error types for the merge and layout engine.
//!
//! [`FlowError`] covers the failures that stop a run: unreadable input and
//! templates that cannot produce a single page. Everything else is a
//! [`Defect`]: recorded, logged, and recovered from locally so layout always
//! produces structurally valid pages.

use thiserror::Error;

/// The unified error type returned by the public API.
#[derive(Debug, Error)]
pub enum FlowError {
    /// JSON input failed to parse as a template, data instance or config.
    #[error("failed to parse {what}: {source}{hint}")]
    Parse {
        what: &'static str,
        source: serde_json::Error,
        hint: String,
    },
    #[error("invalid measurement `{0}`")]
    InvalidMeasurement(String),
    /// The template has no subform below its root.
    #[error("template has no root subform")]
    MissingRootSubform,
    /// No page area in the page set declares a content area.
    #[error("page set has no page area with a content area")]
    NoContentArea,
    /// The first page could not be created.
    #[error("unable to create the first page")]
    NoFirstPage,
    #[error("layout did not finish within {0} steps")]
    StepLimit(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Wrap a `serde_json` error with a hint based on its category.
    pub fn parse(what: &'static str, source: serde_json::Error) -> Self {
        let hint = match source.classify() {
            serde_json::error::Category::Syntax => {
                "\n  hint: check for trailing commas, missing quotes, or unescaped characters"
            }
            serde_json::error::Category::Data => {
                "\n  hint: the JSON is valid but does not match the expected schema; check element names and attribute types"
            }
            serde_json::error::Category::Eof => "\n  hint: unexpected end of input, is the JSON truncated?",
            serde_json::error::Category::Io => "",
        };
        FlowError::Parse {
            what,
            source,
            hint: hint.to_string(),
        }
    }
}

/// A recoverable problem found while merging or laying out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Defect {
    /// No data node matched under the active binding mode.
    #[error("`{name}` has no matching data")]
    UnboundElement { name: String },
    /// A break or overflow target expression resolved to nothing.
    #[error("break target `{target}` does not resolve")]
    BrokenBreakOrOverflowTarget { target: String },
    /// A container that cannot split was deferred to the next page.
    #[error("`{name}` cannot split and was moved to the next page")]
    NonSplittableOverflow { name: String },
    /// A leader, trailer or subform reached its maximum occurrence.
    #[error("`{name}` reached its maximum occurrence")]
    OccurrenceExhausted { name: String },
    /// A content area has no usable height.
    #[error("content area `{name}` has no usable height")]
    InfeasibleContentArea { name: String },
}

/// Defects collected during one merge/layout run.
#[derive(Debug, Default)]
pub struct DefectLog {
    entries: Vec<Defect>,
}

impl DefectLog {
    /// Record a defect. A defect already in the log is not repeated.
    pub fn record(&mut self, defect: Defect) {
        if self.entries.contains(&defect) {
            return;
        }
        match &defect {
            Defect::UnboundElement { .. } => tracing::debug!(%defect, "merge"),
            _ => tracing::warn!(%defect, "layout"),
        }
        self.entries.push(defect);
    }

    pub fn entries(&self) -> &[Defect] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_hint() {
        let err = serde_json::from_str::<serde_json::Value>("{\"a\": 1,}").unwrap_err();
        let msg = FlowError::parse("template", err).to_string();
        assert!(msg.starts_with("failed to parse template"));
        assert!(msg.contains("trailing commas"));
    }

    #[test]
    fn test_defect_log_keeps_order() {
        let mut log = DefectLog::default();
        log.record(Defect::UnboundElement { name: "a".into() });
        log.record(Defect::OccurrenceExhausted { name: "hdr".into() });
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[1].to_string(), "`hdr` reached its maximum occurrence");
    }

    #[test]
    fn test_repeated_defect_is_kept_once() {
        let mut log = DefectLog::default();
        for _ in 0..3 {
            log.record(Defect::UnboundElement { name: "T".into() });
        }
        log.record(Defect::UnboundElement { name: "U".into() });
        assert_eq!(
            log.entries(),
            &[
                Defect::UnboundElement { name: "T".into() },
                Defect::UnboundElement { name: "U".into() },
            ]
        );
    }
}
