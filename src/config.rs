//! Run configuration and log setup.

use std::sync::Once;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

static TRACING_INIT: Once = Once::new();

/// Knobs for a layout run. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    /// Upper bound on orchestrator steps (roughly one per page).
    pub max_steps: usize,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            log_filter: "warn".to_string(),
        }
    }
}

impl LayoutConfig {
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        serde_json::from_str(json).map_err(|e| FlowError::parse("config", e))
    }
}

/// Install the global subscriber once. `RUST_LOG` wins over `fallback`.
pub fn init_tracing(fallback: &str) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg = LayoutConfig::from_json(r#"{ "maxSteps": 12 }"#).unwrap();
        assert_eq!(cfg.max_steps, 12);
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn test_rejects_wrong_types() {
        let err = LayoutConfig::from_json(r#"{ "maxSteps": "many" }"#).unwrap_err();
        assert!(err.to_string().contains("config"));
    }
}
