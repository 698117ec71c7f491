//! Engine configuration

use crate::eval_cache::DEFAULT_CAPACITY;
use serde::Deserialize;

/// Settings applied when an engine instance is built
///
/// Deserializable so hosts and the CLI can load it from a JSON file; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvalConfig {
    /// Enable the evaluation result cache
    pub cache_enabled: bool,
    /// Maximum cached evaluation results
    pub cache_capacity: usize,
    /// Minutes east of UTC for `today`/`now`; `None` means UTC
    pub timezone_offset: Option<i32>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: DEFAULT_CAPACITY,
            timezone_offset: None,
        }
    }
}

impl EvalConfig {
    /// Parse from JSON text
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
