//! Graph build settings.
//!
//! Settings are plain data so a front end can load them from whatever
//! configuration source it already uses.
//!
//! ```
//! use trellis_container::settings::GraphSettings;
//!
//! let settings = GraphSettings::default();
//! assert!(!settings.validate_full_graph);
//! assert_eq!(settings.max_suggestions, 3);
//! ```

use serde::{Deserialize, Serialize};

/// Knobs for [`GraphResolver`](crate::graph::GraphResolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Plan and validate every visible binding, not only the ones
    /// reachable from entry points.
    pub validate_full_graph: bool,

    /// Upper bound on "did you mean" suggestions per missing key.
    pub max_suggestions: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            validate_full_graph: false,
            max_suggestions: 3,
        }
    }
}

impl GraphSettings {
    pub fn validate_full_graph(mut self, enabled: bool) -> Self {
        self.validate_full_graph = enabled;
        self
    }

    pub fn max_suggestions(mut self, max: usize) -> Self {
        self.max_suggestions = max;
        self
    }
}
