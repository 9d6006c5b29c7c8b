// Engine Configuration
//
// Tunable constants for rating arithmetic and match validation.
// Loaded from JSON by callers; the kernel never reads globals.

use serde::{Deserialize, Serialize};

/// Configuration shared by the validator, the Elo updater and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Elo K-factor applied to every pairwise outcome.
    pub k_factor: f64,

    /// Rating assigned to newly registered users and used on replay reset.
    pub initial_rating: f64,

    /// Maximum number of slots in a scored match.
    pub max_scored_slots: usize,

    /// Default number of matches returned by recent-match queries.
    pub recent_matches: usize,
}

impl EngineConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            k_factor: 32.0,
            initial_rating: 1500.0,
            max_scored_slots: 4,
            recent_matches: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "k_factor": 24.0 }"#).unwrap();

        assert_eq!(config.k_factor, 24.0);
        assert_eq!(config.initial_rating, 1500.0);
        assert_eq!(config.max_scored_slots, 4);
    }
}
