use serde::{Deserialize, Serialize};

use crate::DEFAULT_TOPIC_CAPACITY;

/// Collaboration service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationConfig {
    /// Events buffered per topic before slow subscribers skip ahead
    pub broadcast_capacity: usize,
    /// Used when a version is saved without a description
    pub default_version_description: String,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_TOPIC_CAPACITY,
            default_version_description: "Manual save".to_string(),
        }
    }
}
