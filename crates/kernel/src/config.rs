use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on configured levels. Level 16 cells already span 65536
/// level-0 cells per axis.
pub const MAX_LEVEL_COUNT: u8 = 16;

/// Shape of a world's hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Number of levels, finest (0) to coarsest (`level_count - 1`).
    pub level_count: u8,
    /// Simulation seconds a leaf may go untouched before it is evicted.
    pub eviction_timeout_secs: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            level_count: 8,
            eviction_timeout_secs: 20.0,
        }
    }
}

impl WorldConfig {
    pub fn with_levels(level_count: u8) -> Self {
        Self {
            level_count,
            ..Default::default()
        }
    }

    pub fn eviction_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.eviction_timeout_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Index of the coarsest level.
    pub fn coarsest_level(&self) -> u8 {
        self.level_count.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_timeout_saturates() {
        let timeout = |secs| WorldConfig {
            eviction_timeout_secs: secs,
            ..Default::default()
        };
        assert_eq!(WorldConfig::default().eviction_timeout(), Duration::from_secs(20));
        assert_eq!(timeout(-5.0).eviction_timeout(), Duration::ZERO);
        assert_eq!(timeout(f64::INFINITY).eviction_timeout(), Duration::MAX);
        assert_eq!(timeout(1e30).eviction_timeout(), Duration::MAX);
    }

    #[test]
    fn coarsest_level_of_empty_config() {
        assert_eq!(WorldConfig::with_levels(0).coarsest_level(), 0);
        assert_eq!(WorldConfig::with_levels(3).coarsest_level(), 2);
    }
}
