use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spatial_kernel::{MAX_LEVEL_COUNT, WorldConfig};
use spatial_stream::StreamConfig;

/// Errors from loading or validating an engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub world: WorldConfig,
    pub stream: StreamConfig,
    /// Worker threads. `None` lets rayon pick one per core.
    pub threads: Option<usize>,
    /// Simulation time added at the end of every tick.
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            stream: StreamConfig::default(),
            threads: None,
            tick_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match ext.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&data)?,
            Some("json") => Self::from_json_str(&data)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };
        tracing::debug!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let levels = self.world.level_count;
        if levels == 0 || levels > MAX_LEVEL_COUNT {
            return Err(ConfigError::Invalid(format!(
                "world.level_count must be in 1..={MAX_LEVEL_COUNT}, got {levels}"
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if !(self.world.eviction_timeout_secs.is_finite() && self.world.eviction_timeout_secs >= 0.0) {
            return Err(ConfigError::Invalid(
                "world.eviction_timeout_secs must be a non-negative number".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be positive when set".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.world.level_count, 8);
        assert_eq!(config.world.eviction_timeout_secs, 20.0);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_yaml_str(
            "world:\n  level_count: 4\nstream:\n  level_tick_interval: 2\n  create_budget: 64\n",
        )
        .unwrap();
        assert_eq!(config.world.level_count, 4);
        assert_eq!(config.world.eviction_timeout_secs, 20.0);
        assert_eq!(config.stream.level_tick_interval, 2);
        assert_eq!(config.stream.create_budget, Some(64));
        assert_eq!(config.stream.unload_budget, None);
        assert_eq!(config.tick_interval_ms, 50);
    }

    #[test]
    fn json_parses() {
        let config =
            EngineConfig::from_json_str(r#"{"threads": 2, "tick_interval_ms": 16}"#).unwrap();
        assert_eq!(config.threads, Some(2));
        assert_eq!(config.tick_interval_ms, 16);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero_levels = "world:\n  level_count: 0\n";
        assert!(matches!(
            EngineConfig::from_yaml_str(zero_levels),
            Err(ConfigError::Invalid(_))
        ));
        let too_many = "world:\n  level_count: 17\n";
        assert!(matches!(
            EngineConfig::from_yaml_str(too_many),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"tick_interval_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn yaml_round_trips() {
        let config = EngineConfig {
            threads: Some(3),
            ..Default::default()
        };
        let text = config.to_yaml_string().unwrap();
        assert_eq!(EngineConfig::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = std::env::temp_dir().join(format!("spatial-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let yaml = dir.join("engine.yml");
        std::fs::write(&yaml, "tick_interval_ms: 20\n").unwrap();
        assert_eq!(EngineConfig::load(&yaml).unwrap().tick_interval_ms, 20);

        let json = dir.join("engine.json");
        std::fs::write(&json, r#"{"tick_interval_ms": 30}"#).unwrap();
        assert_eq!(EngineConfig::load(&json).unwrap().tick_interval_ms, 30);

        let toml = dir.join("engine.toml");
        std::fs::write(&toml, "").unwrap();
        assert!(matches!(
            EngineConfig::load(&toml),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
