//! Provider configuration
//!
//! Settings are plain data with serde support so a host can keep them in a JSON
//! file next to its other test settings. Durations are written as fractional
//! seconds. Every field has a default, so `{}` is a valid configuration.

use crate::data::DrawBudget;
use crate::session::PathLimits;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(String),
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

/// Settings of the symbolic provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Wall-clock budget for one path.
    #[serde(with = "seconds")]
    pub per_path_timeout: Duration,

    /// Budget for a single satisfiability check. Defaults to half the path
    /// budget.
    #[serde(with = "optional_seconds")]
    pub model_check_timeout: Option<Duration>,

    /// Nesting depth available to recursive generators.
    pub max_expansion_depth: usize,

    /// Largest collection a single `draw_vec` may produce.
    pub max_collection_size: usize,

    /// Decisions allowed on one path before it is cut off.
    pub max_path_depth: usize,

    /// Abandoned attempts after which a node is no longer selected.
    pub max_path_retries: u32,

    /// Concrete replays of a suspected failure.
    pub concrete_replays: usize,

    /// Also replay passing paths concretely.
    pub validate_passes: bool,

    /// Emit one observation per iteration.
    pub report_observations: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            per_path_timeout: Duration::from_millis(2500),
            model_check_timeout: None,
            max_expansion_depth: 8,
            max_collection_size: 64,
            max_path_depth: 1000,
            max_path_retries: 3,
            concrete_replays: 2,
            validate_passes: false,
            report_observations: false,
        }
    }
}

impl ProviderConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_path_timeout.is_zero() {
            return Err(ConfigError::Invalid("per_path_timeout must be positive".into()));
        }
        if let Some(check) = self.model_check_timeout {
            if check.is_zero() || check > self.per_path_timeout {
                return Err(ConfigError::Invalid(
                    "model_check_timeout must be positive and at most per_path_timeout".into(),
                ));
            }
        }
        if self.max_path_depth == 0 {
            return Err(ConfigError::Invalid("max_path_depth must be positive".into()));
        }
        if self.max_path_retries == 0 {
            return Err(ConfigError::Invalid("max_path_retries must be positive".into()));
        }
        if self.concrete_replays == 0 {
            return Err(ConfigError::Invalid("concrete_replays must be at least 1".into()));
        }
        Ok(())
    }

    pub fn model_check_timeout(&self) -> Duration {
        self.model_check_timeout.unwrap_or(self.per_path_timeout / 2)
    }

    pub fn draw_budget(&self) -> DrawBudget {
        DrawBudget::new(self.max_expansion_depth, self.max_collection_size)
    }

    pub(crate) fn path_limits(&self) -> PathLimits {
        PathLimits {
            per_path_timeout: self.per_path_timeout,
            model_check_timeout: self.model_check_timeout(),
            max_path_depth: self.max_path_depth,
        }
    }
}

mod seconds {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod optional_seconds {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = ProviderConfig::from_json("{}").unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.model_check_timeout(), Duration::from_millis(1250));
    }

    #[test]
    fn test_durations_are_seconds() {
        let config = ProviderConfig::from_json(r#"{"per_path_timeout": 0.5, "model_check_timeout": 0.1}"#).unwrap();
        assert_eq!(config.per_path_timeout, Duration::from_millis(500));
        assert_eq!(config.model_check_timeout(), Duration::from_millis(100));
        let reparsed = ProviderConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            ProviderConfig::from_json(r#"{"per_path_timeout": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ProviderConfig::from_json(r#"{"per_path_timeout": 1.0, "model_check_timeout": 2.0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ProviderConfig::from_json(r#"{"per_path_timeout": -1.0}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ProviderConfig::from_json(r#"{"unknown_setting": 1}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_path_retries": 5, "validate_passes": true}}"#).unwrap();
        let config = ProviderConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_path_retries, 5);
        assert!(config.validate_passes);
        assert_eq!(config.max_collection_size, 64);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProviderConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
