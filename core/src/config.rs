//! Engine configuration
//!
//! Plain serde structs with defaults, loadable from JSON. Runtime-only
//! inputs such as image handles for tracking are passed to the session
//! store directly instead.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on concurrent grab pointers
pub const MAX_GRAB_POINTERS: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grab: GrabConfig,
    pub tracking: TrackingConfig,
    pub anchors: AnchorConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grab.validate()
    }
}

/// Grab manipulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// Pointers allowed to hold the node at once (1 or 2)
    pub max_grabbers: usize,

    /// Two-pointer spans shorter than this freeze scale and rotation
    pub degenerate_distance: f32,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            max_grabbers: MAX_GRAB_POINTERS,
            degenerate_distance: 1e-6,
        }
    }
}

impl GrabConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_grabbers == 0 {
            return Err(ConfigError::Invalid("grab.max_grabbers must be at least 1".into()));
        }
        if self.degenerate_distance.is_nan() || self.degenerate_distance < 0.0 {
            return Err(ConfigError::Invalid(
                "grab.degenerate_distance must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Pointer limit after applying the hard cap
    pub fn effective_max_grabbers(&self) -> usize {
        self.max_grabbers.min(MAX_GRAB_POINTERS)
    }
}

/// Which detectors feed the tracked collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub track_planes: bool,
    pub track_meshes: bool,
    pub track_images: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            track_planes: true,
            track_meshes: true,
            track_images: true,
        }
    }
}

/// Anchor persistence settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Prepended to every persistence key
    pub key_prefix: String,
}

impl AnchorConfig {
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.grab.max_grabbers, 2);
        assert!(config.tracking.track_planes);
        assert_eq!(config.anchors.storage_key("table"), "table");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "grab": { "max_grabbers": 1 }, "anchors": { "key_prefix": "demo/" } }"#,
        )
        .unwrap();

        assert_eq!(config.grab.max_grabbers, 1);
        assert_eq!(config.grab.degenerate_distance, 1e-6);
        assert!(config.tracking.track_meshes);
        assert_eq!(config.anchors.storage_key("table"), "demo/table");
    }

    #[test]
    fn test_zero_grabbers_rejected() {
        let result = EngineConfig::from_json_str(r#"{ "grab": { "max_grabbers": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_hard_cap_applies() {
        let config = GrabConfig {
            max_grabbers: 5,
            ..GrabConfig::default()
        };
        assert_eq!(config.effective_max_grabbers(), 2);
    }
}
