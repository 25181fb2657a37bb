use crate::api::{RtlsRequest, SessionConfig};
use crate::core::{
    AnchorPosition, RangingPolicy, DEFAULT_MAX_RESTART_ATTEMPTS, DEFAULT_Z_CORRECTION,
    FRESHNESS_WINDOW_MS, SETTLE_DELAY_MS,
};
use crate::processing::FilterConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Locating engine configuration, loadable from a JSON file
///
/// Missing fields fall back to their defaults, so a file may carry only the
/// anchor layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtlsConfig {
    /// Connection-selection policy handed to the ranging source
    pub policy: RangingPolicy,
    /// Height of the tag's plane (meters)
    pub z_correction: f64,
    /// Output smoothing
    pub filter: FilterConfig,
    /// Maximum age of a distance used for solving (milliseconds)
    pub freshness_window_ms: u64,
    /// Radio settle delay between stop and subscribe (milliseconds)
    pub settle_delay_ms: u64,
    /// Internal resubscribe attempts before a fault is reported
    pub max_restart_attempts: u32,
    /// Optional tolerance for the degenerate-geometry check
    pub determinant_epsilon: Option<f64>,
    /// Surveyed anchor layout
    pub anchors: Vec<AnchorPosition>,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid parameter {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("anchor '{0}' is defined more than once")]
    DuplicateAnchor(String),
}

impl Default for RtlsConfig {
    fn default() -> Self {
        Self {
            policy: RangingPolicy::default(),
            z_correction: DEFAULT_Z_CORRECTION,
            filter: FilterConfig::default(),
            freshness_window_ms: FRESHNESS_WINDOW_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            determinant_epsilon: None,
            anchors: Vec::new(),
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl RtlsConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: RtlsConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            anchors = config.anchors.len(),
            "loaded rtls configuration"
        );
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy
            .validate()
            .map_err(|(parameter, value)| invalid(parameter, value, "out of range"))?;

        if !self.z_correction.is_finite() {
            return Err(invalid("z_correction", self.z_correction, "must be finite"));
        }
        if !(self.filter.alpha > 0.0 && self.filter.alpha <= 1.0) {
            return Err(invalid("filter.alpha", self.filter.alpha, "must be in (0, 1]"));
        }
        if self.filter.window_size == 0 {
            return Err(invalid("filter.window_size", 0, "must be at least 1"));
        }
        if self.freshness_window_ms == 0 {
            return Err(invalid("freshness_window_ms", 0, "must be positive"));
        }
        if let Some(epsilon) = self.determinant_epsilon {
            if !(epsilon >= 0.0) {
                return Err(invalid("determinant_epsilon", epsilon, "must be non-negative"));
            }
        }

        let mut seen = HashSet::new();
        for anchor in &self.anchors {
            if anchor.id.is_empty() {
                return Err(invalid("anchors.id", "", "must not be empty"));
            }
            if !(anchor.x.is_finite() && anchor.y.is_finite() && anchor.z.is_finite()) {
                return Err(invalid(
                    "anchors",
                    &anchor.id,
                    "coordinates must be finite",
                ));
            }
            if !seen.insert(anchor.id.as_str()) {
                return Err(ConfigError::DuplicateAnchor(anchor.id.clone()));
            }
        }
        Ok(())
    }

    /// Anchor layout keyed by device id
    pub fn anchor_map(&self) -> HashMap<String, AnchorPosition> {
        self.anchors
            .iter()
            .map(|anchor| (anchor.id.clone(), anchor.clone()))
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            max_restart_attempts: self.max_restart_attempts,
        }
    }

    /// Build the request for `RangingSession::start_rtls`
    pub fn rtls_request(&self) -> RtlsRequest {
        let mut request = RtlsRequest::new(self.anchors.iter().cloned())
            .with_z_correction(self.z_correction)
            .with_policy(self.policy.clone())
            .with_filter_config(self.filter.clone())
            .with_freshness_window(self.freshness_window_ms);
        if let Some(epsilon) = self.determinant_epsilon {
            request = request.with_determinant_epsilon(epsilon);
        }
        request
    }
}
