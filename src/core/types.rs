//! Core data types for the locating engine

use crate::core::constants::{DEFAULT_MAX_CONNECTIONS, DEFAULT_REPLACEMENT_DISTANCE_M};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed anchor with surveyed coordinates (meters)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AnchorPosition {
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self { id: id.into(), x, y, z }
    }
}

/// Single distance report from the ranging source
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSample {
    /// Identifier of the anchor that produced the measurement
    pub device_id: String,
    /// Measured slant range (meters)
    pub distance: f64,
    /// Angle of arrival in the horizontal plane (degrees)
    pub azimuth: f64,
    /// Angle of arrival above the horizontal plane (degrees), when the radio reports it
    pub elevation: Option<f64>,
    /// Arrival time on a monotonic clock (milliseconds)
    pub timestamp_ms: u64,
}

impl RangeSample {
    pub fn new(device_id: impl Into<String>, distance: f64, timestamp_ms: u64) -> Self {
        Self {
            device_id: device_id.into(),
            distance,
            azimuth: 0.0,
            elevation: None,
            timestamp_ms,
        }
    }

    pub fn with_azimuth(mut self, azimuth: f64) -> Self {
        self.azimuth = azimuth;
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

/// Why the radio layer dropped an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Anchor moved beyond the replacement distance threshold
    DistanceThresholdExceeded,
    /// Link lost for any other reason
    SystemError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::DistanceThresholdExceeded => write!(f, "distance threshold exceeded"),
            DisconnectReason::SystemError => write!(f, "system error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectEvent {
    pub device_id: String,
    pub reason: DisconnectReason,
}

impl DisconnectEvent {
    pub fn new(device_id: impl Into<String>, reason: DisconnectReason) -> Self {
        Self { device_id: device_id.into(), reason }
    }
}

/// Connection-selection policy handed to the ranging source on subscribe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingPolicy {
    /// Maximum number of anchors ranged at the same time
    pub max_connections: u32,
    /// Anchors further than this are dropped in favour of closer ones (meters)
    pub replacement_distance_threshold: f64,
    /// Connect to the strongest advertisers first
    pub prefer_strongest_signal_first: bool,
}

impl Default for RangingPolicy {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            replacement_distance_threshold: DEFAULT_REPLACEMENT_DISTANCE_M,
            prefer_strongest_signal_first: true,
        }
    }
}

impl RangingPolicy {
    pub fn new(
        max_connections: u32,
        replacement_distance_threshold: f64,
        prefer_strongest_signal_first: bool,
    ) -> Self {
        Self {
            max_connections,
            replacement_distance_threshold,
            prefer_strongest_signal_first,
        }
    }

    /// Check the policy bounds, returning the offending parameter name and value
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if self.max_connections < 1 {
            return Err(("max_connections", self.max_connections.to_string()));
        }
        if !(self.replacement_distance_threshold > 0.0) {
            return Err((
                "replacement_distance_threshold",
                self.replacement_distance_threshold.to_string(),
            ));
        }
        Ok(())
    }
}

/// 2D fix produced by the solver; `z` is reserved and currently always `None`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolvedLocation {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl SolvedLocation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RangingPolicy::default();
        assert_eq!(policy.max_connections, 4);
        assert_eq!(policy.replacement_distance_threshold, 8.0);
        assert!(policy.prefer_strongest_signal_first);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validation() {
        let policy = RangingPolicy::new(0, 8.0, true);
        assert_eq!(policy.validate().unwrap_err().0, "max_connections");

        let policy = RangingPolicy::new(2, 0.0, false);
        assert_eq!(policy.validate().unwrap_err().0, "replacement_distance_threshold");

        let policy = RangingPolicy::new(2, f64::NAN, false);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_range_sample_builder() {
        let sample = RangeSample::new("A1", 2.5, 42)
            .with_azimuth(30.0)
            .with_elevation(-5.0);
        assert_eq!(sample.device_id, "A1");
        assert_eq!(sample.azimuth, 30.0);
        assert_eq!(sample.elevation, Some(-5.0));
        assert_eq!(sample.timestamp_ms, 42);
    }

    #[test]
    fn test_location_serializes_null_z() {
        let json = serde_json::to_string(&SolvedLocation::new(2.0, 1.0)).unwrap();
        assert_eq!(json, r#"{"x":2.0,"y":1.0,"z":null}"#);
    }
}
