//! Common API types, errors and callback signatures

use crate::algorithms::SolveFailure;
use crate::core::{
    DisconnectEvent, RangeSample, RangingPolicy, DEFAULT_MAX_RESTART_ATTEMPTS,
    SETTLE_DELAY_MS,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for API operations
pub type RtlsResult<T> = Result<T, RtlsError>;

/// Errors surfaced to callers of the locating engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RtlsError {
    /// Fewer than three usable anchors after freshness and validity filtering
    #[error("position calculation failed: {available} usable anchors, {required} required")]
    InsufficientAnchors { available: usize, required: usize },
    /// Colinear or coincident anchors
    #[error("position calculation failed: degenerate anchor geometry (determinant {determinant})")]
    DegenerateGeometry { determinant: f64 },
    /// Releasing the ranging subscription faulted
    #[error("failed to stop ranging session: {reason}")]
    SessionStopFailure { reason: String },
    /// The ranging source failed after start and could not be recovered
    #[error("ranging subscription fault: {reason}")]
    SubscriptionFault { reason: String },
    /// A stop arrived while the start was waiting for the radio to settle
    #[error("start superseded by a stop request")]
    StartSuperseded,
    /// Invalid request parameter
    #[error("invalid configuration: {parameter} = {value}")]
    InvalidConfiguration { parameter: String, value: String },
}

impl From<SolveFailure> for RtlsError {
    fn from(failure: SolveFailure) -> Self {
        match failure {
            SolveFailure::InsufficientAnchors { available, required } => {
                RtlsError::InsufficientAnchors { available, required }
            }
            SolveFailure::DegenerateGeometry { determinant } => {
                RtlsError::DegenerateGeometry { determinant }
            }
        }
    }
}

/// Lifecycle of the ranging session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Status notifications for an injected observability sink
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    Subscribed { policy: RangingPolicy },
    Restarting { attempt: u32, reason: String },
    SubscriptionFault { reason: String },
    Stopped { success: bool },
}

/// Raw distance/angle report
pub type UpdateCallback = Arc<dyn Fn(RangeSample) + Send + Sync>;

/// Anchor dropped by the radio layer
pub type DisconnectCallback = Arc<dyn Fn(DisconnectEvent) + Send + Sync>;

/// Outcome of a stop request
pub type CompletionCallback = Box<dyn FnOnce(RtlsResult<()>) + Send>;

/// Unfiltered live distances keyed by anchor id
pub type DeviceRangingCallback = Arc<dyn Fn(HashMap<String, f64>) + Send + Sync>;

/// Observability sink
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Session timing and recovery parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Wait between releasing a subscription and opening the next
    pub settle_delay: Duration,
    /// Consecutive internal resubscribe attempts before a fault is reported
    pub max_restart_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
        }
    }
}
