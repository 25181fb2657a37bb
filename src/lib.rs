//! UWB Real-Time Locating Engine
//!
//! Turns a stream of distance reports from fixed UWB anchors into 2D tag
//! locations: closed-form trilateration for three anchors, least-squares
//! multilateration for more, with optional output smoothing and a ranging
//! session controller that serializes subscription restarts.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod hardware;
pub mod api;
pub mod utils;

// Re-export commonly used types
pub use core::{
    AnchorPosition, DisconnectEvent, DisconnectReason, RangeSample, RangingPolicy,
    SolvedLocation,
};
pub use algorithms::{PositionSolver, RangedAnchor, SolveFailure};
pub use processing::{AnchorDistanceCache, FilterConfig, FilterKind, SmoothingFilter};
pub use hardware::{
    MockRangingHandle, MockRangingSource, RangingEvent, RangingSource, SourceError,
    SourceResult,
};
pub use api::{
    RangingSession, RtlsError, RtlsPipeline, RtlsRequest, RtlsResult, SessionConfig,
    SessionEvent, SessionState,
};
pub use utils::{ConfigError, RtlsConfig};
