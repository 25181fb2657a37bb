//! Caller-facing ranging and RTLS API
//!
//! [`RangingSession`] owns the subscription lifecycle; `start_rtls` layers the
//! distance cache, solver and smoothing filter on top of it.

pub mod types;
pub mod session;
pub mod rtls;

pub use types::{
    CompletionCallback, DeviceRangingCallback, DisconnectCallback, EventCallback, RtlsError,
    RtlsResult, SessionConfig, SessionEvent, SessionState, UpdateCallback,
};
pub use session::RangingSession;
pub use rtls::{RtlsPipeline, RtlsRequest, SampleReport};
