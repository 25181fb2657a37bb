//! Per-session state: distance bookkeeping and output smoothing

pub mod cache;
pub mod filter;

pub use cache::{AnchorDistanceCache, AnchorDistanceEntry};
pub use filter::{
    create_filter, FilterConfig, FilterKind, LowPassFilter, MovingAverageFilter,
    PassthroughFilter, SmoothingFilter,
};
