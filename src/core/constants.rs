//! Timing windows and default tuning parameters

/// Maximum age of a distance sample before it is excluded from solving (milliseconds)
pub const FRESHNESS_WINDOW_MS: u64 = 1000;

/// Delay between releasing a subscription and issuing the next one (milliseconds)
pub const SETTLE_DELAY_MS: u64 = 1000;

/// Minimum number of usable anchors for a 2D fix
pub const MIN_ANCHORS: usize = 3;

/// Default reference elevation of the tag (meters)
pub const DEFAULT_Z_CORRECTION: f64 = 1.0;

/// Default smoothing factor of the low-pass filter
pub const DEFAULT_LOW_PASS_ALPHA: f64 = 0.2;

/// Default number of samples kept by the moving-average filter
pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 10;

/// Consecutive internal resubscribe attempts before a fault is reported
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Default maximum number of simultaneously connected anchors
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default distance above which an anchor is dropped for a closer one (meters)
pub const DEFAULT_REPLACEMENT_DISTANCE_M: f64 = 8.0;
