//! Output smoothing for solved locations
//!
//! Each ranging session owns exactly one filter instance. Filters only touch the
//! planar coordinates; `z` is passed through untouched.

use crate::core::{SolvedLocation, DEFAULT_LOW_PASS_ALPHA, DEFAULT_MOVING_AVERAGE_WINDOW};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Stateful location smoother, called once per successful solve
pub trait SmoothingFilter: Send {
    fn filter(&mut self, location: SolvedLocation) -> SolvedLocation;

    fn kind(&self) -> FilterKind;
}

/// Available smoothing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    None,
    LowPass,
    MovingAverage,
}

/// Filter selection and its tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub kind: FilterKind,
    /// Low-pass smoothing factor (0-1, higher follows new fixes faster)
    pub alpha: f64,
    /// Moving-average window length in samples
    pub window_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::None,
            alpha: DEFAULT_LOW_PASS_ALPHA,
            window_size: DEFAULT_MOVING_AVERAGE_WINDOW,
        }
    }
}

impl FilterConfig {
    pub fn of_kind(kind: FilterKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Build a fresh filter instance for a new session
pub fn create_filter(config: &FilterConfig) -> Box<dyn SmoothingFilter> {
    match config.kind {
        FilterKind::None => Box::new(PassthroughFilter),
        FilterKind::LowPass => Box::new(LowPassFilter::new(config.alpha)),
        FilterKind::MovingAverage => Box::new(MovingAverageFilter::new(config.window_size)),
    }
}

/// Returns every location unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFilter;

impl SmoothingFilter for PassthroughFilter {
    fn filter(&mut self, location: SolvedLocation) -> SolvedLocation {
        location
    }

    fn kind(&self) -> FilterKind {
        FilterKind::None
    }
}

/// Exponential smoothing, seeded with the first fix
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f64,
    last: Option<(f64, f64)>,
}

impl LowPassFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, last: None }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_PASS_ALPHA)
    }
}

impl SmoothingFilter for LowPassFilter {
    fn filter(&mut self, location: SolvedLocation) -> SolvedLocation {
        let (x, y) = match self.last {
            Some((last_x, last_y)) => (
                last_x + self.alpha * (location.x - last_x),
                last_y + self.alpha * (location.y - last_y),
            ),
            None => (location.x, location.y),
        };
        self.last = Some((x, y));

        SolvedLocation { x, y, z: location.z }
    }

    fn kind(&self) -> FilterKind {
        FilterKind::LowPass
    }
}

/// Arithmetic mean over the most recent `window_size` fixes
#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    window_size: usize,
    x_window: VecDeque<f64>,
    y_window: VecDeque<f64>,
}

impl MovingAverageFilter {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            x_window: VecDeque::with_capacity(window_size + 1),
            y_window: VecDeque::with_capacity(window_size + 1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of fixes currently held
    pub fn len(&self) -> usize {
        self.x_window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_window.is_empty()
    }

    fn mean(window: &VecDeque<f64>) -> f64 {
        window.iter().sum::<f64>() / window.len() as f64
    }
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MOVING_AVERAGE_WINDOW)
    }
}

impl SmoothingFilter for MovingAverageFilter {
    fn filter(&mut self, location: SolvedLocation) -> SolvedLocation {
        self.x_window.push_back(location.x);
        self.y_window.push_back(location.y);

        while self.x_window.len() > self.window_size {
            self.x_window.pop_front();
        }
        while self.y_window.len() > self.window_size {
            self.y_window.pop_front();
        }

        SolvedLocation {
            x: Self::mean(&self.x_window),
            y: Self::mean(&self.y_window),
            z: location.z,
        }
    }

    fn kind(&self) -> FilterKind {
        FilterKind::MovingAverage
    }
}
