//! RTLS composition: distance cache, position solver and smoothing filter
//! wired around a ranging session.

use crate::algorithms::{PositionSolver, RangedAnchor};
use crate::api::session::{Handlers, RangingSession, SessionGate};
use crate::api::types::{DeviceRangingCallback, RtlsError, RtlsResult};
use crate::core::{
    AnchorPosition, DisconnectEvent, RangeSample, RangingPolicy, SolvedLocation,
    DEFAULT_Z_CORRECTION, FRESHNESS_WINDOW_MS,
};
use crate::processing::{
    create_filter, AnchorDistanceCache, FilterConfig, FilterKind, SmoothingFilter,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Everything needed to start an RTLS session
#[derive(Debug, Clone, PartialEq)]
pub struct RtlsRequest {
    /// Surveyed anchors keyed by device id; fixed for the session
    pub anchors: HashMap<String, AnchorPosition>,
    /// Height of the tag's plane, subtracted from anchor z before projection
    pub z_correction: f64,
    pub policy: RangingPolicy,
    pub filter: FilterConfig,
    pub freshness_window_ms: u64,
    pub determinant_epsilon: Option<f64>,
}

impl RtlsRequest {
    pub fn new(anchors: impl IntoIterator<Item = AnchorPosition>) -> Self {
        Self {
            anchors: anchors.into_iter().map(|a| (a.id.clone(), a)).collect(),
            z_correction: DEFAULT_Z_CORRECTION,
            policy: RangingPolicy::default(),
            filter: FilterConfig::default(),
            freshness_window_ms: FRESHNESS_WINDOW_MS,
            determinant_epsilon: None,
        }
    }

    pub fn with_z_correction(mut self, z_correction: f64) -> Self {
        self.z_correction = z_correction;
        self
    }

    pub fn with_policy(mut self, policy: RangingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_filter(mut self, kind: FilterKind) -> Self {
        self.filter.kind = kind;
        self
    }

    pub fn with_filter_config(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_freshness_window(mut self, window_ms: u64) -> Self {
        self.freshness_window_ms = window_ms;
        self
    }

    pub fn with_determinant_epsilon(mut self, epsilon: f64) -> Self {
        self.determinant_epsilon = Some(epsilon);
        self
    }

    pub fn validate(&self) -> RtlsResult<()> {
        fn invalid(parameter: &str, value: impl ToString) -> RtlsError {
            RtlsError::InvalidConfiguration {
                parameter: parameter.to_string(),
                value: value.to_string(),
            }
        }

        self.policy
            .validate()
            .map_err(|(parameter, value)| invalid(parameter, value))?;

        if !self.z_correction.is_finite() {
            return Err(invalid("z_correction", self.z_correction));
        }
        if !(self.filter.alpha > 0.0 && self.filter.alpha <= 1.0) {
            return Err(invalid("filter.alpha", self.filter.alpha));
        }
        if let Some(epsilon) = self.determinant_epsilon {
            if !(epsilon >= 0.0) {
                return Err(invalid("determinant_epsilon", epsilon));
            }
        }
        for (id, anchor) in &self.anchors {
            if !(anchor.x.is_finite() && anchor.y.is_finite() && anchor.z.is_finite()) {
                return Err(invalid("anchors", id));
            }
        }
        Ok(())
    }
}

/// Result of feeding one range sample through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    /// Every cached distance, ignoring freshness
    pub live_distances: HashMap<String, f64>,
    /// Smoothed fix, or the reason no fix could be computed
    pub outcome: RtlsResult<SolvedLocation>,
}

/// Per-session locating state. Built fresh for every `start_rtls`.
pub struct RtlsPipeline {
    anchors: HashMap<String, AnchorPosition>,
    cache: AnchorDistanceCache,
    solver: PositionSolver,
    filter: Box<dyn SmoothingFilter>,
    z_correction: f64,
    freshness_window_ms: u64,
}

impl RtlsPipeline {
    pub fn new(request: &RtlsRequest) -> Self {
        let solver = match request.determinant_epsilon {
            Some(epsilon) => PositionSolver::with_determinant_epsilon(epsilon),
            None => PositionSolver::new(),
        };
        Self {
            anchors: request.anchors.clone(),
            cache: AnchorDistanceCache::new(),
            solver,
            filter: create_filter(&request.filter),
            z_correction: request.z_correction,
            freshness_window_ms: request.freshness_window_ms,
        }
    }

    /// Record the sample and attempt a fix from the fresh distances.
    ///
    /// The sample's own timestamp is the reference time for freshness. Cached ids
    /// without a surveyed position are reported in `live_distances` but never solved.
    pub fn process_sample(&mut self, sample: &RangeSample) -> SampleReport {
        self.cache
            .update(&sample.device_id, sample.distance, sample.timestamp_ms);

        let live_distances = self.cache.live_distances();
        let ranged: Vec<RangedAnchor> = self
            .cache
            .fresh_snapshot(sample.timestamp_ms, self.freshness_window_ms)
            .into_iter()
            .filter_map(|(id, distance)| {
                let anchor = self.anchors.get(&id)?;
                Some(RangedAnchor::new(id, anchor.x, anchor.y, anchor.z, distance))
            })
            .collect();

        let outcome = match self.solver.solve(&ranged, self.z_correction) {
            Ok(location) => Ok(self.filter.filter(location)),
            Err(failure) => {
                trace!(anchors = ranged.len(), error = %failure, "no fix for sample");
                Err(failure.into())
            }
        };

        SampleReport {
            live_distances,
            outcome,
        }
    }

    /// Forget a dropped anchor. Returns whether it was cached.
    pub fn handle_disconnect(&mut self, device_id: &str) -> bool {
        self.cache.remove(device_id).is_some()
    }

    pub fn cache(&self) -> &AnchorDistanceCache {
        &self.cache
    }

    pub fn filter_kind(&self) -> FilterKind {
        self.filter.kind()
    }
}

impl RangingSession {
    /// Start ranging and turn every distance report into a location fix.
    ///
    /// Fixes go to `on_result` after smoothing; per-sample failures go to `on_fail`
    /// and never stop the session. `on_device_ranging`, when given, receives the raw
    /// live distance map on every report. Any running session is replaced and its
    /// cache and filter are discarded.
    pub async fn start_rtls<R, F>(
        &self,
        request: RtlsRequest,
        on_result: R,
        on_fail: F,
        on_device_ranging: Option<DeviceRangingCallback>,
    ) -> RtlsResult<()>
    where
        R: Fn(SolvedLocation) + Send + Sync + 'static,
        F: Fn(RtlsError) + Send + Sync + 'static,
    {
        request.validate()?;

        let pipeline = Arc::new(Mutex::new(RtlsPipeline::new(&request)));
        debug!(
            anchors = request.anchors.len(),
            z_correction = request.z_correction,
            filter = ?request.filter.kind,
            "starting rtls session"
        );

        let update_pipeline = Arc::clone(&pipeline);
        let on_update = move |sample: RangeSample, gate: &SessionGate| {
            let report = update_pipeline.lock().process_sample(&sample);
            if let Some(on_device_ranging) = &on_device_ranging {
                on_device_ranging(report.live_distances);
            }
            // The telemetry callback may have stopped the session
            gate.run(|| match report.outcome {
                Ok(location) => on_result(location),
                Err(error) => on_fail(error),
            });
        };

        let on_disconnect = move |event: DisconnectEvent| {
            let removed = pipeline.lock().handle_disconnect(&event.device_id);
            debug!(device = %event.device_id, reason = %event.reason, removed, "anchor disconnected");
        };

        let handlers = Handlers {
            on_update: Arc::new(on_update),
            on_disconnect: Arc::new(on_disconnect),
        };
        self.start_with_handlers(request.policy, handlers).await
    }
}
