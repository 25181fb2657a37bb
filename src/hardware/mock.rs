//! Mock ranging source for testing and development

use crate::core::{DisconnectEvent, DisconnectReason, RangeSample, RangingPolicy};
use crate::hardware::{
    EventReceiver, EventSender, RangingEvent, RangingSource, SourceError, SourceResult,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

struct MockState {
    sender: Option<EventSender>,
    policy: Option<RangingPolicy>,
    /// Connected anchors in connection order
    connected: Vec<String>,
    subscribe_count: u32,
    unsubscribe_count: u32,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    origin: Instant,
}

impl MockState {
    fn send(&mut self, event: RangingEvent) -> bool {
        match &self.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

/// In-process ranging source that applies the connection-selection policy
///
/// Tests and the demo binary feed it through a [`MockRangingHandle`].
pub struct MockRangingSource {
    state: Arc<Mutex<MockState>>,
}

/// Cloneable control handle for a [`MockRangingSource`]
#[derive(Clone)]
pub struct MockRangingHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockRangingSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                sender: None,
                policy: None,
                connected: Vec::new(),
                subscribe_count: 0,
                unsubscribe_count: 0,
                fail_subscribe: false,
                fail_unsubscribe: false,
                origin: Instant::now(),
            })),
        }
    }

    pub fn handle(&self) -> MockRangingHandle {
        MockRangingHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockRangingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RangingSource for MockRangingSource {
    fn subscribe(&mut self, policy: &RangingPolicy) -> SourceResult<EventReceiver> {
        let mut state = self.state.lock();

        if state.fail_subscribe {
            return Err(SourceError::SubscribeFailed {
                reason: "simulated subscribe failure".to_string(),
            });
        }
        if let Err((parameter, value)) = policy.validate() {
            return Err(SourceError::InvalidPolicy {
                parameter: parameter.to_string(),
                value,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sender = Some(tx);
        state.policy = Some(policy.clone());
        state.connected.clear();
        state.subscribe_count += 1;

        tracing::debug!(
            max_connections = policy.max_connections,
            replacement_distance = policy.replacement_distance_threshold,
            "mock ranging source subscribed"
        );
        Ok(rx)
    }

    fn unsubscribe(&mut self) -> SourceResult<()> {
        let mut state = self.state.lock();
        state.unsubscribe_count += 1;
        state.sender = None;
        state.connected.clear();

        if state.fail_unsubscribe {
            return Err(SourceError::UnsubscribeFailed {
                reason: "simulated unsubscribe failure".to_string(),
            });
        }

        tracing::debug!("mock ranging source unsubscribed");
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.state.lock().sender.is_some()
    }
}

impl MockRangingHandle {
    /// Milliseconds since the source was created
    pub fn now_ms(&self) -> u64 {
        self.state.lock().origin.elapsed().as_millis() as u64
    }

    /// Report a distance stamped with the current monotonic time
    pub fn push_distance(&self, device_id: &str, distance: f64) -> bool {
        let timestamp_ms = self.now_ms();
        self.push_range(RangeSample::new(device_id, distance, timestamp_ms))
    }

    /// Report a range sample, applying the active policy.
    ///
    /// Returns `true` when the sample reached the subscriber. Samples are dropped
    /// when nothing is subscribed, when the anchor cannot get a connection slot,
    /// or when it is beyond the replacement distance (which also disconnects it).
    pub fn push_range(&self, sample: RangeSample) -> bool {
        let mut state = self.state.lock();
        let policy = match &state.policy {
            Some(policy) if state.sender.is_some() => policy.clone(),
            _ => return false,
        };

        let is_connected = state.connected.iter().any(|id| *id == sample.device_id);
        if !is_connected {
            if state.connected.len() >= policy.max_connections as usize {
                tracing::trace!(device = %sample.device_id, "no free connection slot");
                return false;
            }
            state.connected.push(sample.device_id.clone());
        }

        if sample.distance > policy.replacement_distance_threshold {
            state.connected.retain(|id| *id != sample.device_id);
            state.send(RangingEvent::Disconnected(DisconnectEvent::new(
                sample.device_id,
                DisconnectReason::DistanceThresholdExceeded,
            )));
            return false;
        }

        state.send(RangingEvent::Range(sample))
    }

    /// Simulate the radio losing an anchor
    pub fn disconnect(&self, device_id: &str) -> bool {
        let mut state = self.state.lock();
        state.connected.retain(|id| id != device_id);
        state.send(RangingEvent::Disconnected(DisconnectEvent::new(
            device_id,
            DisconnectReason::SystemError,
        )))
    }

    /// Push a stream fault to the subscriber
    pub fn inject_fault(&self, reason: &str, recoverable: bool) -> bool {
        self.state.lock().send(RangingEvent::Fault(SourceError::StreamFault {
            reason: reason.to_string(),
            recoverable,
        }))
    }

    /// Close the event stream without going through `unsubscribe`
    pub fn close_stream(&self) {
        let mut state = self.state.lock();
        state.sender = None;
        state.connected.clear();
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.state.lock().fail_unsubscribe = fail;
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    pub fn subscribe_count(&self) -> u32 {
        self.state.lock().subscribe_count
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.state.lock().unsubscribe_count
    }

    pub fn last_policy(&self) -> Option<RangingPolicy> {
        self.state.lock().policy.clone()
    }

    pub fn connected_devices(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_requires_subscription() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        assert!(!handle.push_distance("A", 1.0));
    }

    #[test]
    fn test_subscribe_and_receive() {
        let mut source = MockRangingSource::new();
        let handle = source.handle();
        let mut rx = source.subscribe(&RangingPolicy::default()).unwrap();

        assert!(source.is_subscribed());
        assert!(handle.push_range(RangeSample::new("A", 2.0, 10)));

        match rx.try_recv().unwrap() {
            RangingEvent::Range(sample) => {
                assert_eq!(sample.device_id, "A");
                assert_eq!(sample.distance, 2.0);
                assert_eq!(sample.timestamp_ms, 10);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_max_connections_enforced() {
        let mut source = MockRangingSource::new();
        let handle = source.handle();
        let _rx = source.subscribe(&RangingPolicy::new(2, 8.0, true)).unwrap();

        assert!(handle.push_distance("A", 1.0));
        assert!(handle.push_distance("B", 1.0));
        assert!(!handle.push_distance("C", 1.0));
        assert!(handle.push_distance("A", 1.5));

        handle.disconnect("B");
        assert!(handle.push_distance("C", 1.0));
        assert_eq!(handle.connected_devices(), vec!["A", "C"]);
    }

    #[test]
    fn test_replacement_threshold_disconnects() {
        let mut source = MockRangingSource::new();
        let handle = source.handle();
        let mut rx = source.subscribe(&RangingPolicy::new(4, 5.0, true)).unwrap();

        assert!(!handle.push_distance("A", 6.0));
        assert_eq!(
            rx.try_recv().unwrap(),
            RangingEvent::Disconnected(DisconnectEvent::new(
                "A",
                DisconnectReason::DistanceThresholdExceeded
            ))
        );
        assert!(handle.connected_devices().is_empty());
    }

    #[test]
    fn test_unsubscribe_closes_stream() {
        let mut source = MockRangingSource::new();
        let handle = source.handle();
        let mut rx = source.subscribe(&RangingPolicy::default()).unwrap();

        source.unsubscribe().unwrap();
        assert!(!handle.push_distance("A", 1.0));
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.unsubscribe_count(), 1);
    }

    #[test]
    fn test_failure_injection() {
        let mut source = MockRangingSource::new();
        let handle = source.handle();

        handle.set_fail_subscribe(true);
        assert!(matches!(
            source.subscribe(&RangingPolicy::default()),
            Err(SourceError::SubscribeFailed { .. })
        ));

        handle.set_fail_subscribe(false);
        let _rx = source.subscribe(&RangingPolicy::default()).unwrap();
        handle.set_fail_unsubscribe(true);
        assert!(matches!(source.unsubscribe(), Err(SourceError::UnsubscribeFailed { .. })));
        assert!(!source.is_subscribed());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut source = MockRangingSource::new();
        let result = source.subscribe(&RangingPolicy::new(0, 8.0, true));
        assert!(matches!(result, Err(SourceError::InvalidPolicy { .. })));
    }
}
