//! Ranging session controller
//!
//! Owns the single subscription to the ranging source. Restarts are serialized:
//! every start first stops the previous subscription, waits for the radio to
//! settle and only then subscribes again. Events are pumped on a background task
//! and every callback runs behind a per-subscription gate, so once `stop_ranging`
//! returns nothing from the old subscription can reach caller code.

use crate::api::types::{
    CompletionCallback, DisconnectCallback, EventCallback, RtlsError, RtlsResult, SessionConfig,
    SessionEvent, SessionState, UpdateCallback,
};
use crate::core::{DisconnectEvent, RangeSample, RangingPolicy};
use crate::hardware::{EventReceiver, RangingEvent, RangingSource, SourceError};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Open/closed flag held for the duration of every callback dispatch.
///
/// Re-entrant so a callback may stop the session from inside itself.
#[derive(Clone)]
pub(crate) struct SessionGate(Arc<ReentrantMutex<Cell<bool>>>);

impl SessionGate {
    fn open() -> Self {
        SessionGate(Arc::new(ReentrantMutex::new(Cell::new(true))))
    }

    /// Close the gate, waiting for any dispatch running on another thread
    fn close(&self) {
        self.0.lock().set(false);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.lock().get()
    }

    /// Run `dispatch` if the gate is still open
    pub(crate) fn run<F: FnOnce()>(&self, dispatch: F) -> bool {
        let guard = self.0.lock();
        if !guard.get() {
            return false;
        }
        dispatch();
        true
    }
}

/// Range handler that also sees the gate it is dispatched under, so composed
/// handlers can re-check it between the callbacks they fan out to
pub(crate) type GatedUpdate = Arc<dyn Fn(RangeSample, &SessionGate) + Send + Sync>;

/// Callbacks bound to one subscription
#[derive(Clone)]
pub(crate) struct Handlers {
    pub(crate) on_update: GatedUpdate,
    pub(crate) on_disconnect: DisconnectCallback,
}

struct SessionShared {
    state: SessionState,
    /// Bumped by every start and stop; stale starts and pumps compare against it
    generation: u64,
    gate: Option<SessionGate>,
    pump: Option<JoinHandle<()>>,
}

/// Outcome of an internal resubscribe attempt
enum Resubscribe {
    Subscribed(EventReceiver),
    Failed(SourceError),
    Cancelled,
}

#[derive(Clone)]
struct SessionCore {
    source: Arc<Mutex<Box<dyn RangingSource>>>,
    shared: Arc<Mutex<SessionShared>>,
    config: SessionConfig,
    event_sink: Option<EventCallback>,
}

impl SessionCore {
    fn emit(&self, event: SessionEvent) {
        if let Some(sink) = &self.event_sink {
            sink(event);
        }
    }

    fn emit_transition(&self, from: SessionState, to: SessionState) {
        if from != to {
            debug!(%from, %to, "ranging session state changed");
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Tear down the current subscription. No-op when already idle.
    fn stop_inner(&self) -> RtlsResult<()> {
        let (previous, gate, pump) = {
            let mut shared = self.shared.lock();
            if shared.state == SessionState::Idle {
                return Ok(());
            }
            let previous = shared.state;
            shared.generation += 1;
            shared.state = SessionState::Stopping;
            (previous, shared.gate.take(), shared.pump.take())
        };
        self.emit_transition(previous, SessionState::Stopping);

        if let Some(gate) = gate {
            gate.close();
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        let result = {
            let mut source = self.source.lock();
            if source.is_subscribed() {
                source.unsubscribe()
            } else {
                Ok(())
            }
        };

        self.shared.lock().state = SessionState::Idle;
        self.emit_transition(SessionState::Stopping, SessionState::Idle);
        self.emit(SessionEvent::Stopped { success: result.is_ok() });

        result.map_err(|e| RtlsError::SessionStopFailure { reason: e.to_string() })
    }

    /// Move `Active -> Starting`, release the stream, wait and subscribe again
    async fn resubscribe(
        &self,
        generation: u64,
        gate: &SessionGate,
        policy: &RangingPolicy,
        attempt: u32,
        reason: &SourceError,
    ) -> Resubscribe {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || !gate.is_open() {
                return Resubscribe::Cancelled;
            }
            std::mem::replace(&mut shared.state, SessionState::Starting)
        };
        warn!(attempt, error = %reason, "ranging stream faulted, resubscribing");
        self.emit_transition(previous, SessionState::Starting);
        self.emit(SessionEvent::Restarting {
            attempt,
            reason: reason.to_string(),
        });

        if let Err(e) = self.source.lock().unsubscribe() {
            warn!(error = %e, "failed to release faulted subscription");
        }

        tokio::time::sleep(self.config.settle_delay).await;

        let subscribed = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || !gate.is_open() {
                return Resubscribe::Cancelled;
            }
            let result = self.source.lock().subscribe(policy);
            if result.is_ok() {
                shared.state = SessionState::Active;
            }
            result
        };

        match subscribed {
            Ok(rx) => {
                info!(attempt, "ranging stream resubscribed");
                self.emit_transition(SessionState::Starting, SessionState::Active);
                self.emit(SessionEvent::Subscribed { policy: policy.clone() });
                Resubscribe::Subscribed(rx)
            }
            Err(e) => Resubscribe::Failed(e),
        }
    }

    /// Give up on the subscription after an unrecoverable fault
    fn fail_subscription(&self, generation: u64, fault: SourceError) {
        let previous = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            let previous = shared.state;
            shared.generation += 1;
            shared.state = SessionState::Idle;
            if let Some(gate) = shared.gate.take() {
                gate.close();
            }
            shared.pump.take();
            previous
        };

        {
            let mut source = self.source.lock();
            if source.is_subscribed() {
                if let Err(e) = source.unsubscribe() {
                    warn!(error = %e, "failed to release faulted subscription");
                }
            }
        }

        error!(error = %fault, "ranging subscription lost");
        self.emit_transition(previous, SessionState::Idle);
        self.emit(SessionEvent::SubscriptionFault {
            reason: fault.to_string(),
        });
    }

    /// Forward events to the handlers until the subscription ends
    async fn run_pump(
        self,
        mut rx: EventReceiver,
        gate: SessionGate,
        generation: u64,
        policy: RangingPolicy,
        handlers: Handlers,
    ) {
        let mut restart_attempts = 0u32;
        let mut pending_fault: Option<SourceError> = None;

        loop {
            let fault = match pending_fault.take() {
                Some(fault) => fault,
                None => match rx.recv().await {
                    Some(RangingEvent::Range(sample)) => {
                        restart_attempts = 0;
                        if !gate.run(|| (handlers.on_update)(sample, &gate)) {
                            break;
                        }
                        continue;
                    }
                    Some(RangingEvent::Disconnected(event)) => {
                        restart_attempts = 0;
                        if !gate.run(|| (handlers.on_disconnect)(event)) {
                            break;
                        }
                        continue;
                    }
                    Some(RangingEvent::Fault(fault)) => fault,
                    None => SourceError::StreamEnded,
                },
            };

            if !gate.is_open() {
                break;
            }
            if !fault.is_recoverable() || restart_attempts >= self.config.max_restart_attempts {
                self.fail_subscription(generation, fault);
                break;
            }

            restart_attempts += 1;
            match self
                .resubscribe(generation, &gate, &policy, restart_attempts, &fault)
                .await
            {
                Resubscribe::Subscribed(new_rx) => rx = new_rx,
                Resubscribe::Failed(e) => pending_fault = Some(e),
                Resubscribe::Cancelled => break,
            }
        }

        debug!(generation, "ranging event pump finished");
    }
}

/// Controller for the single ranging subscription of one device
pub struct RangingSession {
    core: SessionCore,
    /// Serializes start requests end to end
    lifecycle: tokio::sync::Mutex<()>,
}

impl RangingSession {
    pub fn new(source: impl RangingSource + 'static) -> Self {
        Self::with_config(source, SessionConfig::default())
    }

    pub fn with_config(source: impl RangingSource + 'static, config: SessionConfig) -> Self {
        Self {
            core: SessionCore {
                source: Arc::new(Mutex::new(Box::new(source))),
                shared: Arc::new(Mutex::new(SessionShared {
                    state: SessionState::Idle,
                    generation: 0,
                    gate: None,
                    pump: None,
                })),
                config,
                event_sink: None,
            },
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Install an observability sink for lifecycle notifications
    pub fn with_event_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.core.event_sink = Some(Arc::new(sink));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Start ranging, replacing any running subscription.
    ///
    /// Resolves once the new subscription is open. Raw range reports go to
    /// `on_update` and anchor drops to `on_disconnect`, both called from the
    /// background event task.
    pub async fn start_ranging<U, D>(
        &self,
        policy: RangingPolicy,
        on_update: U,
        on_disconnect: D,
    ) -> RtlsResult<()>
    where
        U: Fn(RangeSample) + Send + Sync + 'static,
        D: Fn(DisconnectEvent) + Send + Sync + 'static,
    {
        let on_update: UpdateCallback = Arc::new(on_update);
        let handlers = Handlers {
            on_update: Arc::new(move |sample: RangeSample, _gate: &SessionGate| {
                on_update(sample)
            }),
            on_disconnect: Arc::new(on_disconnect),
        };
        self.start_with_handlers(policy, handlers).await
    }

    pub(crate) async fn start_with_handlers(
        &self,
        policy: RangingPolicy,
        handlers: Handlers,
    ) -> RtlsResult<()> {
        if let Err((parameter, value)) = policy.validate() {
            return Err(RtlsError::InvalidConfiguration {
                parameter: parameter.to_string(),
                value,
            });
        }

        let _lifecycle = self.lifecycle.lock().await;

        match self.core.stop_inner() {
            Ok(()) => debug!("previous ranging session released"),
            Err(e) => warn!(error = %e, "previous ranging session did not stop cleanly"),
        }

        let generation = {
            let mut shared = self.core.shared.lock();
            shared.generation += 1;
            shared.state = SessionState::Starting;
            shared.generation
        };
        self.core.emit_transition(SessionState::Idle, SessionState::Starting);

        tokio::time::sleep(self.core.config.settle_delay).await;

        let gate = SessionGate::open();
        let rx = {
            let mut shared = self.core.shared.lock();
            if shared.generation != generation {
                info!("ranging start superseded during settle delay");
                return Err(RtlsError::StartSuperseded);
            }
            let subscribed = self.core.source.lock().subscribe(&policy);
            match subscribed {
                Ok(rx) => {
                    shared.state = SessionState::Active;
                    shared.gate = Some(gate.clone());
                    rx
                }
                Err(e) => {
                    shared.state = SessionState::Idle;
                    drop(shared);
                    error!(error = %e, "failed to subscribe to ranging source");
                    self.core.emit_transition(SessionState::Starting, SessionState::Idle);
                    return Err(RtlsError::SubscriptionFault { reason: e.to_string() });
                }
            }
        };

        info!(
            max_connections = policy.max_connections,
            replacement_distance = policy.replacement_distance_threshold,
            strongest_first = policy.prefer_strongest_signal_first,
            "ranging session started"
        );
        self.core.emit_transition(SessionState::Starting, SessionState::Active);
        self.core.emit(SessionEvent::Subscribed { policy: policy.clone() });

        let pump = tokio::spawn(self.core.clone().run_pump(
            rx,
            gate,
            generation,
            policy,
            handlers,
        ));

        let mut shared = self.core.shared.lock();
        if shared.generation == generation {
            shared.pump = Some(pump);
        } else {
            pump.abort();
        }

        Ok(())
    }

    /// Stop ranging. Idempotent; the outcome goes to `on_complete` when given.
    ///
    /// After this returns no callback from the stopped subscription will run.
    pub fn stop_ranging(&self, on_complete: Option<CompletionCallback>) {
        let result = self.core.stop_inner();
        match &result {
            Ok(()) => info!("ranging session stopped"),
            Err(e) => error!(error = %e, "ranging session stop failed"),
        }
        if let Some(on_complete) = on_complete {
            on_complete(result);
        }
    }
}

impl Drop for RangingSession {
    fn drop(&mut self) {
        if let Err(e) = self.core.stop_inner() {
            warn!(error = %e, "ranging session dropped without a clean stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DisconnectReason;
    use crate::hardware::MockRangingSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn test_config() -> SessionConfig {
        SessionConfig {
            settle_delay: Duration::from_millis(10),
            max_restart_attempts: 2,
        }
    }

    fn policy() -> RangingPolicy {
        RangingPolicy::new(4, 50.0, true)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_forwards_events() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = RangingSession::with_config(source, test_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (dtx, mut drx) = mpsc::unbounded_channel();
        session
            .start_ranging(
                policy(),
                move |sample| {
                    let _ = tx.send(sample);
                },
                move |event| {
                    let _ = dtx.send(event);
                },
            )
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(handle.last_policy(), Some(policy()));

        assert!(handle.push_range(RangeSample::new("A", 1.25, 7).with_azimuth(45.0)));
        let sample = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(sample.device_id, "A");
        assert_eq!(sample.azimuth, 45.0);

        assert!(handle.disconnect("A"));
        let event = timeout(Duration::from_secs(2), drx.recv()).await.unwrap().unwrap();
        assert_eq!(event.reason, DisconnectReason::SystemError);

        session.stop_ranging(None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = RangingSession::with_config(source, test_config());

        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let results = Arc::clone(&results);
            session.stop_ranging(Some(Box::new(move |r| results.lock().push(r))));
        }
        assert_eq!(*results.lock(), vec![Ok(()), Ok(())]);
        assert_eq!(handle.unsubscribe_count(), 0);

        session.start_ranging(policy(), |_| {}, |_| {}).await.unwrap();
        for _ in 0..2 {
            let results = Arc::clone(&results);
            session.stop_ranging(Some(Box::new(move |r| results.lock().push(r))));
        }
        assert_eq!(results.lock().len(), 4);
        assert!(results.lock().iter().all(|r| r.is_ok()));
        assert_eq!(handle.unsubscribe_count(), 1);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_no_callback_after_stop() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = RangingSession::with_config(source, test_config());

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        session
            .start_ranging(
                policy(),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                |_| {},
            )
            .await
            .unwrap();

        // Queue events, then stop before the pump gets a chance to run
        for i in 0..3 {
            assert!(handle.push_range(RangeSample::new("A", 1.0, i)));
        }
        session.stop_ranging(None);

        assert!(!handle.push_distance("A", 1.0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_failure_reported() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = RangingSession::with_config(source, test_config());
        session.start_ranging(policy(), |_| {}, |_| {}).await.unwrap();

        handle.set_fail_unsubscribe(true);
        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        session.stop_ranging(Some(Box::new(move |r| *slot.lock() = Some(r))));

        assert!(matches!(
            outcome.lock().clone(),
            Some(Err(RtlsError::SessionStopFailure { .. }))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        // Recoverable by starting again
        handle.set_fail_unsubscribe(false);
        session.start_ranging(policy(), |_| {}, |_| {}).await.unwrap();
        assert!(session.is_active());
        session.stop_ranging(None);
    }

    #[tokio::test]
    async fn test_restart_replaces_subscription() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = RangingSession::with_config(source, test_config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = tx.clone();
        session
            .start_ranging(
                policy(),
                move |_| {
                    let _ = first.send("first");
                },
                |_| {},
            )
            .await
            .unwrap();
        let second = tx.clone();
        session
            .start_ranging(
                policy(),
                move |_| {
                    let _ = second.send("second");
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(handle.subscribe_count(), 2);
        assert_eq!(handle.unsubscribe_count(), 1);

        assert!(handle.push_distance("A", 1.0));
        let tag = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(tag, "second");

        session.stop_ranging(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_during_settle_supersedes_start() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let config = SessionConfig {
            settle_delay: Duration::from_millis(200),
            ..test_config()
        };
        let session = Arc::new(RangingSession::with_config(source, config));

        let starter = Arc::clone(&session);
        let pending =
            tokio::spawn(async move { starter.start_ranging(policy(), |_| {}, |_| {}).await });

        assert!(wait_for(|| session.state() == SessionState::Starting).await);
        session.stop_ranging(None);

        let result = pending.await.unwrap();
        assert_eq!(result, Err(RtlsError::StartSuperseded));
        assert_eq!(handle.subscribe_count(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_recoverable_fault_resubscribes() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let session = RangingSession::with_config(source, test_config())
            .with_event_sink(move |event| sink.lock().push(event));

        let (tx, mut rx) = mpsc::unbounded_channel();
        session
            .start_ranging(
                policy(),
                move |s| {
                    let _ = tx.send(s);
                },
                |_| {},
            )
            .await
            .unwrap();

        assert!(handle.inject_fault("radio hiccup", true));
        assert!(wait_for(|| handle.subscribe_count() == 2 && session.is_active()).await);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, SessionEvent::Restarting { attempt: 1, .. })));

        assert!(handle.push_distance("B", 2.0));
        let sample = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(sample.device_id, "B");

        session.stop_ranging(None);
    }

    #[tokio::test]
    async fn test_unrecoverable_fault_goes_idle() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let session = RangingSession::with_config(source, test_config())
            .with_event_sink(move |event| sink.lock().push(event));

        session.start_ranging(policy(), |_| {}, |_| {}).await.unwrap();
        assert!(handle.inject_fault("firmware crash", false));

        assert!(wait_for(|| session.state() == SessionState::Idle).await);
        assert!(!handle.is_subscribed());
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, SessionEvent::SubscriptionFault { .. })));
        assert_eq!(handle.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_attempts_exhausted() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let session = RangingSession::with_config(source, test_config())
            .with_event_sink(move |event| sink.lock().push(event));

        session.start_ranging(policy(), |_| {}, |_| {}).await.unwrap();
        handle.set_fail_subscribe(true);
        handle.close_stream();

        assert!(wait_for(|| {
            events
                .lock()
                .iter()
                .any(|e| matches!(e, SessionEvent::SubscriptionFault { .. }))
        })
        .await);
        assert_eq!(session.state(), SessionState::Idle);
        let restarts = events
            .lock()
            .iter()
            .filter(|e| matches!(e, SessionEvent::Restarting { .. }))
            .count();
        assert_eq!(restarts, 2);
    }

    #[tokio::test]
    async fn test_subscribe_failure_on_start() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        handle.set_fail_subscribe(true);
        let session = RangingSession::with_config(source, test_config());

        let result = session.start_ranging(policy(), |_| {}, |_| {}).await;
        assert!(matches!(result, Err(RtlsError::SubscriptionFault { .. })));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let session = RangingSession::with_config(MockRangingSource::new(), test_config());
        assert_eq!(session.config().max_restart_attempts, 2);
        let result = session
            .start_ranging(RangingPolicy::new(0, 8.0, true), |_| {}, |_| {})
            .await;
        assert!(matches!(result, Err(RtlsError::InvalidConfiguration { .. })));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_callback_may_stop_session() {
        let source = MockRangingSource::new();
        let handle = source.handle();
        let session = Arc::new(RangingSession::with_config(source, test_config()));

        let inner = Arc::downgrade(&session);
        session
            .start_ranging(
                policy(),
                move |_| {
                    if let Some(session) = inner.upgrade() {
                        session.stop_ranging(None);
                    }
                },
                |_| {},
            )
            .await
            .unwrap();

        assert!(handle.push_distance("A", 1.0));
        assert!(wait_for(|| session.state() == SessionState::Idle).await);
        assert!(!handle.is_subscribed());
    }
}
