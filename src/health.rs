//! Server connectivity health monitor
//!
//! Owns the process-wide [`ConnectivityState`] cell: a single-writer
//! `tokio::sync::watch` channel that the reconciliation loop reads to gate
//! polling. Probes the server on a fixed cadence while reachable and with
//! exponential backoff while disconnected, so an unreachable server is not
//! hammered. The reconciler reports its own transport failures here too;
//! they feed the same failure ladder as probe failures.

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusEvent, ConnectivityState, SharedBus};
use crate::client::{SessionApi, TransportError};

/// Health probe configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Probe cadence while Connected/Degraded
    pub probe_interval: Duration,
    /// Consecutive failures before Degraded becomes Disconnected
    pub failure_threshold: u32,
    /// Initial probe delay while Disconnected
    pub backoff_base: Duration,
    /// Backoff caps at this value
    pub backoff_cap: Duration,
    /// Jitter fraction applied to backoff delays (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            failure_threshold: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

struct FailureState {
    consecutive: u32,
    backoff: Duration,
}

struct Inner {
    bus: SharedBus,
    config: HealthConfig,
    tx: watch::Sender<ConnectivityState>,
    failures: Mutex<FailureState>,
}

/// Health monitor handle. Cheap to clone; all clones share one state cell.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl HealthMonitor {
    /// Create a monitor and the receiver half of its connectivity cell.
    /// Starts optimistically Connected; the first failed probe degrades it.
    pub fn new(bus: SharedBus, config: HealthConfig) -> (Self, watch::Receiver<ConnectivityState>) {
        let (tx, rx) = watch::channel(ConnectivityState::Connected);
        let backoff = config.backoff_base;
        let monitor = Self {
            inner: Arc::new(Inner {
                bus,
                config,
                tx,
                failures: Mutex::new(FailureState {
                    consecutive: 0,
                    backoff,
                }),
            }),
        };
        (monitor, rx)
    }

    /// Current connectivity state
    pub fn connectivity(&self) -> ConnectivityState {
        *self.inner.tx.borrow()
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.tx.subscribe()
    }

    /// Record a transport failure observed outside the probe loop
    /// (the reconciler's list_sessions failures count as signal too)
    pub fn record_failure(&self) {
        self.note_failure();
    }

    fn note_failure(&self) {
        let next = {
            #[allow(clippy::unwrap_used)] // poisoning means a panicked holder; propagate
            let mut failures = self.inner.failures.lock().unwrap();
            failures.consecutive += 1;

            match *self.inner.tx.borrow() {
                ConnectivityState::Connected => ConnectivityState::Degraded,
                ConnectivityState::Degraded
                    if failures.consecutive >= self.inner.config.failure_threshold =>
                {
                    ConnectivityState::Disconnected
                }
                ConnectivityState::Degraded => ConnectivityState::Degraded,
                ConnectivityState::Disconnected => {
                    // Still down: widen the probe backoff
                    failures.backoff =
                        (failures.backoff * 2).min(self.inner.config.backoff_cap);
                    ConnectivityState::Disconnected
                }
            }
        };
        self.set_state(next);
    }

    fn note_success(&self) {
        {
            #[allow(clippy::unwrap_used)]
            let mut failures = self.inner.failures.lock().unwrap();
            failures.consecutive = 0;
            failures.backoff = self.inner.config.backoff_base;
        }
        self.set_state(ConnectivityState::Connected);
    }

    fn set_state(&self, next: ConnectivityState) {
        let previous = *self.inner.tx.borrow();
        if previous == next {
            return;
        }
        self.inner.tx.send_replace(next);
        info!(from = %previous, to = %next, "connectivity transition");
        self.inner
            .bus
            .publish(BusEvent::ConnectivityChanged { state: next });
    }

    /// Delay before the next probe: fixed cadence while reachable,
    /// jittered exponential backoff while disconnected.
    fn next_delay(&self) -> Duration {
        match *self.inner.tx.borrow() {
            ConnectivityState::Connected | ConnectivityState::Degraded => {
                self.inner.config.probe_interval
            }
            ConnectivityState::Disconnected => {
                #[allow(clippy::unwrap_used)]
                let backoff = self.inner.failures.lock().unwrap().backoff;
                let jitter = self.inner.config.jitter;
                let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
                backoff
                    .mul_f64(factor)
                    .clamp(self.inner.config.backoff_base, self.inner.config.backoff_cap)
            }
        }
    }

    /// Run the probe loop until cancelled
    pub async fn run<A: SessionApi>(&self, api: Arc<A>, shutdown: CancellationToken) {
        info!("health monitor started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match api.probe().await {
                Ok(server) => {
                    debug!(server = %server.server_name, version = %server.version, "probe ok");
                    self.note_success();
                }
                Err(TransportError::Unauthorized) => {
                    // The token went stale (server restart, expiry). Try one
                    // re-login; the client's single-flight guard keeps this
                    // from racing the reconciler's own attempt.
                    warn!("probe unauthorized, attempting re-authentication");
                    match api.reauthenticate().await {
                        Ok(()) => self.note_success(),
                        Err(e) => {
                            error!("re-authentication failed: {}", e);
                            self.note_failure();
                        }
                    }
                }
                Err(e) => {
                    warn!("probe failed: {}", e);
                    self.note_failure();
                }
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("health monitor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    fn test_monitor() -> (HealthMonitor, watch::Receiver<ConnectivityState>) {
        HealthMonitor::new(create_bus(), HealthConfig::default())
    }

    #[test]
    fn test_failure_ladder() {
        let (monitor, _rx) = test_monitor();
        assert_eq!(monitor.connectivity(), ConnectivityState::Connected);

        monitor.record_failure();
        assert_eq!(monitor.connectivity(), ConnectivityState::Degraded);

        monitor.record_failure();
        assert_eq!(monitor.connectivity(), ConnectivityState::Degraded);

        monitor.record_failure();
        assert_eq!(monitor.connectivity(), ConnectivityState::Disconnected);
    }

    #[test]
    fn test_success_resets_ladder() {
        let (monitor, _rx) = test_monitor();
        monitor.record_failure();
        monitor.record_failure();
        monitor.note_success();
        assert_eq!(monitor.connectivity(), ConnectivityState::Connected);

        // Counter was reset: the next failure only degrades
        monitor.record_failure();
        assert_eq!(monitor.connectivity(), ConnectivityState::Degraded);
    }

    #[test]
    fn test_backoff_bounds_while_disconnected() {
        let (monitor, _rx) = test_monitor();
        for _ in 0..3 {
            monitor.record_failure();
        }
        assert_eq!(monitor.connectivity(), ConnectivityState::Disconnected);

        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        for _ in 0..20 {
            let delay = monitor.next_delay();
            assert!(delay >= base, "delay {:?} below base", delay);
            assert!(delay <= cap, "delay {:?} above cap", delay);
            // Each failed probe widens the backoff toward the cap
            monitor.record_failure();
        }
        // After many doublings the nominal backoff sits at the cap; the
        // jittered value still clamps within bounds
        let delay = monitor.next_delay();
        assert!(delay <= cap && delay >= base);
    }

    #[test]
    fn test_fixed_cadence_while_reachable() {
        let (monitor, _rx) = test_monitor();
        assert_eq!(monitor.next_delay(), Duration::from_secs(30));

        monitor.record_failure();
        assert_eq!(monitor.connectivity(), ConnectivityState::Degraded);
        assert_eq!(monitor.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_transitions_published_on_bus() {
        let bus = create_bus();
        let mut rx = bus.subscribe();
        let (monitor, _watch) = HealthMonitor::new(bus, HealthConfig::default());

        monitor.record_failure();

        match rx.try_recv().unwrap() {
            BusEvent::ConnectivityChanged { state } => {
                assert_eq!(state, ConnectivityState::Degraded);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Repeated Degraded failures below the threshold publish nothing new
        monitor.record_failure();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_recovery_resets_backoff() {
        let (monitor, _rx) = test_monitor();
        for _ in 0..10 {
            monitor.record_failure();
        }
        monitor.note_success();
        for _ in 0..3 {
            monitor.record_failure();
        }
        // Backoff restarted from base after the recovery: first
        // disconnected delay is ~5s, at most base * 1.2
        let delay = monitor.next_delay();
        assert!(delay <= Duration::from_secs(5).mul_f64(1.2));
    }
}
