use crate::metrics::{MetricsSink, NoopMetricsSink};
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in (0, 1) over the rolling window that trips the
    /// breaker.
    pub failure_threshold: f64,
    /// Length of the rolling statistics window.
    pub window_millis: u64,
    /// Base wait before probing a tripped primary.
    pub base_half_open_timeout_millis: u64,
    /// Fraction of the timeout randomized away in each direction. Each node
    /// draws its own deadline, so a fleet that tripped together does not
    /// probe the recovering store in lockstep.
    pub jitter_factor: f64,
    /// Cap on simultaneous half-open probes per node.
    pub max_concurrent_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            window_millis: 10_000,
            base_half_open_timeout_millis: 30_000,
            jitter_factor: 0.2,
            max_concurrent_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

const STATE_CLOSED: u8 = BreakerState::Closed as u8;
const STATE_OPEN: u8 = BreakerState::Open as u8;
const STATE_HALF_OPEN: u8 = BreakerState::HalfOpen as u8;

fn state_from(raw: u8) -> BreakerState {
    match raw {
        STATE_OPEN => BreakerState::Open,
        STATE_HALF_OPEN => BreakerState::HalfOpen,
        _ => BreakerState::Closed,
    }
}

/// Where the tiered store should send a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerRoute {
    /// Breaker closed: use the primary.
    Primary,
    /// Half-open probe slot acquired: use the primary and report the outcome
    /// with `probe = true`.
    Probe,
    /// Skip the primary and fall back to the secondary.
    Fallback,
}

/// Circuit breaker state machine: Closed → Open → HalfOpen → Closed/Open.
///
/// The hot-path state lives in an `AtomicU8` and the probe slots in an
/// `AtomicU32`; rolling statistics and the open deadline sit behind a mutex
/// that serializes transitions. Every `Probe` route handed out must be paid
/// back through `on_primary_success`/`on_primary_failure` with
/// `probe = true`; the slot count balances on those calls.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    probes_in_flight: AtomicU32,
    inner: Mutex<BreakerInner>,
    metrics: Arc<dyn MetricsSink>,
}

struct BreakerInner {
    window_start_millis: u64,
    successes: u64,
    failures: u64,
    open_deadline_millis: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(STATE_CLOSED),
            probes_in_flight: AtomicU32::new(0),
            inner: Mutex::new(BreakerInner {
                window_start_millis: 0,
                successes: 0,
                failures: 0,
                open_deadline_millis: 0,
            }),
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> BreakerState {
        state_from(self.state.load(Ordering::Acquire))
    }

    /// Deadline of the current open period; `None` while not open.
    pub fn open_deadline_millis(&self) -> Option<u64> {
        (self.state() == BreakerState::Open)
            .then(|| self.inner.lock().unwrap().open_deadline_millis)
    }

    /// Route the next call. `Probe` acquires one of the half-open slots.
    pub fn route(&self, now_millis: u64) -> BreakerRoute {
        match self.state() {
            BreakerState::Closed => BreakerRoute::Primary,
            BreakerState::HalfOpen => self.try_probe(),
            BreakerState::Open => {
                let deadline = {
                    let inner = self.inner.lock().unwrap();
                    inner.open_deadline_millis
                };
                if now_millis < deadline {
                    return BreakerRoute::Fallback;
                }
                // Only one caller wins the Open -> HalfOpen edge; everyone
                // else competes for probe slots like any half-open caller.
                if self
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    tracing::info!(
                        breaker = %self.name,
                        "circuit breaker half-open, probing primary"
                    );
                    self.metrics
                        .record_circuit_breaker_state_change(&self.name, BreakerState::HalfOpen);
                }
                if self.state() == BreakerState::HalfOpen {
                    self.try_probe()
                } else {
                    BreakerRoute::Fallback
                }
            }
        }
    }

    fn try_probe(&self) -> BreakerRoute {
        let max = self.config.max_concurrent_probes;
        let acquired = self
            .probes_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok();
        if acquired {
            BreakerRoute::Probe
        } else {
            BreakerRoute::Fallback
        }
    }

    /// Record a primary success. A successful probe closes the breaker and
    /// clears the rolling statistics.
    pub fn on_primary_success(&self, now_millis: u64, probe: bool) {
        if probe {
            self.probes_in_flight.fetch_sub(1, Ordering::AcqRel);
            let mut inner = self.inner.lock().unwrap();
            inner.window_start_millis = now_millis;
            inner.successes = 0;
            inner.failures = 0;
            if self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED {
                tracing::info!(breaker = %self.name, "circuit breaker closed (probe succeeded)");
                self.metrics
                    .record_circuit_breaker_state_change(&self.name, BreakerState::Closed);
            }
        } else {
            let mut inner = self.inner.lock().unwrap();
            roll_window(&mut inner, now_millis, self.config.window_millis);
            inner.successes += 1;
        }
    }

    /// Record a primary failure. A failed probe re-opens with a fresh
    /// jittered deadline; in closed state the rolling failure ratio decides.
    pub fn on_primary_failure(&self, now_millis: u64, probe: bool) {
        if probe {
            self.probes_in_flight.fetch_sub(1, Ordering::AcqRel);
            self.trip(now_millis, "probe failed in half-open");
            return;
        }

        let should_trip = {
            let mut inner = self.inner.lock().unwrap();
            roll_window(&mut inner, now_millis, self.config.window_millis);
            inner.failures += 1;
            let total = inner.successes + inner.failures;
            let ratio = inner.failures as f64 / total as f64;
            self.state.load(Ordering::Acquire) == STATE_CLOSED
                && ratio >= self.config.failure_threshold
        };
        if should_trip {
            self.trip(now_millis, "failure ratio over threshold");
        }
    }

    fn trip(&self, now_millis: u64, why: &str) {
        let deadline = now_millis + self.jittered_timeout_millis();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.open_deadline_millis = deadline;
            inner.window_start_millis = now_millis;
            inner.successes = 0;
            inner.failures = 0;
        }
        if self.state.swap(STATE_OPEN, Ordering::AcqRel) != STATE_OPEN {
            tracing::warn!(breaker = %self.name, why, "circuit breaker opened");
            self.metrics
                .record_circuit_breaker_state_change(&self.name, BreakerState::Open);
        }
    }

    /// `base × (1 ± jitter_factor × rand)`.
    fn jittered_timeout_millis(&self) -> u64 {
        let base = self.config.base_half_open_timeout_millis as f64;
        let jitter = self.config.jitter_factor * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
        (base * (1.0 + jitter)).max(0.0) as u64
    }
}

fn roll_window(inner: &mut BreakerInner, now_millis: u64, window_millis: u64) {
    if now_millis.saturating_sub(inner.window_start_millis) >= window_millis {
        inner.window_start_millis = now_millis;
        inner.successes = 0;
        inner.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_timeout: u64, jitter: f64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 0.5,
            window_millis: 10_000,
            base_half_open_timeout_millis: base_timeout,
            jitter_factor: jitter,
            max_concurrent_probes: 1,
        }
    }

    #[test]
    fn test_starts_closed_and_routes_primary() {
        let cb = CircuitBreaker::new("t", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.route(0), BreakerRoute::Primary);
    }

    #[test]
    fn test_trips_when_failure_ratio_reaches_threshold() {
        let cb = CircuitBreaker::new("t", config(1_000, 0.0));

        // 1 success + 1 failure: ratio 0.5 >= 0.5 trips.
        cb.on_primary_success(0, false);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.on_primary_failure(1, false);
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.route(2), BreakerRoute::Fallback);
    }

    #[test]
    fn test_failures_outside_window_are_forgotten() {
        let cb = CircuitBreaker::new("t", config(1_000, 0.0));

        cb.on_primary_success(0, false);
        cb.on_primary_success(1, false);
        cb.on_primary_success(2, false);
        // The window rolls before this failure: it alone has ratio 1.0 and
        // would trip, proving the earlier successes were discarded.
        cb.on_primary_failure(20_000, false);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_jittered_deadline_stays_in_band() {
        // jitter 0.3 on base 1000 -> deadline in [700, 1300] after the trip.
        for _ in 0..50 {
            let cb = CircuitBreaker::new("t", config(1_000, 0.3));
            cb.on_primary_failure(10_000, false);
            let deadline = cb.open_deadline_millis().unwrap();
            assert!(
                (10_700..=11_300).contains(&deadline),
                "deadline {} outside the jitter band",
                deadline
            );
        }
    }

    #[test]
    fn test_half_open_after_deadline_and_probe_cap() {
        let cb = CircuitBreaker::new("t", config(1_000, 0.0));
        cb.on_primary_failure(0, false);
        assert_eq!(cb.state(), BreakerState::Open);

        assert_eq!(cb.route(999), BreakerRoute::Fallback);

        // Deadline reached: exactly one probe slot with max_concurrent_probes=1.
        assert_eq!(cb.route(1_000), BreakerRoute::Probe);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        for _ in 0..100 {
            assert_eq!(cb.route(1_001), BreakerRoute::Fallback);
        }
    }

    #[test]
    fn test_probe_success_closes_and_resets_stats() {
        let cb = CircuitBreaker::new("t", config(1_000, 0.0));
        cb.on_primary_failure(0, false);
        assert_eq!(cb.route(1_000), BreakerRoute::Probe);

        cb.on_primary_success(1_000, true);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.route(1_001), BreakerRoute::Primary);

        // Stats were cleared: one old failure must not linger in the ratio.
        cb.on_primary_success(1_002, false);
        cb.on_primary_success(1_003, false);
        cb.on_primary_success(1_004, false);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_deadline() {
        let cb = CircuitBreaker::new("t", config(1_000, 0.0));
        cb.on_primary_failure(0, false);
        assert_eq!(cb.route(1_000), BreakerRoute::Probe);

        cb.on_primary_failure(1_500, true);
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.open_deadline_millis(), Some(2_500));

        // The probe slot was released: the next half-open cycle can probe.
        assert_eq!(cb.route(2_500), BreakerRoute::Probe);
    }

    #[test]
    fn test_multiple_probe_slots() {
        let cb = CircuitBreaker::new(
            "t",
            CircuitBreakerConfig {
                max_concurrent_probes: 3,
                jitter_factor: 0.0,
                base_half_open_timeout_millis: 100,
                ..CircuitBreakerConfig::default()
            },
        );
        cb.on_primary_failure(0, false);

        let probes = (0..10)
            .filter(|_| cb.route(100) == BreakerRoute::Probe)
            .count();
        assert_eq!(probes, 3);
    }
}
