pub mod breaker;
pub mod memory;
pub mod tiered;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use memory::InMemoryStorage;
pub use tiered::TieredStorage;

use crate::error::LimiterError;
use crate::policy::Policy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock, injectable so stores (and everything above them) can
/// be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock: milliseconds since the UNIX epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn at(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of one key's admission state.
///
/// `remaining` and `reset_millis` are advisory: another caller may have
/// moved the state by the time the snapshot is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub limit: u64,
    pub remaining: u64,
    pub reset_millis: u64,
    pub current_usage: f64,
}

/// Owner of per-key algorithm state.
///
/// The one hard requirement is atomicity: `try_acquire` performs the whole
/// read-kernel-write transition for a key as a single linearizable step, so
/// concurrent callers on one key can neither over-admit nor lose updates.
/// Disjoint keys must be able to progress in parallel; a store serialized
/// by one global lock does not satisfy this contract.
#[async_trait]
pub trait AdmissionStorage: Send + Sync {
    /// The store's notion of "now". The engine reads time from here so that
    /// decisions and stored state share one clock.
    fn current_time_millis(&self) -> u64;

    /// Atomically transition `key` under `policy` at `now_millis` and report
    /// whether the request was admitted.
    async fn try_acquire(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        self.try_acquire_permits(key, policy, 1, now_millis).await
    }

    /// Multi-permit variant; admission is all-or-nothing.
    async fn try_acquire_permits(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
    ) -> Result<bool, LimiterError>;

    /// Forget all per-algorithm state for `key`.
    async fn reset(&self, key: &str);

    /// Advisory snapshot of `key`'s state, if any exists.
    async fn state(&self, key: &str) -> Option<StateSnapshot>;

    /// Operational self-description; at minimum `type`, `healthy` and
    /// `states.count`.
    fn diagnostics(&self) -> serde_json::Map<String, serde_json::Value>;

    fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }

    #[test]
    fn test_system_clock_is_epoch_scaled() {
        // Past 2020, below 3000: sanity band for epoch milliseconds.
        let now = SystemClock.now_millis();
        assert!(now > 1_577_836_800_000);
        assert!(now < 32_503_680_000_000);
    }
}
