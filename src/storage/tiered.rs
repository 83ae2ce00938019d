use crate::error::LimiterError;
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::policy::Policy;
use crate::storage::breaker::{BreakerRoute, CircuitBreaker, CircuitBreakerConfig};
use crate::storage::{AdmissionStorage, StateSnapshot};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Primary/secondary storage pair behind a circuit breaker.
///
/// While the breaker is closed, calls go to the primary (typically remote).
/// A primary failure (an error or an elapsed deadline) feeds the breaker
/// and the call falls back to the secondary (typically in-memory). With the
/// breaker open the primary is skipped outright until the jittered deadline
/// admits probes. Only when BOTH tiers fail does an error reach the engine,
/// which then applies the policy's fail strategy; the breaker-open signal
/// itself never leaves this type.
pub struct TieredStorage {
    primary: Arc<dyn AdmissionStorage>,
    secondary: Arc<dyn AdmissionStorage>,
    breaker: CircuitBreaker,
    primary_timeout: Option<Duration>,
    metrics: Arc<dyn MetricsSink>,
}

impl TieredStorage {
    pub fn new(
        primary: Arc<dyn AdmissionStorage>,
        secondary: Arc<dyn AdmissionStorage>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            breaker: CircuitBreaker::new("tiered", breaker_config),
            primary_timeout: None,
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    /// Deadline for each primary call. Expiry counts as a primary failure.
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = Some(timeout);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.breaker = self.breaker.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn primary_acquire(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        let call = self
            .primary
            .try_acquire_permits(key, policy, permits, now_millis);
        match self.primary_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(LimiterError::StorageUnavailable(
                    "primary storage deadline exceeded".to_string(),
                )),
            },
            None => call.await,
        }
    }

    async fn fallback(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
        cause: LimiterError,
    ) -> Result<bool, LimiterError> {
        match self
            .secondary
            .try_acquire_permits(key, policy, permits, now_millis)
            .await
        {
            Ok(allowed) => {
                self.metrics
                    .record_fallback(policy.name(), &cause.to_string());
                Ok(allowed)
            }
            Err(secondary_err) => Err(LimiterError::StorageUnavailable(format!(
                "primary: {}; secondary: {}",
                cause, secondary_err
            ))),
        }
    }
}

#[async_trait]
impl AdmissionStorage for TieredStorage {
    /// Time comes from the secondary: it is the local tier and stays
    /// reachable when the primary is not.
    fn current_time_millis(&self) -> u64 {
        self.secondary.current_time_millis()
    }

    async fn try_acquire_permits(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        let breaker_now = self.current_time_millis();
        let route = self.breaker.route(breaker_now);
        let probe = route == BreakerRoute::Probe;

        match route {
            BreakerRoute::Primary | BreakerRoute::Probe => {
                match self.primary_acquire(key, policy, permits, now_millis).await {
                    Ok(allowed) => {
                        self.breaker.on_primary_success(breaker_now, probe);
                        Ok(allowed)
                    }
                    // A policy that can never be satisfied is not a store
                    // failure: it must not trip the breaker.
                    Err(err @ LimiterError::StorageExceeded(_)) => {
                        self.breaker.on_primary_success(breaker_now, probe);
                        Err(err)
                    }
                    Err(err) => {
                        self.breaker
                            .on_primary_failure(self.current_time_millis(), probe);
                        self.fallback(key, policy, permits, now_millis, err).await
                    }
                }
            }
            BreakerRoute::Fallback => {
                self.fallback(key, policy, permits, now_millis, LimiterError::CircuitBreakerOpen)
                    .await
            }
        }
    }

    async fn reset(&self, key: &str) {
        // Best-effort on both tiers.
        self.primary.reset(key).await;
        self.secondary.reset(key).await;
    }

    async fn state(&self, key: &str) -> Option<StateSnapshot> {
        if self.breaker.state() == crate::storage::BreakerState::Closed {
            if let Some(snapshot) = self.primary.state(key).await {
                return Some(snapshot);
            }
        }
        self.secondary.state(key).await
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("Tiered"));
        map.insert("healthy".to_string(), json!(self.is_healthy()));
        map.insert(
            "breaker.state".to_string(),
            json!(self.breaker.state().as_str()),
        );
        map.insert(
            "primary".to_string(),
            Value::Object(self.primary.diagnostics()),
        );
        map.insert(
            "secondary".to_string(),
            Value::Object(self.secondary.diagnostics()),
        );
        let states = self
            .secondary
            .diagnostics()
            .get("states.count")
            .cloned()
            .unwrap_or(json!(0));
        map.insert("states.count".to_string(), states);
        map
    }

    fn is_healthy(&self) -> bool {
        self.secondary.is_healthy()
            || (self.breaker.state() == crate::storage::BreakerState::Closed
                && self.primary.is_healthy())
    }
}
