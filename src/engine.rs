use crate::audit::{mask_key, AuditSink, NoopAuditSink};
use crate::decision::Decision;
use crate::error::{Environment, LimiterError};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::policy::{Algorithm, FailStrategy, Policy, RequestContext};
use crate::storage::{AdmissionStorage, StateSnapshot};
use std::sync::Arc;
use std::time::Instant;

/// Key used whenever no usable key can be resolved for a request. Admission
/// never fails because of key resolution alone: anonymous traffic just
/// shares one bucket.
pub const ANONYMOUS_KEY: &str = "global-anonymous";

/// Maps a request context to the string that partitions admission state.
/// Must be side-effect-free: identical contexts resolve identically.
pub trait KeyResolver: Send + Sync {
    fn resolve_key(&self, context: &RequestContext) -> Result<Option<String>, LimiterError>;
}

/// Partitions by the context's remote address (the `#ip` convention).
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteAddressKeyResolver;

impl KeyResolver for RemoteAddressKeyResolver {
    fn resolve_key(&self, context: &RequestContext) -> Result<Option<String>, LimiterError> {
        Ok(Some(context.remote_address().to_string()))
    }
}

/// Resolves every context to one fixed key. Useful for global limits and in
/// tests.
#[derive(Debug, Clone)]
pub struct FixedKeyResolver(pub String);

impl KeyResolver for FixedKeyResolver {
    fn resolve_key(&self, _context: &RequestContext) -> Result<Option<String>, LimiterError> {
        Ok(Some(self.0.clone()))
    }
}

/// The decision engine: resolves the key, drives the storage transition and
/// turns the outcome (success or failure) into a [`Decision`].
///
/// `try_acquire` is total: every runtime failure is folded into the decision
/// via the policy's fail strategy, with metrics and audit events on the
/// side. The engine holds no per-key state of its own and performs no
/// retries; both belong to the storage.
pub struct AdmissionEngine {
    storage: Arc<dyn AdmissionStorage>,
    key_resolver: Arc<dyn KeyResolver>,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
    environment: Environment,
}

impl AdmissionEngine {
    pub fn new(storage: Arc<dyn AdmissionStorage>, key_resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            storage,
            key_resolver,
            metrics: Arc::new(NoopMetricsSink),
            audit: Arc::new(NoopAuditSink),
            environment: Environment::from_env(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Override the environment detected from `ENVIRONMENT`.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn storage(&self) -> &Arc<dyn AdmissionStorage> {
        &self.storage
    }

    /// Decide one request under `policy`.
    pub async fn try_acquire(&self, context: &RequestContext, policy: &Policy) -> Decision {
        let key = self.resolve_key(context, policy);
        let now = self.storage.current_time_millis();

        let started = Instant::now();
        let outcome = self.storage.try_acquire(&key, policy, now).await;
        self.metrics
            .record_latency(policy.name(), started.elapsed().as_secs_f64() * 1_000.0);

        let decision = match outcome {
            Ok(allowed) => {
                let snapshot = self.storage.state(&key).await;
                self.assemble(policy, allowed, now, snapshot)
            }
            Err(LimiterError::StorageExceeded(detail)) => {
                // The policy can never grant this request; a deny, not a
                // storage fallback.
                Decision::new(false, policy.name(), policy.requests(), 0, now, 0)
                    .with_reason(detail)
            }
            Err(err) => self.apply_fail_strategy(policy, now, err),
        };

        if decision.allowed() {
            self.metrics.record_allow(policy.name());
        } else {
            self.metrics.record_deny(policy.name());
        }
        self.audit
            .enforcement(policy.name(), &mask_key(&key), decision.allowed());

        decision
    }

    fn resolve_key(&self, context: &RequestContext, policy: &Policy) -> String {
        match self.key_resolver.resolve_key(context) {
            Ok(Some(key)) if !key.is_empty() => key,
            Ok(_) => ANONYMOUS_KEY.to_string(),
            Err(err) => {
                tracing::debug!(limiter = policy.name(), %err, "key resolution failed");
                self.metrics.record_error(policy.name(), &err.to_string());
                self.audit.system_failure(
                    policy.name(),
                    &format!("key resolution failed: {}", err),
                );
                ANONYMOUS_KEY.to_string()
            }
        }
    }

    /// Build the decision record from the post-transition snapshot.
    fn assemble(
        &self,
        policy: &Policy,
        allowed: bool,
        now: u64,
        snapshot: Option<StateSnapshot>,
    ) -> Decision {
        let limit = policy.requests();

        let (remaining, reset_millis, usage) = match snapshot {
            Some(s) => {
                let remaining = match policy.algorithm() {
                    // The sliding-window snapshot reports a placeholder
                    // limit; derive remaining from the policy instead.
                    Algorithm::SlidingWindow => {
                        limit.saturating_sub(s.current_usage.ceil() as u64)
                    }
                    _ => s.remaining,
                };
                (remaining, s.reset_millis, s.current_usage)
            }
            // No snapshot (e.g. a remote tier without read-back): report a
            // conservative view over the policy's own window.
            None => {
                let remaining = if allowed { limit.saturating_sub(1) } else { 0 };
                let usage = if allowed { 1.0 } else { limit as f64 };
                (remaining, now + policy.window_millis(), usage)
            }
        };

        let retry_after_seconds = if allowed {
            0
        } else {
            reset_millis.saturating_sub(now).div_ceil(1_000)
        };

        self.metrics.record_usage(policy.name(), usage, limit);

        let mut decision = Decision::new(
            allowed,
            policy.name(),
            limit,
            remaining,
            reset_millis,
            retry_after_seconds,
        );

        if let Some(throttle) = policy.throttle() {
            let delay = throttle.delay_millis(usage);
            if delay > 0 {
                decision = decision.with_delay_millis(delay);
            }
        }

        decision
    }

    /// Storage is unreachable: the policy decides the answer.
    fn apply_fail_strategy(&self, policy: &Policy, now: u64, err: LimiterError) -> Decision {
        self.metrics
            .record_fallback(policy.name(), &err.to_string());
        self.audit
            .system_failure(policy.name(), &err.public_message(self.environment));

        let limit = policy.requests();
        match policy.fail_strategy() {
            FailStrategy::FailOpen => {
                tracing::debug!(limiter = policy.name(), %err, "storage failed, admitting");
                Decision::new(true, policy.name(), limit, limit, now, 0).with_reason(format!(
                    "fail-open:{}",
                    err.public_message(self.environment)
                ))
            }
            FailStrategy::FailClosed => {
                let window = policy.window_millis();
                tracing::debug!(limiter = policy.name(), %err, "storage failed, rejecting");
                Decision::new(
                    false,
                    policy.name(),
                    limit,
                    0,
                    now + window,
                    window.div_ceil(1_000),
                )
                .with_reason("Rate limiter unavailable")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::WindowUnit;
    use crate::storage::breaker::BreakerState;
    use crate::storage::{InMemoryStorage, ManualClock};
    use crate::throttle::{ThrottleConfig, ThrottleStrategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FailingStorage;

    #[async_trait]
    impl AdmissionStorage for FailingStorage {
        fn current_time_millis(&self) -> u64 {
            5_000
        }

        async fn try_acquire_permits(
            &self,
            _key: &str,
            _policy: &Policy,
            _permits: u64,
            _now_millis: u64,
        ) -> Result<bool, LimiterError> {
            Err(LimiterError::StorageUnavailable("backend down".into()))
        }

        async fn reset(&self, _key: &str) {}

        async fn state(&self, _key: &str) -> Option<StateSnapshot> {
            None
        }

        fn diagnostics(&self) -> serde_json::Map<String, serde_json::Value> {
            serde_json::Map::new()
        }

        fn is_healthy(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingSink {
        allows: AtomicU64,
        denies: AtomicU64,
        errors: AtomicU64,
        fallbacks: AtomicU64,
    }

    impl MetricsSink for CountingSink {
        fn record_allow(&self, _: &str) {
            self.allows.fetch_add(1, Ordering::SeqCst);
        }
        fn record_deny(&self, _: &str) {
            self.denies.fetch_add(1, Ordering::SeqCst);
        }
        fn record_error(&self, _: &str, _: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn record_latency(&self, _: &str, _: f64) {}
        fn record_fallback(&self, _: &str, _: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
        fn record_circuit_breaker_state_change(&self, _: &str, _: BreakerState) {}
        fn record_usage(&self, _: &str, _: f64, _: u64) {}
    }

    struct PanickyResolver;

    impl KeyResolver for PanickyResolver {
        fn resolve_key(&self, _: &RequestContext) -> Result<Option<String>, LimiterError> {
            Err(LimiterError::KeyResolutionFailure("boom".into()))
        }
    }

    fn bucket_policy(strategy: FailStrategy) -> Policy {
        Policy::builder("api")
            .algorithm(Algorithm::TokenBucket)
            .requests(10)
            .window(2, WindowUnit::Seconds)
            .fail_strategy(strategy)
            .build()
            .unwrap()
    }

    fn engine_with_memory(clock_millis: u64) -> AdmissionEngine {
        let clock = Arc::new(ManualClock::at(clock_millis));
        let storage = Arc::new(InMemoryStorage::with_clock(clock));
        AdmissionEngine::new(storage, Arc::new(RemoteAddressKeyResolver))
    }

    fn ctx(addr: &str) -> RequestContext {
        RequestContext::builder().remote_address(addr).build()
    }

    #[tokio::test]
    async fn test_admits_and_reports_decision_fields() {
        let engine = engine_with_memory(1_000);
        let policy = bucket_policy(FailStrategy::FailOpen);

        let decision = engine.try_acquire(&ctx("10.1.1.1"), &policy).await;
        assert!(decision.allowed());
        assert_eq!(decision.limiter_name(), "api");
        assert_eq!(decision.limit(), 10);
        assert_eq!(decision.remaining(), 9);
        assert_eq!(decision.retry_after_seconds(), 0);
        // One consumed token at requests/window = 0.005/ms: 200ms to full.
        assert_eq!(decision.reset_time_millis(), 1_200);
    }

    #[tokio::test]
    async fn test_denial_carries_retry_after() {
        let engine = engine_with_memory(1_000);
        let policy = bucket_policy(FailStrategy::FailOpen);

        for _ in 0..10 {
            assert!(engine.try_acquire(&ctx("k"), &policy).await.allowed());
        }
        let decision = engine.try_acquire(&ctx("k"), &policy).await;
        assert!(!decision.allowed());
        assert_eq!(decision.remaining(), 0);
        // Empty bucket, 2s to refill, rounded up.
        assert_eq!(decision.retry_after_seconds(), 2);
    }

    #[tokio::test]
    async fn test_fail_open_admits_with_reason_and_one_fallback_metric() {
        let sink = Arc::new(CountingSink::default());
        let engine = AdmissionEngine::new(
            Arc::new(FailingStorage),
            Arc::new(RemoteAddressKeyResolver),
        )
        .with_metrics(sink.clone())
        .with_environment(Environment::Other);
        let policy = bucket_policy(FailStrategy::FailOpen);

        for _ in 0..100 {
            let decision = engine.try_acquire(&ctx("k"), &policy).await;
            assert!(decision.allowed());
            assert!(decision.reason().unwrap().starts_with("fail-open:"));
            assert!(decision.reason().unwrap().contains("backend down"));
        }
        assert_eq!(sink.fallbacks.load(Ordering::SeqCst), 100);
        assert_eq!(sink.allows.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_with_fixed_reason() {
        let sink = Arc::new(CountingSink::default());
        let engine = AdmissionEngine::new(
            Arc::new(FailingStorage),
            Arc::new(RemoteAddressKeyResolver),
        )
        .with_metrics(sink.clone());
        let policy = bucket_policy(FailStrategy::FailClosed);

        let decision = engine.try_acquire(&ctx("k"), &policy).await;
        assert!(!decision.allowed());
        assert_eq!(decision.reason(), Some("Rate limiter unavailable"));
        assert_eq!(sink.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(sink.denies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_production_scrubs_fail_open_detail() {
        let engine = AdmissionEngine::new(
            Arc::new(FailingStorage),
            Arc::new(RemoteAddressKeyResolver),
        )
        .with_environment(Environment::Production);
        let policy = bucket_policy(FailStrategy::FailOpen);

        let decision = engine.try_acquire(&ctx("k"), &policy).await;
        assert_eq!(decision.reason(), Some("fail-open:storage unavailable"));
    }

    #[tokio::test]
    async fn test_resolver_failure_uses_anonymous_key() {
        let sink = Arc::new(CountingSink::default());
        let clock = Arc::new(ManualClock::at(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock));
        let engine = AdmissionEngine::new(storage.clone(), Arc::new(PanickyResolver))
            .with_metrics(sink.clone());
        let policy = bucket_policy(FailStrategy::FailOpen);

        let decision = engine.try_acquire(&ctx("ignored"), &policy).await;
        assert!(decision.allowed());
        assert_eq!(sink.errors.load(Ordering::SeqCst), 1);
        assert!(storage.state(ANONYMOUS_KEY).await.is_some());
    }

    #[tokio::test]
    async fn test_empty_resolution_uses_anonymous_key() {
        struct EmptyResolver;
        impl KeyResolver for EmptyResolver {
            fn resolve_key(&self, _: &RequestContext) -> Result<Option<String>, LimiterError> {
                Ok(None)
            }
        }

        let storage = Arc::new(InMemoryStorage::new());
        let engine = AdmissionEngine::new(storage.clone(), Arc::new(EmptyResolver));
        let policy = bucket_policy(FailStrategy::FailOpen);

        assert!(engine.try_acquire(&ctx("x"), &policy).await.allowed());
        assert!(storage.state(ANONYMOUS_KEY).await.is_some());
    }

    #[tokio::test]
    async fn test_throttle_annotation_past_soft_limit() {
        let clock = Arc::new(ManualClock::at(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock));
        let engine = AdmissionEngine::new(storage, Arc::new(FixedKeyResolver("g".into())));

        let policy = Policy::builder("throttled")
            .algorithm(Algorithm::TokenBucket)
            .requests(10)
            .window(10, WindowUnit::Seconds)
            .throttle(ThrottleConfig::new(2.0, 10.0, 800, ThrottleStrategy::Linear).unwrap())
            .build()
            .unwrap();

        // Usage 1 and 2: at or below soft, no hint.
        assert!(engine
            .try_acquire(&ctx("x"), &policy)
            .await
            .delay_millis()
            .is_none());
        assert!(engine
            .try_acquire(&ctx("x"), &policy)
            .await
            .delay_millis()
            .is_none());
        // Usage 3: (3-2)/(10-2) × 800 = 100.
        assert_eq!(
            engine.try_acquire(&ctx("x"), &policy).await.delay_millis(),
            Some(100)
        );
    }

    #[tokio::test]
    async fn test_sliding_window_remaining_comes_from_policy_not_sentinel() {
        let clock = Arc::new(ManualClock::at(0));
        let storage = Arc::new(InMemoryStorage::with_clock(clock));
        let engine = AdmissionEngine::new(storage, Arc::new(FixedKeyResolver("w".into())));
        let policy = Policy::builder("sw")
            .algorithm(Algorithm::SlidingWindow)
            .requests(10)
            .window(10, WindowUnit::Seconds)
            .build()
            .unwrap();

        let decision = engine.try_acquire(&ctx("x"), &policy).await;
        assert!(decision.allowed());
        assert_eq!(decision.limit(), 10);
        assert_eq!(decision.remaining(), 9);
        assert_eq!(decision.reset_time_millis(), 10_000);
    }
}
