//! Request-admission core: decides, per request, whether to admit or reject
//! under a declared policy.
//!
//! The pieces, bottom up:
//!
//! - [`algorithm`]: pure kernels (token bucket, sliding window, fixed
//!   window) mapping `(old state, now, params)` to a new state and a
//!   verdict;
//! - [`storage`]: the [`storage::AdmissionStorage`] contract with an
//!   in-process implementation, plus a primary/secondary
//!   [`storage::TieredStorage`] guarded by a jittered circuit breaker;
//! - [`engine`]: the [`engine::AdmissionEngine`] orchestrating key
//!   resolution, the atomic storage transition, fail-open/fail-closed
//!   handling and [`decision::Decision`] assembly;
//! - [`throttle`]: the stateless adaptive-delay calculator;
//! - [`proxy`]: trusted-proxy client-IP resolution;
//! - [`config`]: file/env configuration and the hot-swappable policy
//!   registry; [`metrics`] and [`audit`] carry observation contracts.
//!
//! Admission is non-blocking and all-or-nothing: nothing in this crate
//! sleeps or queues, and any adaptive delay is returned as a hint on the
//! decision. Per-key transitions are linearizable within one storage
//! instance; disjoint keys proceed in parallel.

pub mod algorithm;
pub mod audit;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod proxy;
pub mod storage;
pub mod throttle;

pub use audit::{AuditSink, NoopAuditSink, TracingAuditSink};
pub use decision::Decision;
pub use engine::{AdmissionEngine, FixedKeyResolver, KeyResolver, RemoteAddressKeyResolver, ANONYMOUS_KEY};
pub use error::{Environment, LimiterError};
pub use metrics::{MetricsSink, NoopMetricsSink, RecorderSink};
pub use policy::{Algorithm, FailStrategy, Policy, PolicyBuilder, RequestContext, WindowUnit};
pub use proxy::TrustedProxyResolver;
pub use storage::{
    AdmissionStorage, BreakerState, CircuitBreaker, CircuitBreakerConfig, Clock, InMemoryStorage,
    ManualClock, StateSnapshot, SystemClock, TieredStorage,
};
pub use throttle::{ThrottleConfig, ThrottleStrategy};
