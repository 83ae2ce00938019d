use crate::error::LimiterError;
use crate::policy::{Algorithm, FailStrategy, Policy, WindowUnit};
use crate::proxy::TrustedProxyResolver;
use crate::storage::CircuitBreakerConfig;
use crate::throttle::{ThrottleConfig, ThrottleStrategy};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Top-level limiter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterSettings {
    #[serde(default)]
    pub policies: Vec<PolicySettings>,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub proxy: ProxySettings,
}

/// Declarative form of one [`Policy`]; `build` funnels through the policy
/// builder so file-sourced policies get the same validation as programmatic
/// ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    pub name: String,

    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    pub requests: u64,

    #[serde(default = "default_window")]
    pub window: u64,

    #[serde(default = "default_window_unit")]
    pub window_unit: WindowUnit,

    #[serde(default = "default_fail_strategy")]
    pub fail_strategy: FailStrategy,

    /// Token-bucket burst capacity. Defaults to `requests`.
    #[serde(default)]
    pub capacity: Option<u64>,

    /// Token-bucket refill rate in tokens per millisecond. Defaults to
    /// `requests / window`.
    #[serde(default)]
    pub refill_rate_per_milli: Option<f64>,

    #[serde(default)]
    pub throttle: Option<ThrottleSettings>,
}

fn default_algorithm() -> Algorithm {
    Algorithm::TokenBucket
}

fn default_window() -> u64 {
    1
}

fn default_window_unit() -> WindowUnit {
    WindowUnit::Seconds
}

fn default_fail_strategy() -> FailStrategy {
    FailStrategy::FailOpen
}

impl PolicySettings {
    pub fn build(&self) -> Result<Policy, LimiterError> {
        let mut builder = Policy::builder(self.name.clone())
            .algorithm(self.algorithm)
            .requests(self.requests)
            .window(self.window, self.window_unit)
            .fail_strategy(self.fail_strategy);
        if let Some(capacity) = self.capacity {
            builder = builder.capacity(capacity);
        }
        if let Some(rate) = self.refill_rate_per_milli {
            builder = builder.refill_rate_per_milli(rate);
        }
        if let Some(throttle) = &self.throttle {
            builder = builder.throttle(throttle.build()?);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    pub soft_limit: f64,
    pub hard_limit: f64,
    pub max_delay_millis: u64,

    #[serde(default = "default_throttle_strategy")]
    pub strategy: ThrottleStrategy,
}

fn default_throttle_strategy() -> ThrottleStrategy {
    ThrottleStrategy::Linear
}

impl ThrottleSettings {
    pub fn build(&self) -> Result<ThrottleConfig, LimiterError> {
        ThrottleConfig::new(
            self.soft_limit,
            self.hard_limit,
            self.max_delay_millis,
            self.strategy,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    #[serde(default = "default_breaker_window_millis")]
    pub window_millis: u64,

    #[serde(default = "default_half_open_timeout_millis")]
    pub base_half_open_timeout_millis: u64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_millis: default_breaker_window_millis(),
            base_half_open_timeout_millis: default_half_open_timeout_millis(),
            jitter_factor: default_jitter_factor(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_breaker_window_millis() -> u64 {
    10_000
}

fn default_half_open_timeout_millis() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_max_concurrent_probes() -> u32 {
    1
}

impl BreakerSettings {
    pub fn build(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            window_millis: self.window_millis,
            base_half_open_timeout_millis: self.base_half_open_timeout_millis,
            jitter_factor: self.jitter_factor,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_trusted_hops")]
    pub trusted_hops: usize,

    /// CIDR strings; defaults to the loopback ranges.
    #[serde(default = "default_trusted_cidrs")]
    pub trusted_cidrs: Vec<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            trusted_hops: default_trusted_hops(),
            trusted_cidrs: default_trusted_cidrs(),
        }
    }
}

fn default_trusted_hops() -> usize {
    1
}

fn default_trusted_cidrs() -> Vec<String> {
    vec!["127.0.0.0/8".to_string(), "::1/128".to_string()]
}

impl ProxySettings {
    pub fn build(&self) -> anyhow::Result<TrustedProxyResolver> {
        let cidrs = self
            .trusted_cidrs
            .iter()
            .map(|raw| {
                raw.parse::<IpNetwork>()
                    .map_err(|e| anyhow::anyhow!("invalid trusted CIDR '{}': {}", raw, e))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(TrustedProxyResolver::new(self.trusted_hops, cidrs))
    }
}
