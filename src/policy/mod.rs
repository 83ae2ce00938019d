pub mod context;

pub use context::RequestContext;

use crate::error::LimiterError;
use crate::throttle::ThrottleConfig;
use serde::{Deserialize, Serialize};

/// Admission algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

/// What the engine does when storage is unavailable: admit everything or
/// reject everything until the store recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailStrategy {
    FailOpen,
    FailClosed,
}

/// Unit of the declared window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowUnit {
    Millis,
    Seconds,
    Minutes,
    Hours,
}

impl WindowUnit {
    fn millis(self) -> u64 {
        match self {
            WindowUnit::Millis => 1,
            WindowUnit::Seconds => 1_000,
            WindowUnit::Minutes => 60_000,
            WindowUnit::Hours => 3_600_000,
        }
    }
}

/// Immutable admission policy. Built through [`PolicyBuilder`], which is the
/// only place validation happens: a constructed `Policy` is always
/// internally consistent and freely shareable across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    name: String,
    algorithm: Algorithm,
    requests: u64,
    window_millis: u64,
    fail_strategy: FailStrategy,
    capacity: u64,
    refill_rate_per_milli: f64,
    throttle: Option<ThrottleConfig>,
}

impl Policy {
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Declared request budget per window.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn window_millis(&self) -> u64 {
        self.window_millis
    }

    pub fn fail_strategy(&self) -> FailStrategy {
        self.fail_strategy
    }

    /// Token-bucket capacity. Equals `requests` unless overridden.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Token-bucket refill rate in tokens per millisecond.
    pub fn refill_rate_per_milli(&self) -> f64 {
        self.refill_rate_per_milli
    }

    pub fn throttle(&self) -> Option<&ThrottleConfig> {
        self.throttle.as_ref()
    }

    /// Advisory retention for per-key state in remote stores: twice the
    /// window, in whole seconds, saturating on overflow.
    pub fn ttl_seconds(&self) -> u64 {
        (self.window_millis / 1_000).max(1).saturating_mul(2)
    }
}

/// Builder for [`Policy`]. `build` is the single validation point and the
/// only producer of `LimiterError::PolicyInvalid`.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    name: String,
    algorithm: Algorithm,
    requests: u64,
    window: u64,
    window_unit: WindowUnit,
    fail_strategy: FailStrategy,
    capacity: Option<u64>,
    refill_rate_per_milli: Option<f64>,
    throttle: Option<ThrottleConfig>,
}

impl PolicyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            algorithm: Algorithm::TokenBucket,
            requests: 0,
            window: 1,
            window_unit: WindowUnit::Seconds,
            fail_strategy: FailStrategy::FailOpen,
            capacity: None,
            refill_rate_per_milli: None,
            throttle: None,
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn requests(mut self, requests: u64) -> Self {
        self.requests = requests;
        self
    }

    pub fn window(mut self, window: u64, unit: WindowUnit) -> Self {
        self.window = window;
        self.window_unit = unit;
        self
    }

    pub fn fail_strategy(mut self, strategy: FailStrategy) -> Self {
        self.fail_strategy = strategy;
        self
    }

    /// Token-bucket burst capacity. Defaults to `requests`.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Token-bucket refill rate in tokens per millisecond. Defaults to
    /// `requests / window_millis`.
    pub fn refill_rate_per_milli(mut self, rate: f64) -> Self {
        self.refill_rate_per_milli = Some(rate);
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn build(self) -> Result<Policy, LimiterError> {
        if self.name.is_empty() {
            return Err(LimiterError::PolicyInvalid("name must not be empty".into()));
        }
        if self.requests == 0 {
            return Err(LimiterError::PolicyInvalid(format!(
                "policy '{}': requests must be >= 1",
                self.name
            )));
        }
        if self.window == 0 {
            return Err(LimiterError::PolicyInvalid(format!(
                "policy '{}': window must be > 0",
                self.name
            )));
        }
        let window_millis = self.window.saturating_mul(self.window_unit.millis());

        // Window-based algorithms need a window of at least one second; the
        // token bucket may run on shorter refill intervals.
        match self.algorithm {
            Algorithm::SlidingWindow | Algorithm::FixedWindow if window_millis < 1_000 => {
                return Err(LimiterError::PolicyInvalid(format!(
                    "policy '{}': window must be >= 1s for windowed algorithms, got {}ms",
                    self.name, window_millis
                )));
            }
            _ => {}
        }

        let capacity = self.capacity.unwrap_or(self.requests);
        let refill_rate_per_milli = self
            .refill_rate_per_milli
            .unwrap_or(self.requests as f64 / window_millis as f64);

        if self.algorithm == Algorithm::TokenBucket {
            if capacity == 0 {
                return Err(LimiterError::PolicyInvalid(format!(
                    "policy '{}': capacity must be > 0",
                    self.name
                )));
            }
            if refill_rate_per_milli <= 0.0 || !refill_rate_per_milli.is_finite() {
                return Err(LimiterError::PolicyInvalid(format!(
                    "policy '{}': refill rate must be > 0, got {}",
                    self.name, refill_rate_per_milli
                )));
            }
        }

        Ok(Policy {
            name: self.name,
            algorithm: self.algorithm,
            requests: self.requests,
            window_millis,
            fail_strategy: self.fail_strategy,
            capacity,
            refill_rate_per_milli,
            throttle: self.throttle,
        })
    }
}
