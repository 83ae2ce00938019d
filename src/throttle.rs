use crate::error::LimiterError;
use serde::{Deserialize, Serialize};

/// Shape of the delay curve between the soft and hard limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleStrategy {
    Linear,
    Exponential,
}

/// Stateless delay calculator for adaptive throttling.
///
/// Below the soft limit the delay is zero; at or above the hard limit it is
/// `max_delay_millis`; in between it follows the configured curve over
/// `ratio = (usage − soft)/(hard − soft)`. The engine only ever attaches the
/// result to a decision as a hint; nothing in the core sleeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    soft_limit: f64,
    hard_limit: f64,
    max_delay_millis: u64,
    strategy: ThrottleStrategy,
}

impl ThrottleConfig {
    pub fn new(
        soft_limit: f64,
        hard_limit: f64,
        max_delay_millis: u64,
        strategy: ThrottleStrategy,
    ) -> Result<Self, LimiterError> {
        if soft_limit < 0.0 || !soft_limit.is_finite() || !hard_limit.is_finite() {
            return Err(LimiterError::PolicyInvalid(
                "throttle limits must be finite and non-negative".to_string(),
            ));
        }
        if soft_limit >= hard_limit {
            return Err(LimiterError::PolicyInvalid(format!(
                "throttle soft limit {} must be below hard limit {}",
                soft_limit, hard_limit
            )));
        }
        if max_delay_millis == 0 {
            return Err(LimiterError::PolicyInvalid(
                "throttle max delay must be > 0".to_string(),
            ));
        }
        Ok(Self {
            soft_limit,
            hard_limit,
            max_delay_millis,
            strategy,
        })
    }

    pub fn soft_limit(&self) -> f64 {
        self.soft_limit
    }

    pub fn hard_limit(&self) -> f64 {
        self.hard_limit
    }

    pub fn max_delay_millis(&self) -> u64 {
        self.max_delay_millis
    }

    pub fn strategy(&self) -> ThrottleStrategy {
        self.strategy
    }

    /// Advisory delay for the given usage, in `[0, max_delay_millis]`.
    pub fn delay_millis(&self, current_usage: f64) -> u64 {
        let ratio = ((current_usage - self.soft_limit) / (self.hard_limit - self.soft_limit))
            .clamp(0.0, 1.0);
        let scaled = match self.strategy {
            ThrottleStrategy::Linear => ratio,
            ThrottleStrategy::Exponential => ratio * ratio,
        };
        (scaled * self.max_delay_millis as f64).round() as u64
    }

    /// Usage strictly between the soft and hard limits.
    pub fn should_throttle(&self, current_usage: f64) -> bool {
        current_usage > self.soft_limit && current_usage < self.hard_limit
    }

    /// Usage at or past the hard limit.
    pub fn should_block(&self, current_usage: f64) -> bool {
        current_usage >= self.hard_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> ThrottleConfig {
        ThrottleConfig::new(100.0, 200.0, 1_000, ThrottleStrategy::Linear).unwrap()
    }

    fn exponential() -> ThrottleConfig {
        ThrottleConfig::new(100.0, 200.0, 1_000, ThrottleStrategy::Exponential).unwrap()
    }

    #[test]
    fn test_zero_at_soft_and_max_at_hard() {
        for cfg in [linear(), exponential()] {
            assert_eq!(cfg.delay_millis(0.0), 0);
            assert_eq!(cfg.delay_millis(100.0), 0);
            assert_eq!(cfg.delay_millis(200.0), 1_000);
            assert_eq!(cfg.delay_millis(10_000.0), 1_000);
        }
    }

    #[test]
    fn test_linear_strictly_increases_between_limits() {
        let cfg = linear();
        let mut last = 0;
        for usage in [110.0, 130.0, 150.0, 170.0, 190.0] {
            let delay = cfg.delay_millis(usage);
            assert!(delay > last, "delay({}) = {} not increasing", usage, delay);
            last = delay;
        }
    }

    #[test]
    fn test_exponential_is_convex_and_below_linear() {
        let lin = linear();
        let exp = exponential();
        for usage in [110.0, 125.0, 150.0, 175.0, 190.0] {
            assert!(exp.delay_millis(usage) <= lin.delay_millis(usage));
        }
        // Midpoint: 0.5² = 0.25 of max.
        assert_eq!(exp.delay_millis(150.0), 250);
        assert_eq!(lin.delay_millis(150.0), 500);
    }

    #[test]
    fn test_throttle_and_block_boundaries() {
        let cfg = linear();
        assert!(!cfg.should_throttle(100.0));
        assert!(cfg.should_throttle(150.0));
        assert!(!cfg.should_throttle(200.0));
        assert!(!cfg.should_block(199.9));
        assert!(cfg.should_block(200.0));
        assert!(cfg.should_block(250.0));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(ThrottleConfig::new(200.0, 100.0, 1_000, ThrottleStrategy::Linear).is_err());
        assert!(ThrottleConfig::new(100.0, 100.0, 1_000, ThrottleStrategy::Linear).is_err());
        assert!(ThrottleConfig::new(-1.0, 100.0, 1_000, ThrottleStrategy::Linear).is_err());
        assert!(ThrottleConfig::new(0.0, 100.0, 0, ThrottleStrategy::Linear).is_err());
    }
}
