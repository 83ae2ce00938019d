use crate::error::LimiterError;
use crate::policy::Policy;

/// Token-bucket parameters, extracted from a policy once per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketParams {
    pub capacity: u64,
    /// Tokens added per elapsed millisecond.
    pub refill_rate_per_milli: f64,
}

impl TokenBucketParams {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            capacity: policy.capacity(),
            refill_rate_per_milli: policy.refill_rate_per_milli(),
        }
    }
}

/// Per-key bucket state. Tokens are kept as a real number so fractional
/// refill accrues without drift over the state's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub last_refill_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketOutcome {
    pub allowed: bool,
    pub state: TokenBucketState,
}

/// Lazy-refill consume. Matches the canonical remote consume semantics:
///
/// * missing state starts at `{capacity, now}`;
/// * `available = min(capacity, tokens + elapsed × rate)` with
///   `elapsed = max(0, now − last_refill)` (a clock running backwards
///   contributes nothing);
/// * admit writes `{available − permits, now}`;
/// * deny writes `{available, last_refill}`: the refill is observed but the
///   refill timestamp is not advanced, so the next call keeps accruing from
///   the same base. The caller persists the returned state on both paths.
///
/// `permits > capacity` can never succeed and is reported as
/// `StorageExceeded` rather than a plain deny.
pub fn consume(
    old: Option<TokenBucketState>,
    params: TokenBucketParams,
    permits: u64,
    now_millis: u64,
) -> Result<TokenBucketOutcome, LimiterError> {
    if permits == 0 {
        return Err(LimiterError::PolicyInvalid(
            "permits must be > 0".to_string(),
        ));
    }
    if permits > params.capacity {
        return Err(LimiterError::StorageExceeded(format!(
            "{} permits requested but bucket capacity is {}",
            permits, params.capacity
        )));
    }

    let start = old.unwrap_or(TokenBucketState {
        tokens: params.capacity as f64,
        last_refill_millis: now_millis,
    });

    let elapsed = now_millis.saturating_sub(start.last_refill_millis);
    let available = (start.tokens + elapsed as f64 * params.refill_rate_per_milli)
        .min(params.capacity as f64);

    if available >= permits as f64 {
        Ok(TokenBucketOutcome {
            allowed: true,
            state: TokenBucketState {
                tokens: available - permits as f64,
                last_refill_millis: now_millis,
            },
        })
    } else {
        Ok(TokenBucketOutcome {
            allowed: false,
            state: TokenBucketState {
                tokens: available,
                last_refill_millis: start.last_refill_millis,
            },
        })
    }
}

/// Absolute time at which the bucket is full again.
pub fn reset_at(state: &TokenBucketState, params: TokenBucketParams, now_millis: u64) -> u64 {
    let missing = (params.capacity as f64 - state.tokens).max(0.0);
    now_millis + (missing / params.refill_rate_per_milli).ceil() as u64
}

/// Consumed portion of the bucket, for usage reporting.
pub fn current_usage(state: &TokenBucketState, params: TokenBucketParams) -> f64 {
    (params.capacity as f64 - state.tokens).max(0.0)
}
