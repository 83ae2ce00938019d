use std::fmt;

/// Deployment environment, consulted when rendering storage failures to
/// callers. In production the internal detail (connection strings, backend
/// error text) is replaced with a generic wording; the admission decision
/// itself is never affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Other,
}

impl Environment {
    /// Resolve from the `ENVIRONMENT` process variable. Hosts that prefer
    /// explicit configuration can pass a variant directly instead.
    pub fn from_env() -> Self {
        match std::env::var("ENVIRONMENT") {
            Ok(v) if v.eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Other,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    /// The key resolver failed. The engine substitutes the anonymous key and
    /// continues; this never fails a request on its own.
    KeyResolutionFailure(String),
    /// A storage operation failed. The engine maps this through the policy's
    /// fail strategy.
    StorageUnavailable(String),
    /// The request can never be satisfied under the declared policy
    /// (e.g. more permits than the bucket capacity). Surfaced as a deny.
    StorageExceeded(String),
    /// Rejected at policy construction time. The only error kind that
    /// escapes to callers.
    PolicyInvalid(String),
    /// Internal signal from the tiered store; routed to the fallback rule,
    /// never surfaced to callers.
    CircuitBreakerOpen,
}

impl LimiterError {
    /// Message safe to show outside the process. Storage details are
    /// scrubbed in production.
    pub fn public_message(&self, env: Environment) -> String {
        match self {
            LimiterError::StorageUnavailable(detail) if !env.is_production() => {
                format!("storage unavailable: {}", detail)
            }
            LimiterError::StorageUnavailable(_) => "storage unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterError::KeyResolutionFailure(msg) => write!(f, "key resolution failed: {}", msg),
            LimiterError::StorageUnavailable(msg) => write!(f, "storage unavailable: {}", msg),
            LimiterError::StorageExceeded(msg) => write!(f, "storage exceeded: {}", msg),
            LimiterError::PolicyInvalid(msg) => write!(f, "invalid policy: {}", msg),
            LimiterError::CircuitBreakerOpen => write!(f, "circuit breaker open"),
        }
    }
}

impl std::error::Error for LimiterError {}
