use crate::policy::Policy;
use serde::Serialize;

/// Outcome of one admission attempt. Produced once by the engine and
/// immutable afterwards; everything a transport layer needs to answer the
/// caller (including standard rate-limit headers) is on here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    allowed: bool,
    limiter_name: String,
    limit: u64,
    remaining: u64,
    reset_time_millis: u64,
    retry_after_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    delay_millis: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem_detail: Option<serde_json::Value>,
}

impl Decision {
    pub fn new(
        allowed: bool,
        limiter_name: impl Into<String>,
        limit: u64,
        remaining: u64,
        reset_time_millis: u64,
        retry_after_seconds: u64,
    ) -> Self {
        Self {
            allowed,
            limiter_name: limiter_name.into(),
            limit,
            remaining,
            reset_time_millis,
            retry_after_seconds,
            delay_millis: None,
            reason: None,
            problem_detail: None,
        }
    }

    pub fn with_delay_millis(mut self, delay_millis: u64) -> Self {
        self.delay_millis = Some(delay_millis);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Opaque payload for hosts that emit problem-detail responses.
    pub fn with_problem_detail(mut self, detail: serde_json::Value) -> Self {
        self.problem_detail = Some(detail);
        self
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn limiter_name(&self) -> &str {
        &self.limiter_name
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Absolute epoch milliseconds at which the quota is fully restored.
    pub fn reset_time_millis(&self) -> u64 {
        self.reset_time_millis
    }

    /// Whole seconds to wait before retrying; zero when admitted.
    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after_seconds
    }

    /// Advisory adaptive-throttle delay; the engine never sleeps on it.
    pub fn delay_millis(&self) -> Option<u64> {
        self.delay_millis
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn problem_detail(&self) -> Option<&serde_json::Value> {
        self.problem_detail.as_ref()
    }

    /// Standard response headers for transports that forward the decision:
    /// `X-RateLimit-*` plus `RateLimit-Policy`, and `Retry-After` on denial.
    pub fn transport_headers(&self, policy: &Policy) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            (
                "X-RateLimit-Reset",
                (self.reset_time_millis / 1_000).to_string(),
            ),
            (
                "RateLimit-Policy",
                format!("{};w={}", self.limit, policy.window_millis() / 1_000),
            ),
        ];
        if !self.allowed {
            headers.push(("Retry-After", self.retry_after_seconds.to_string()));
        }
        headers
    }
}
