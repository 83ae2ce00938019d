/// Append-only audit trail of limiter activity. Three event kinds:
/// configuration changes, enforcement outcomes, and system failures.
/// Delivery is best-effort: implementations swallow their own errors and
/// never push anything back into the decision path.
pub trait AuditSink: Send + Sync {
    fn config_changed(&self, detail: &str);
    /// Enforcement outcome for one request. `masked_key` is already
    /// redacted via [`mask_key`]; sinks must not receive raw keys.
    fn enforcement(&self, limiter: &str, masked_key: &str, allowed: bool);
    fn system_failure(&self, limiter: &str, detail: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn config_changed(&self, _detail: &str) {}
    fn enforcement(&self, _limiter: &str, _masked_key: &str, _allowed: bool) {}
    fn system_failure(&self, _limiter: &str, _detail: &str) {}
}

/// Writes audit events to the `limitgate::audit` tracing target, one line
/// per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn config_changed(&self, detail: &str) {
        tracing::info!(target: "limitgate::audit", event = "config_change", detail);
    }

    fn enforcement(&self, limiter: &str, masked_key: &str, allowed: bool) {
        tracing::info!(
            target: "limitgate::audit",
            event = "enforcement",
            limiter,
            key = masked_key,
            allowed
        );
    }

    fn system_failure(&self, limiter: &str, detail: &str) {
        tracing::warn!(
            target: "limitgate::audit",
            event = "system_failure",
            limiter,
            detail
        );
    }
}

/// Redact an admission key for audit output: the first four characters stay
/// visible, the rest collapses to a fixed-width mask so neither the content
/// nor the length of the key leaks.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 4 {
        return "****".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    format!("{}****", prefix)
}
