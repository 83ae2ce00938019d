pub mod types;


pub use types::*;

use crate::audit::AuditSink;
use crate::policy::Policy;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

impl LimiterSettings {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used; the limiter starts with zero configuration for local
    /// development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: LimiterSettings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            LimiterSettings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        tracing::info!(
            policies = settings.policies.len(),
            "loaded limiter configuration"
        );
        Ok(settings)
    }

    /// Environment variable overrides for infrastructure knobs. Policies are
    /// file/registry-managed only, never patched from the environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LIMITGATE_TRUSTED_HOPS") {
            match v.parse() {
                Ok(hops) => self.proxy.trusted_hops = hops,
                Err(_) => tracing::warn!("ignoring invalid LIMITGATE_TRUSTED_HOPS: {}", v),
            }
        }
        if let Ok(v) = std::env::var("LIMITGATE_TRUSTED_CIDRS") {
            self.proxy.trusted_cidrs = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("LIMITGATE_BREAKER_FAILURE_THRESHOLD") {
            match v.parse() {
                Ok(t) => self.breaker.failure_threshold = t,
                Err(_) => {
                    tracing::warn!("ignoring invalid LIMITGATE_BREAKER_FAILURE_THRESHOLD: {}", v)
                }
            }
        }
        if let Ok(v) = std::env::var("LIMITGATE_BREAKER_HALF_OPEN_TIMEOUT_MS") {
            match v.parse() {
                Ok(t) => self.breaker.base_half_open_timeout_millis = t,
                Err(_) => {
                    tracing::warn!("ignoring invalid LIMITGATE_BREAKER_HALF_OPEN_TIMEOUT_MS: {}", v)
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for policy in &self.policies {
            policy
                .build()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        self.proxy.build()?;
        if self.breaker.failure_threshold <= 0.0 || self.breaker.failure_threshold >= 1.0 {
            anyhow::bail!(
                "breaker failure_threshold must be in (0, 1), got {}",
                self.breaker.failure_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.breaker.jitter_factor) {
            anyhow::bail!(
                "breaker jitter_factor must be in [0, 1], got {}",
                self.breaker.jitter_factor
            );
        }
        if self.breaker.max_concurrent_probes == 0 {
            anyhow::bail!("breaker max_concurrent_probes must be >= 1");
        }
        Ok(())
    }

    /// Build every declared policy, keyed by name.
    pub fn build_policies(&self) -> Result<HashMap<String, Arc<Policy>>> {
        let mut policies = HashMap::with_capacity(self.policies.len());
        for settings in &self.policies {
            let policy = settings
                .build()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if policies
                .insert(settings.name.clone(), Arc::new(policy))
                .is_some()
            {
                anyhow::bail!("duplicate policy name '{}'", settings.name);
            }
        }
        Ok(policies)
    }
}

/// Hot-swappable set of active policies.
///
/// Lookups read an atomically swapped snapshot, so a reload never blocks the
/// decision path; `replace_all` installs a complete new set and leaves an
/// audit trail of the change.
pub struct PolicyRegistry {
    policies: ArcSwap<HashMap<String, Arc<Policy>>>,
    audit: Arc<dyn AuditSink>,
}

impl PolicyRegistry {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            policies: ArcSwap::from_pointee(HashMap::new()),
            audit,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.load().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.load().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.policies.load().keys().cloned().collect()
    }

    /// Atomically replace the whole policy set.
    pub fn replace_all(&self, policies: HashMap<String, Arc<Policy>>) {
        let count = policies.len();
        self.policies.store(Arc::new(policies));
        tracing::info!(policies = count, "policy set replaced");
        self.audit
            .config_changed(&format!("policy set replaced, {} policies active", count));
    }
}
