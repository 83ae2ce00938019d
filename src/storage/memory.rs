use crate::algorithm::{fixed_window, sliding_window, token_bucket};
use crate::algorithm::{
    FixedWindowParams, FixedWindowState, SlidingWindowParams, SlidingWindowState,
    TokenBucketParams, TokenBucketState,
};
use crate::error::LimiterError;
use crate::policy::{Algorithm, Policy};
use crate::storage::{AdmissionStorage, Clock, StateSnapshot, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshots of sliding-window entries report this placeholder limit: the
/// entry itself does not record the policy's limit, which is only known at
/// admission time. Callers that need the true limit should derive it from
/// the policy, not from the snapshot.
pub const SLIDING_WINDOW_SNAPSHOT_LIMIT: u64 = 100;

/// In-process state store.
///
/// One concurrent map per algorithm, each entry an `Arc<tokio::sync::Mutex>`
/// around the kernel state: the read-kernel-write transition runs entirely
/// inside the per-key lock, so a burst of concurrent callers on one key
/// serializes there while disjoint keys proceed on separate shard locks.
/// A `tokio` mutex (not a CAS loop) keeps contended waiters parked on the
/// runtime instead of spinning, and avoids the lost-refill hazard of
/// CAS-on-timestamp designs.
///
/// TTL from the policy is advisory here; entries are not swept in the
/// background; pruning is a deferred concern for large key populations.
pub struct InMemoryStorage {
    token_buckets: DashMap<String, Arc<Mutex<BucketEntry>>>,
    sliding_windows: DashMap<String, Arc<Mutex<WindowEntry>>>,
    fixed_windows: DashMap<String, Arc<Mutex<FixedEntry>>>,
    clock: Arc<dyn Clock>,
}

/// Bucket state plus the parameters it was last driven with, kept so
/// snapshots can be computed without a policy at hand.
struct BucketEntry {
    state: TokenBucketState,
    params: TokenBucketParams,
}

struct WindowEntry {
    state: SlidingWindowState,
    window_millis: u64,
}

struct FixedEntry {
    state: FixedWindowState,
    params: FixedWindowParams,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            token_buckets: DashMap::new(),
            sliding_windows: DashMap::new(),
            fixed_windows: DashMap::new(),
            clock,
        }
    }

    /// Number of keys with live state across all algorithms.
    pub fn state_count(&self) -> usize {
        self.token_buckets.len() + self.sliding_windows.len() + self.fixed_windows.len()
    }

    async fn acquire_token_bucket(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        let params = TokenBucketParams::from_policy(policy);

        // Fast path: key already exists, no allocation.
        let entry = if let Some(e) = self.token_buckets.get(key) {
            e.value().clone()
        } else {
            self.token_buckets
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(BucketEntry {
                        state: TokenBucketState {
                            tokens: params.capacity as f64,
                            last_refill_millis: now_millis,
                        },
                        params,
                    }))
                })
                .clone()
        };

        let mut guard = entry.lock().await;
        let outcome = token_bucket::consume(Some(guard.state), params, permits, now_millis)?;
        // Persisted on admit and deny alike; the deny path carries the
        // observed refill forward.
        guard.state = outcome.state;
        guard.params = params;
        Ok(outcome.allowed)
    }

    async fn acquire_sliding_window(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        let params = SlidingWindowParams::from_policy(policy);

        let entry = if let Some(e) = self.sliding_windows.get(key) {
            e.value().clone()
        } else {
            self.sliding_windows
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(WindowEntry {
                        state: SlidingWindowState {
                            current: sliding_window::WindowBucket {
                                start_millis: (now_millis / params.window_millis)
                                    * params.window_millis,
                                count: 0,
                            },
                            previous: None,
                        },
                        window_millis: params.window_millis,
                    }))
                })
                .clone()
        };

        let mut guard = entry.lock().await;
        let outcome = sliding_window::check(Some(guard.state), params, now_millis);
        guard.state = outcome.state;
        guard.window_millis = params.window_millis;
        Ok(outcome.allowed)
    }

    async fn acquire_fixed_window(
        &self,
        key: &str,
        policy: &Policy,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        let params = FixedWindowParams::from_policy(policy);

        let entry = if let Some(e) = self.fixed_windows.get(key) {
            e.value().clone()
        } else {
            self.fixed_windows
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(FixedEntry {
                        state: FixedWindowState {
                            window_number: now_millis / params.window_millis,
                            count: 0,
                        },
                        params,
                    }))
                })
                .clone()
        };

        let mut guard = entry.lock().await;
        let outcome = fixed_window::check(Some(guard.state), params, now_millis);
        guard.state = outcome.state;
        guard.params = params;
        Ok(outcome.allowed)
    }
}

#[async_trait]
impl AdmissionStorage for InMemoryStorage {
    fn current_time_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    async fn try_acquire_permits(
        &self,
        key: &str,
        policy: &Policy,
        permits: u64,
        now_millis: u64,
    ) -> Result<bool, LimiterError> {
        match policy.algorithm() {
            Algorithm::TokenBucket => {
                self.acquire_token_bucket(key, policy, permits, now_millis)
                    .await
            }
            Algorithm::SlidingWindow | Algorithm::FixedWindow if permits != 1 => {
                Err(LimiterError::StorageExceeded(format!(
                    "windowed algorithms admit one permit per call, got {}",
                    permits
                )))
            }
            Algorithm::SlidingWindow => self.acquire_sliding_window(key, policy, now_millis).await,
            Algorithm::FixedWindow => self.acquire_fixed_window(key, policy, now_millis).await,
        }
    }

    async fn reset(&self, key: &str) {
        self.token_buckets.remove(key);
        self.sliding_windows.remove(key);
        self.fixed_windows.remove(key);
    }

    /// Looks the key up across all three algorithm maps.
    ///
    /// Sliding-window snapshots report [`SLIDING_WINDOW_SNAPSHOT_LIMIT`] as
    /// their limit; query by policy when the true limit matters.
    async fn state(&self, key: &str) -> Option<StateSnapshot> {
        let now = self.clock.now_millis();

        if let Some(entry) = self.token_buckets.get(key) {
            let guard = entry.value().lock().await;
            let usage = token_bucket::current_usage(&guard.state, guard.params);
            return Some(StateSnapshot {
                limit: guard.params.capacity,
                remaining: guard.state.tokens.floor().max(0.0) as u64,
                reset_millis: token_bucket::reset_at(&guard.state, guard.params, now),
                current_usage: usage,
            });
        }

        if let Some(entry) = self.sliding_windows.get(key) {
            let guard = entry.value().lock().await;
            let params = SlidingWindowParams {
                limit: SLIDING_WINDOW_SNAPSHOT_LIMIT,
                window_millis: guard.window_millis,
            };
            let current = guard.state.current;
            let elapsed = now.saturating_sub(current.start_millis).min(guard.window_millis);
            let overlap = (guard.window_millis - elapsed) as f64 / guard.window_millis as f64;
            let estimate =
                guard.state.previous.map_or(0, |p| p.count) as f64 * overlap + current.count as f64;
            return Some(StateSnapshot {
                limit: SLIDING_WINDOW_SNAPSHOT_LIMIT,
                remaining: SLIDING_WINDOW_SNAPSHOT_LIMIT.saturating_sub(estimate.ceil() as u64),
                reset_millis: sliding_window::reset_at(&guard.state, params),
                current_usage: estimate,
            });
        }

        if let Some(entry) = self.fixed_windows.get(key) {
            let guard = entry.value().lock().await;
            return Some(StateSnapshot {
                limit: guard.params.limit,
                remaining: guard.params.limit.saturating_sub(guard.state.count),
                reset_millis: fixed_window::reset_at(&guard.state, guard.params),
                current_usage: guard.state.count as f64,
            });
        }

        None
    }

    fn diagnostics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("InMemory"));
        map.insert("healthy".to_string(), json!(true));
        map.insert("states.count".to_string(), json!(self.state_count()));
        map.insert("token_buckets".to_string(), json!(self.token_buckets.len()));
        map.insert(
            "sliding_windows".to_string(),
            json!(self.sliding_windows.len()),
        );
        map.insert("fixed_windows".to_string(), json!(self.fixed_windows.len()));
        map
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
