use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowParams {
    pub limit: u64,
    pub window_millis: u64,
}

impl SlidingWindowParams {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            limit: policy.requests(),
            window_millis: policy.window_millis(),
        }
    }
}

/// One fixed-width counting bucket aligned to a window boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBucket {
    pub start_millis: u64,
    pub count: u64,
}

/// Two adjacent buckets. When `previous` is present its start is exactly one
/// window before `current.start_millis`; anything older is dropped at
/// rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowState {
    pub current: WindowBucket,
    pub previous: Option<WindowBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowOutcome {
    pub allowed: bool,
    pub state: SlidingWindowState,
    /// Weighted request estimate at decision time (after the increment when
    /// admitted).
    pub estimate: f64,
}

/// Two-bucket weighted check. The previous window's count is blended in
/// proportion to how much of it still overlaps the trailing window:
///
/// ```text
/// estimate = previous.count × (W − elapsed)/W + current.count
/// ```
///
/// Admission requires `estimate < limit` strictly; a deny mutates nothing.
/// This is the Cloudflare-style approximation, the same shape the canonical
/// remote check script implements with per-window-start subkeys.
pub fn check(
    old: Option<SlidingWindowState>,
    params: SlidingWindowParams,
    now_millis: u64,
) -> SlidingWindowOutcome {
    let w = params.window_millis;
    let current_start = (now_millis / w) * w;

    // Rotate into the window containing `now`. The old current survives as
    // `previous` only when it is exactly one window back.
    let state = match old {
        Some(s) if s.current.start_millis == current_start => s,
        Some(s) => SlidingWindowState {
            current: WindowBucket {
                start_millis: current_start,
                count: 0,
            },
            previous: (current_start >= w && s.current.start_millis == current_start - w)
                .then_some(s.current),
        },
        None => SlidingWindowState {
            current: WindowBucket {
                start_millis: current_start,
                count: 0,
            },
            previous: None,
        },
    };

    let elapsed = now_millis - current_start;
    let overlap = (w - elapsed) as f64 / w as f64;
    let previous_count = state.previous.map_or(0, |p| p.count);
    let estimate = previous_count as f64 * overlap + state.current.count as f64;

    if estimate < params.limit as f64 {
        let admitted = SlidingWindowState {
            current: WindowBucket {
                start_millis: state.current.start_millis,
                count: state.current.count + 1,
            },
            previous: state.previous,
        };
        SlidingWindowOutcome {
            allowed: true,
            state: admitted,
            estimate: estimate + 1.0,
        }
    } else {
        SlidingWindowOutcome {
            allowed: false,
            state,
            estimate,
        }
    }
}

/// The trailing window stops overlapping the current one at its end.
pub fn reset_at(state: &SlidingWindowState, params: SlidingWindowParams) -> u64 {
    state.current.start_millis + params.window_millis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SlidingWindowParams {
        SlidingWindowParams {
            limit: 10,
            window_millis: 10_000,
        }
    }

    #[test]
    fn test_weighted_estimate_across_boundary() {
        // Fill the first window [0, 10000) with 10 admits.
        let mut state = None;
        for t in (0..10_000).step_by(1_000).take(10) {
            let out = check(state, params(), t);
            assert!(out.allowed, "t={} should admit", t);
            state = Some(out.state);
        }
        let out = check(state, params(), 9_999);
        assert!(!out.allowed, "window is full");
        state = Some(out.state);

        // Half-way into [10000, 20000): overlap 0.5, so the previous 10
        // contribute 5. Exactly five more admits fit, then deny.
        for i in 0..5 {
            let out = check(state, params(), 15_000);
            assert!(out.allowed, "admit {} at t=15000", i + 1);
            state = Some(out.state);
        }
        let out = check(state, params(), 15_000);
        assert!(!out.allowed);
        assert!((out.estimate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_keeps_only_adjacent_previous() {
        let out = check(None, params(), 500);
        let mut state = out.state;
        assert_eq!(state.current.start_millis, 0);

        // One window later the old current becomes previous.
        let out = check(Some(state), params(), 10_500);
        state = out.state;
        assert_eq!(state.current.start_millis, 10_000);
        assert_eq!(state.previous.unwrap().start_millis, 0);

        // After a long idle gap the stale buckets are dropped entirely.
        let out = check(Some(state), params(), 50_000);
        state = out.state;
        assert_eq!(state.current.start_millis, 50_000);
        assert!(state.previous.is_none());
    }

    #[test]
    fn test_previous_invariant_holds() {
        let mut state = None;
        for t in [100, 9_900, 10_100, 20_050, 30_001] {
            let out = check(state, params(), t);
            if let Some(prev) = out.state.previous {
                assert_eq!(
                    out.state.current.start_millis - prev.start_millis,
                    params().window_millis
                );
            }
            state = Some(out.state);
        }
    }

    #[test]
    fn test_deny_mutates_nothing() {
        let mut state = None;
        for _ in 0..10 {
            state = Some(check(state, params(), 0).state);
        }
        let before = state.unwrap();
        let out = check(state, params(), 0);
        assert!(!out.allowed);
        assert_eq!(out.state, before);
    }

    #[test]
    fn test_full_overlap_at_window_start() {
        // At the first instant of a new window the previous window counts in
        // full: 10 previous × 1.0 overlap blocks everything.
        let mut state = None;
        for _ in 0..10 {
            state = Some(check(state, params(), 0).state);
        }
        let out = check(state, params(), 10_000);
        assert!(!out.allowed);
        assert!((out.estimate - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_at_is_current_window_end() {
        let out = check(None, params(), 12_345);
        assert_eq!(reset_at(&out.state, params()), 20_000);
    }
}
