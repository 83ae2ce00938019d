use crate::policy::Policy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWindowParams {
    pub limit: u64,
    pub window_millis: u64,
}

impl FixedWindowParams {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            limit: policy.requests(),
            window_millis: policy.window_millis(),
        }
    }
}

/// Per-key counter for the window identified by `window_number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowState {
    pub window_number: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowOutcome {
    pub allowed: bool,
    pub state: FixedWindowState,
}

/// Plain fixed-window counter: the count resets whenever
/// `floor(now / W)` moves on, and admission increments it while it is below
/// the limit.
pub fn check(
    old: Option<FixedWindowState>,
    params: FixedWindowParams,
    now_millis: u64,
) -> FixedWindowOutcome {
    let window_number = now_millis / params.window_millis;

    let state = match old {
        Some(s) if s.window_number == window_number => s,
        _ => FixedWindowState {
            window_number,
            count: 0,
        },
    };

    if state.count < params.limit {
        FixedWindowOutcome {
            allowed: true,
            state: FixedWindowState {
                window_number,
                count: state.count + 1,
            },
        }
    } else {
        FixedWindowOutcome {
            allowed: false,
            state,
        }
    }
}

pub fn reset_at(state: &FixedWindowState, params: FixedWindowParams) -> u64 {
    (state.window_number + 1) * params.window_millis
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FixedWindowParams {
        FixedWindowParams {
            limit: 3,
            window_millis: 1_000,
        }
    }

    #[test]
    fn test_limit_enforced_within_window() {
        let mut state = None;
        for _ in 0..3 {
            let out = check(state, params(), 500);
            assert!(out.allowed);
            state = Some(out.state);
        }
        let out = check(state, params(), 999);
        assert!(!out.allowed);
        assert_eq!(out.state.count, 3);
    }

    #[test]
    fn test_counter_resets_on_window_change() {
        let mut state = None;
        for _ in 0..3 {
            state = Some(check(state, params(), 500).state);
        }
        let out = check(state, params(), 1_000);
        assert!(out.allowed);
        assert_eq!(out.state.window_number, 1);
        assert_eq!(out.state.count, 1);
    }

    #[test]
    fn test_reset_at_next_boundary() {
        let out = check(None, params(), 2_700);
        assert_eq!(reset_at(&out.state, params()), 3_000);
    }
}
