//! Pure admission kernels.
//!
//! Each kernel maps `(previous state, parameters, now)` to a new state plus
//! an admit/deny verdict. Kernels never read a wall clock and never touch
//! shared state; callers (the storages) pass `now` in and are responsible
//! for persisting the returned state atomically per key. A key seen for the
//! first time starts "full": the bucket at capacity, the counters at zero.

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

pub use fixed_window::{FixedWindowParams, FixedWindowState};
pub use sliding_window::{SlidingWindowParams, SlidingWindowState, WindowBucket};
pub use token_bucket::{TokenBucketParams, TokenBucketState};
