//! # Stage: Adaptive Batch Scheduling
//!
//! ## Responsibility
//! Group admitted requests into per-lane batch windows and release each
//! window when it fills to the adaptive target size or ages past the
//! lane's max-wait, whichever comes first. Feed completed-batch latency
//! back into the control law that steers the target size.
//!
//! ## Guarantees
//! - Released batches are never empty and never exceed the lane's
//!   effective maximum size
//! - No window is held open past its max-wait age
//! - Windows release in admission order within a lane
//! - The target size changes only after a full batch completes, stays in
//!   `[min, max]`, and moves by at most 20% per completion
//! - A queued request whose deadline lapses is expired alone; its window
//!   siblings are unaffected
//!
//! ## NOT Responsible For
//! - Lane assignment (that belongs to `lanes`)
//! - Dispatching released batches to caches or backends (that belongs to
//!   `pipeline`)
//! - Cost accounting for expired requests (that belongs to `pipeline`
//!   and `cost`)

pub mod lane;
pub mod window;

pub use lane::{
    spawn_lane, BatchEntry, CompletionFeed, LaneEvent, LaneHandle, LaneStats, ReleasedBatch,
    SpawnedLane,
};
pub use window::{AdaptiveTarget, BatchWindow, LatencyWindow};
