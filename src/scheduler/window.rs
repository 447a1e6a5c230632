//! Batch window and control-law state.
//!
//! Pure, synchronous state machines used by the lane actor: the open
//! window of queued members, the rolling latency sample, and the adaptive
//! target batch size. None of these types touch channels or spawn tasks,
//! so every rule here is unit-testable without a runtime.

use std::collections::VecDeque;

use tokio::time::{Duration, Instant};

// ── Batch window ───────────────────────────────────────────────────────

/// An open batch window: members in admission order plus the instant the
/// window opened.
///
/// A window exists only once it has a first member; the owner holds
/// `Option<BatchWindow<_>>` and drops it back to `None` on release, so an
/// empty window is never released.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct BatchWindow<T> {
    members: Vec<T>,
    opened_at: Instant,
}

impl<T> BatchWindow<T> {
    /// Open a window around its first member.
    pub fn open(first: T, now: Instant) -> Self {
        Self {
            members: vec![first],
            opened_at: now,
        }
    }

    /// Append a member. Admission order is preserved.
    pub fn push(&mut self, member: T) {
        self.members.push(member);
    }

    /// Current member count.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when every member has been drained out (the owner should then
    /// discard the window).
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// How long the window has been open.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    /// The instant at which the timer must force this window out.
    pub fn release_at(&self, max_wait: Duration) -> Instant {
        self.opened_at + max_wait
    }

    /// Iterate members in admission order.
    pub fn members(&self) -> impl Iterator<Item = &T> {
        self.members.iter()
    }

    /// Remove and return every member matching `pred`, preserving the
    /// relative order of both the removed and the remaining members.
    pub fn drain_where<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.members.len() {
            if pred(&self.members[i]) {
                removed.push(self.members.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Consume the window, yielding members in admission order.
    pub fn into_members(self) -> Vec<T> {
        self.members
    }
}

// ── Rolling latency sample ─────────────────────────────────────────────

/// Fixed-size rolling sample of recent batch latencies.
///
/// Keeps the last `capacity` observations and reports the p95 as the
/// sorted value at index `⌊len × 0.95⌋`, clamped into range.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    /// Create an empty sample holding at most `capacity` observations
    /// (floored at one).
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record one batch latency, evicting the oldest sample when full.
    pub fn record(&mut self, latency_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// The rolling p95, or `None` before the first observation.
    pub fn p95(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = (sorted.len() as f64 * 0.95) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True before the first observation.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ── Adaptive target size ───────────────────────────────────────────────

/// The adaptive target batch size and its control law.
///
/// Bounded to `[min, max]` and adjusted only on batch completion: a
/// latency under 80% of target grows the size by 20% (ceiling), a latency
/// over target shrinks it by 20% (floor), anything in between leaves it
/// alone. Starts at `max` — the window timer already bounds queueing
/// delay, so the size only backs off once completions prove too slow.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveTarget {
    current: usize,
    min: usize,
    max: usize,
}

impl AdaptiveTarget {
    /// Create a target bounded to `[min, max]`, with both bounds floored
    /// at one and `min` clamped under `max`.
    pub fn new(min: usize, max: usize) -> Self {
        let max = max.max(1);
        let min = min.clamp(1, max);
        Self {
            current: max,
            min,
            max,
        }
    }

    /// Current target batch size.
    pub fn current(&self) -> usize {
        self.current
    }

    /// The `(min, max)` bounds.
    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    /// Apply the control law for one completed batch and return the new
    /// target. This is the only place the target changes.
    pub fn observe(&mut self, observed_ms: u64, target_ms: u64) -> usize {
        let observed = observed_ms as f64;
        let target = target_ms as f64;
        if observed < 0.8 * target {
            self.current = ((self.current as f64 * 1.2).ceil() as usize).min(self.max);
        } else if observed > target {
            self.current = ((self.current as f64 * 0.8).floor() as usize).max(self.min);
        }
        self.current
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
