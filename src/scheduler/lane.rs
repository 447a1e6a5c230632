//! Single-owner lane actor.
//!
//! Each lane runs one dedicated task that owns the open batch window.
//! Admission and the forced-release timer arrive through the actor's
//! channels, so the size-or-age release race and the control law's
//! read-modify-write are serialized without locks. Released batches and
//! expired members leave through an event channel; the actor never
//! invokes a backend or touches a cache itself.
//!
//! Completion feedback flows on its own channel, separate from
//! admissions: the dispatcher holds only the completion side, so dropping
//! the admission handle still shuts the actor down even while the
//! dispatcher is mid-batch.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{BatchingConfig, LaneConfig};
use crate::lanes::Lane;
use crate::scheduler::window::{AdaptiveTarget, BatchWindow, LatencyWindow};
use crate::{InferenceRequest, InferenceResponse, PipelineError};

/// Admission mailbox depth per lane.
const MAILBOX_CAPACITY: usize = 1024;

/// Released-batch event channel depth per lane.
const EVENT_CAPACITY: usize = 256;

/// One queued request: the request itself, its reply handle, and the
/// queue deadline that applies while it waits.
#[derive(Debug)]
pub struct BatchEntry {
    /// The admitted request.
    pub request: InferenceRequest,
    /// When the request entered its lane.
    pub admitted_at: Instant,
    /// Absolute queue deadline; `None` is best-effort.
    pub queue_deadline: Option<Instant>,
    /// Reply handle back to the submitting caller.
    pub reply: oneshot::Sender<Result<InferenceResponse, PipelineError>>,
}

impl BatchEntry {
    /// Pair a request with a fresh reply channel, stamping the admission
    /// instant and converting a relative deadline budget to an absolute one.
    pub fn new(
        request: InferenceRequest,
        queue_deadline_ms: Option<u64>,
    ) -> (
        Self,
        oneshot::Receiver<Result<InferenceResponse, PipelineError>>,
    ) {
        let (reply, rx) = oneshot::channel();
        let admitted_at = Instant::now();
        let queue_deadline = queue_deadline_ms.map(|ms| admitted_at + Duration::from_millis(ms));
        (
            Self {
                request,
                admitted_at,
                queue_deadline,
                reply,
            },
            rx,
        )
    }

    /// Milliseconds spent in the pipeline so far.
    pub fn waited_ms(&self) -> u64 {
        self.admitted_at.elapsed().as_millis() as u64
    }
}

/// What a lane actor hands to its dispatcher.
#[derive(Debug)]
pub enum LaneEvent {
    /// A window was released; dispatch all members as one batch.
    Batch(ReleasedBatch),
    /// A queued member's deadline passed before its window released.
    Expired(BatchEntry),
}

/// A released window, ready for dispatch.
#[derive(Debug)]
pub struct ReleasedBatch {
    /// Lane the window belonged to.
    pub lane: Lane,
    /// Members in admission order; never empty.
    pub members: Vec<BatchEntry>,
    /// True when the age timer forced the release, false when the window
    /// filled to the target size.
    pub forced_by_timer: bool,
    /// Target batch size at the moment of release.
    pub target_size: usize,
}

// ── Counters ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LaneCounters {
    admitted: AtomicU64,
    expired: AtomicU64,
    batches_released: AtomicU64,
    released_by_size: AtomicU64,
    released_by_timer: AtomicU64,
    target_size: AtomicUsize,
    p95_latency_ms: AtomicU64,
}

/// Point-in-time scheduler counters for one lane.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LaneStats {
    /// Which lane these counters describe.
    pub lane: Lane,
    /// Requests admitted, including those that later expired.
    pub admitted: u64,
    /// Requests that timed out while queued.
    pub expired: u64,
    /// Windows released in total.
    pub batches_released: u64,
    /// Releases triggered by reaching the target size.
    pub released_by_size: u64,
    /// Releases forced by the age timer.
    pub released_by_timer: u64,
    /// Current adaptive target batch size.
    pub target_size: usize,
    /// Rolling p95 batch latency; zero before the first completion.
    pub p95_latency_ms: u64,
}

// ── Handles ────────────────────────────────────────────────────────────

/// Cloneable admission handle to one lane actor.
///
/// The actor shuts down (flushing its open window) once every clone of
/// this handle is dropped.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    lane: Lane,
    admissions: mpsc::Sender<BatchEntry>,
    counters: Arc<LaneCounters>,
}

impl LaneHandle {
    /// Queue one request into the lane's open window.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ChannelClosed`] if the lane actor has shut
    /// down; the entry (and its reply handle) is dropped in that case.
    pub async fn admit(&self, entry: BatchEntry) -> Result<(), PipelineError> {
        self.admissions
            .send(entry)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// Which lane this handle feeds.
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Snapshot of the lane's scheduler counters.
    pub fn stats(&self) -> LaneStats {
        LaneStats {
            lane: self.lane,
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            batches_released: self.counters.batches_released.load(Ordering::Relaxed),
            released_by_size: self.counters.released_by_size.load(Ordering::Relaxed),
            released_by_timer: self.counters.released_by_timer.load(Ordering::Relaxed),
            target_size: self.counters.target_size.load(Ordering::Relaxed),
            p95_latency_ms: self.counters.p95_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher-side handle for reporting completed-batch latency back into
/// the lane's control law.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone)]
pub struct CompletionFeed {
    lane: Lane,
    tx: mpsc::Sender<u64>,
}

impl CompletionFeed {
    /// Feed one completed batch's latency into the control law.
    ///
    /// Best-effort: if the actor has already shut down there is nothing
    /// left to tune, so the sample is dropped.
    pub async fn record(&self, latency_ms: u64) {
        if self.tx.send(latency_ms).await.is_err() {
            debug!(
                lane = self.lane.as_str(),
                "lane actor gone, dropping latency sample"
            );
        }
    }
}

/// Everything [`spawn_lane`] wires up for one lane.
#[derive(Debug)]
pub struct SpawnedLane {
    /// Admission handle; dropping every clone stops the actor.
    pub handle: LaneHandle,
    /// Event stream the dispatcher must consume.
    pub events: mpsc::Receiver<LaneEvent>,
    /// Latency feedback channel for the dispatcher.
    pub completions: CompletionFeed,
    /// The actor task.
    pub join: JoinHandle<()>,
}

/// Spawn the actor for one lane.
pub fn spawn_lane(lane: Lane, lane_config: &LaneConfig, batching: &BatchingConfig) -> SpawnedLane {
    let (admission_tx, admission_rx) = mpsc::channel(MAILBOX_CAPACITY);
    let (completion_tx, completion_rx) = mpsc::channel(EVENT_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

    // Per-lane cap tightens the global maximum; express defaults to 4.
    let hi = batching
        .max_size
        .min(lane_config.max_batch.unwrap_or(batching.max_size))
        .max(1);
    let lo = batching.min_size.clamp(1, hi);
    let target = AdaptiveTarget::new(lo, hi);

    let counters = Arc::new(LaneCounters::default());
    counters.target_size.store(target.current(), Ordering::Relaxed);

    let actor = LaneActor {
        lane,
        max_wait: Duration::from_millis(lane_config.max_wait_ms),
        target_latency_ms: lane_config
            .target_latency_ms
            .unwrap_or(batching.target_latency_ms),
        admissions: admission_rx,
        completions: completion_rx,
        completions_open: true,
        events: event_tx,
        window: None,
        target,
        latencies: LatencyWindow::new(batching.latency_window),
        counters: Arc::clone(&counters),
    };
    let join = tokio::spawn(actor.run());

    SpawnedLane {
        handle: LaneHandle {
            lane,
            admissions: admission_tx,
            counters,
        },
        events: event_rx,
        completions: CompletionFeed {
            lane,
            tx: completion_tx,
        },
        join,
    }
}

// ── Actor ──────────────────────────────────────────────────────────────

struct LaneActor {
    lane: Lane,
    max_wait: Duration,
    target_latency_ms: u64,
    admissions: mpsc::Receiver<BatchEntry>,
    completions: mpsc::Receiver<u64>,
    completions_open: bool,
    events: mpsc::Sender<LaneEvent>,
    window: Option<BatchWindow<BatchEntry>>,
    target: AdaptiveTarget,
    latencies: LatencyWindow,
    counters: Arc<LaneCounters>,
}

impl LaneActor {
    async fn run(mut self) {
        info!(
            lane = self.lane.as_str(),
            max_wait_ms = self.max_wait.as_millis() as u64,
            target_size = self.target.current(),
            "lane scheduler started"
        );

        loop {
            let wake = self.next_wake();
            let timer = wake.unwrap_or_else(Instant::now);
            tokio::select! {
                // Timer first: an overdue window releases before further
                // admissions can pile onto it.
                biased;

                () = time::sleep_until(timer), if wake.is_some() => {
                    self.on_wake().await;
                }
                maybe_latency = self.completions.recv(), if self.completions_open => {
                    match maybe_latency {
                        Some(latency_ms) => self.on_batch_completed(latency_ms),
                        None => self.completions_open = false,
                    }
                }
                maybe_entry = self.admissions.recv() => match maybe_entry {
                    Some(entry) => self.on_admit(entry).await,
                    None => break,
                },
            }
        }

        // All admission handles dropped: flush the open window so parked
        // callers still get their batch dispatched.
        if self.window.is_some() {
            self.release(true).await;
        }
        info!(lane = self.lane.as_str(), "lane scheduler stopped");
    }

    /// Earliest instant that requires action: the window's forced release
    /// or the soonest member deadline. `None` while no window is open.
    fn next_wake(&self) -> Option<Instant> {
        let window = self.window.as_ref()?;
        let mut wake = window.release_at(self.max_wait);
        for entry in window.members() {
            if let Some(deadline) = entry.queue_deadline {
                wake = wake.min(deadline);
            }
        }
        Some(wake)
    }

    async fn on_admit(&mut self, entry: BatchEntry) {
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        // A budget that is already spent never enters a window.
        if entry.queue_deadline.is_some_and(|d| d <= now) {
            self.expire(vec![entry]).await;
            return;
        }

        match self.window.as_mut() {
            Some(window) => window.push(entry),
            None => self.window = Some(BatchWindow::open(entry, now)),
        }

        let size = self.window.as_ref().map_or(0, BatchWindow::len);
        if size >= self.target.current() {
            self.release(false).await;
        }
    }

    /// Timer wake: expire overdue members, then force-release an overaged
    /// window.
    async fn on_wake(&mut self) {
        let now = Instant::now();

        let expired = match self.window.as_mut() {
            Some(window) => {
                let expired = window.drain_where(|e| e.queue_deadline.is_some_and(|d| d <= now));
                if window.is_empty() {
                    self.window = None;
                }
                expired
            }
            None => Vec::new(),
        };
        if !expired.is_empty() {
            self.expire(expired).await;
        }

        if self
            .window
            .as_ref()
            .is_some_and(|w| w.age(now) >= self.max_wait)
        {
            self.release(true).await;
        }
    }

    async fn release(&mut self, forced_by_timer: bool) {
        let Some(window) = self.window.take() else {
            return;
        };
        let members = window.into_members();
        if members.is_empty() {
            return;
        }

        self.counters.batches_released.fetch_add(1, Ordering::Relaxed);
        if forced_by_timer {
            self.counters.released_by_timer.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.released_by_size.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            lane = self.lane.as_str(),
            size = members.len(),
            forced_by_timer,
            target_size = self.target.current(),
            "batch released"
        );

        let batch = ReleasedBatch {
            lane: self.lane,
            members,
            forced_by_timer,
            target_size: self.target.current(),
        };
        if self.events.send(LaneEvent::Batch(batch)).await.is_err() {
            warn!(
                lane = self.lane.as_str(),
                "batch dispatcher gone, dropping released batch"
            );
        }
    }

    async fn expire(&mut self, expired: Vec<BatchEntry>) {
        for entry in expired {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(
                lane = self.lane.as_str(),
                request_id = %entry.request.request_id,
                waited_ms = entry.waited_ms(),
                "queued request expired"
            );
            if self.events.send(LaneEvent::Expired(entry)).await.is_err() {
                warn!(
                    lane = self.lane.as_str(),
                    "batch dispatcher gone, dropping expired entry"
                );
                return;
            }
        }
    }

    fn on_batch_completed(&mut self, latency_ms: u64) {
        self.latencies.record(latency_ms);
        let new_target = self.target.observe(latency_ms, self.target_latency_ms);
        self.counters.target_size.store(new_target, Ordering::Relaxed);
        if let Some(p95) = self.latencies.p95() {
            self.counters.p95_latency_ms.store(p95, Ordering::Relaxed);
        }
        debug!(
            lane = self.lane.as_str(),
            latency_ms,
            target_size = new_target,
            "batch completion observed"
        );
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchingConfig, LaneConfig};

    fn lane_config(max_wait_ms: u64, max_batch: Option<usize>) -> LaneConfig {
        LaneConfig {
            max_wait_ms,
            sla_ms: None,
            max_batch,
            target_latency_ms: None,
        }
    }

    fn batching(min_size: usize, max_size: usize) -> BatchingConfig {
        BatchingConfig {
            min_size,
            max_size,
            target_latency_ms: 100,
            latency_window: 100,
        }
    }

    fn entry(id: &str, deadline_ms: Option<u64>) -> BatchEntry {
        let mut request = InferenceRequest::new("prompt");
        request.request_id = id.to_string();
        let (entry, _rx) = BatchEntry::new(request, deadline_ms);
        entry
    }

    fn member_ids(batch: &ReleasedBatch) -> Vec<String> {
        batch
            .members
            .iter()
            .map(|m| m.request.request_id.clone())
            .collect()
    }

    // Under the paused clock, time only advances once every task is idle,
    // so a 1ms sleep acts as a barrier that lets the actor drain its
    // channels before assertions.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    // -- release triggers --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_single_member_releases_at_timer() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        let start = Instant::now();
        lane.handle.admit(entry("r1", None)).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(member_ids(&batch), vec!["r1"]);
                assert!(batch.forced_by_timer);
                assert_eq!(batch.lane, Lane::Standard);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_express_under_target_waits_for_timer() {
        // Express tuning: 10ms window, size trigger at 4. Three admissions
        // inside 5ms never reach 4, so the timer releases all three at 10ms.
        let mut lane = spawn_lane(Lane::Express, &lane_config(10, Some(4)), &batching(1, 4));
        let start = Instant::now();
        lane.handle.admit(entry("r1", None)).await.unwrap();
        time::sleep(Duration::from_millis(2)).await;
        lane.handle.admit(entry("r2", None)).await.unwrap();
        time::sleep(Duration::from_millis(2)).await;
        lane.handle.admit(entry("r3", None)).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(member_ids(&batch), vec!["r1", "r2", "r3"]);
                assert!(batch.forced_by_timer);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_releases_when_target_size_reached() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(2, 2));
        let start = Instant::now();
        lane.handle.admit(entry("r1", None)).await.unwrap();
        lane.handle.admit(entry("r2", None)).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(batch.members.len(), 2);
                assert!(!batch.forced_by_timer);
                assert_eq!(batch.target_size, 2);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        // Filled by size, not by waiting out the window.
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_release_in_admission_order() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(2, 2));
        for id in ["r1", "r2", "r3", "r4"] {
            lane.handle.admit(entry(id, None)).await.unwrap();
        }

        let first = match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => member_ids(&batch),
            other => panic!("expected batch, got {other:?}"),
        };
        let second = match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => member_ids(&batch),
            other => panic!("expected batch, got {other:?}"),
        };
        assert_eq!(first, vec!["r1", "r2"]);
        assert_eq!(second, vec!["r3", "r4"]);
    }

    // -- queue deadlines ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_queued_expiry_spares_siblings() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(100, None), &batching(4, 64));
        let start = Instant::now();
        lane.handle.admit(entry("hurried", Some(10))).await.unwrap();
        lane.handle.admit(entry("patient", None)).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Expired(expired) => {
                assert_eq!(expired.request.request_id, "hurried");
                assert_eq!(start.elapsed(), Duration::from_millis(10));
            }
            other => panic!("expected expiry, got {other:?}"),
        }
        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(member_ids(&batch), vec!["patient"]);
                assert_eq!(start.elapsed(), Duration::from_millis(100));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_budget_expires_at_admission() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        lane.handle.admit(entry("late", Some(0))).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Expired(expired) => {
                assert_eq!(expired.request.request_id, "late");
            }
            other => panic!("expected expiry, got {other:?}"),
        }
        assert_eq!(lane.handle.stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiring_every_member_discards_the_window() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(100, None), &batching(4, 64));
        lane.handle.admit(entry("a", Some(10))).await.unwrap();
        lane.handle.admit(entry("b", Some(10))).await.unwrap();

        assert!(matches!(
            lane.events.recv().await.unwrap(),
            LaneEvent::Expired(_)
        ));
        assert!(matches!(
            lane.events.recv().await.unwrap(),
            LaneEvent::Expired(_)
        ));

        // Window is gone; a later admission opens a fresh one with a fresh
        // release timer.
        let reopened = Instant::now();
        lane.handle.admit(entry("c", None)).await.unwrap();
        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(member_ids(&batch), vec!["c"]);
                assert_eq!(reopened.elapsed(), Duration::from_millis(100));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    // -- control law -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_slow_completions_shrink_target() {
        let lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        assert_eq!(lane.handle.stats().target_size, 64);

        lane.completions.record(150).await;
        settle().await;
        assert_eq!(lane.handle.stats().target_size, 51);

        lane.completions.record(150).await;
        settle().await;
        assert_eq!(lane.handle.stats().target_size, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_completions_grow_target_back_to_cap() {
        let lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        lane.completions.record(150).await; // 64 → 51
        lane.completions.record(40).await; // 51 → 62
        settle().await;
        assert_eq!(lane.handle.stats().target_size, 62);

        lane.completions.record(40).await; // 62 → 64 (capped)
        settle().await;
        assert_eq!(lane.handle.stats().target_size, 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_updates_p95_gauge() {
        let lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        assert_eq!(lane.handle.stats().p95_latency_ms, 0);
        lane.completions.record(90).await;
        settle().await;
        assert_eq!(lane.handle.stats().p95_latency_ms, 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_change_applies_to_next_window() {
        // Shrink the target to 3 via a slow completion, then verify the
        // next window releases by size at 3.
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(2, 4));
        lane.completions.record(150).await; // 4 → 3
        settle().await;
        assert_eq!(lane.handle.stats().target_size, 3);

        for id in ["r1", "r2", "r3"] {
            lane.handle.admit(entry(id, None)).await.unwrap();
        }
        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(batch.members.len(), 3);
                assert!(!batch.forced_by_timer);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    // -- counters and lifecycle ---------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_release_reasons() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(2, 2));
        lane.handle.admit(entry("r1", None)).await.unwrap();
        lane.handle.admit(entry("r2", None)).await.unwrap();
        assert!(matches!(
            lane.events.recv().await.unwrap(),
            LaneEvent::Batch(_)
        ));

        lane.handle.admit(entry("r3", None)).await.unwrap();
        assert!(matches!(
            lane.events.recv().await.unwrap(),
            LaneEvent::Batch(_)
        ));

        let stats = lane.handle.stats();
        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.batches_released, 2);
        assert_eq!(stats.released_by_size, 1);
        assert_eq!(stats.released_by_timer, 1);
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_clones_share_one_actor() {
        let mut lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(2, 2));
        let other = lane.handle.clone();
        lane.handle.admit(entry("r1", None)).await.unwrap();
        other.admit(entry("r2", None)).await.unwrap();

        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => assert_eq!(batch.members.len(), 2),
            other => panic!("expected batch, got {other:?}"),
        }
        assert_eq!(other.stats().admitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_flushes_open_window() {
        let lane = spawn_lane(Lane::Batch, &lane_config(500, None), &batching(4, 64));
        lane.handle.admit(entry("r1", None)).await.unwrap();
        let SpawnedLane {
            handle,
            mut events,
            completions,
            join,
        } = lane;
        drop(handle);

        // The completion feed stays alive (as it does inside a dispatcher
        // mid-batch); the actor must still stop and flush on handle drop.
        match events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => assert_eq!(member_ids(&batch), vec!["r1"]),
            other => panic!("expected batch, got {other:?}"),
        }
        join.await.unwrap();
        drop(completions);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_fails_after_actor_abort() {
        let lane = spawn_lane(Lane::Standard, &lane_config(50, None), &batching(4, 64));
        lane.join.abort();
        let _ = lane.join.await;

        let result = lane.handle.admit(entry("r1", None)).await;
        assert!(matches!(result, Err(PipelineError::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_express_cap_tightens_global_max() {
        let mut lane = spawn_lane(Lane::Express, &lane_config(10, Some(4)), &batching(4, 64));
        assert_eq!(lane.handle.stats().target_size, 4);

        for id in ["r1", "r2", "r3", "r4"] {
            lane.handle.admit(entry(id, None)).await.unwrap();
        }
        match lane.events.recv().await.unwrap() {
            LaneEvent::Batch(batch) => {
                assert_eq!(batch.members.len(), 4);
                assert!(!batch.forced_by_timer);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }
}
