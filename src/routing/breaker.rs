//! Per-model circuit breakers.
//!
//! Each backend model gets its own breaker.  A run of consecutive failures
//! opens the circuit; while open, the router steers around the model.  After
//! a cool-down the circuit half-opens and admits one probe: success closes
//! it, failure reopens it and restarts the cool-down.
//!
//! Time is measured with [`tokio::time::Instant`] so tests can drive the
//! cool-down with a paused clock.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;
use dashmap::DashMap;

/// Lifecycle of a per-model circuit.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Requests flow normally; failures are counted.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One probe is admitted; its outcome decides open versus closed.
    HalfOpen,
}

impl CircuitStatus {
    /// Label form used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Mutable breaker state, guarded by the lock in [`CircuitBreaker`].
#[derive(Debug)]
struct BreakerState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A circuit breaker for one backend model.
///
/// Cloning is cheap and clones share state, so a breaker handed out by the
/// registry observes the same circuit as every other handle for that model.
/// All state lives behind a [`tokio::sync::RwLock`]; the type is safe to
/// share across tasks.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    model: String,
    config: BreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a closed breaker for `model`.
    pub fn new(model: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            model: model.into(),
            config,
            state: Arc::new(RwLock::new(BreakerState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
            })),
        }
    }

    /// Whether a request may be attempted right now.
    ///
    /// An open circuit whose cool-down has elapsed transitions to half-open
    /// and admits the caller as the probe.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn check(&self) -> bool {
        {
            let state = self.state.read().await;
            match state.status {
                CircuitStatus::Closed | CircuitStatus::HalfOpen => return true,
                CircuitStatus::Open => {
                    let still_cooling = state
                        .opened_at
                        .map(|at| at.elapsed() < self.cooldown())
                        .unwrap_or(false);
                    if still_cooling {
                        return false;
                    }
                }
            }
        }

        // Cool-down elapsed: re-check under the write lock before
        // transitioning, another task may have raced us here.
        let mut state = self.state.write().await;
        if state.status == CircuitStatus::Open {
            let cooled = state
                .opened_at
                .map(|at| at.elapsed() >= self.cooldown())
                .unwrap_or(true);
            if !cooled {
                return false;
            }
            info!(model = %self.model, "circuit breaker: half-open, admitting probe");
            state.status = CircuitStatus::HalfOpen;
        }
        true
    }

    /// Record a successful call to the model.
    ///
    /// Resets the failure run. A half-open circuit closes; an open circuit
    /// stays open (a straggler from before the trip must not reset it).
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if state.status == CircuitStatus::HalfOpen {
            info!(model = %self.model, "circuit breaker: closing (probe succeeded)");
            state.status = CircuitStatus::Closed;
            state.opened_at = None;
        }
        state.consecutive_failures = 0;
    }

    /// Record a failed call to the model.
    ///
    /// A closed circuit opens once the run of consecutive failures reaches
    /// the configured threshold. A half-open circuit reopens immediately.
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        match state.status {
            CircuitStatus::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        model = %self.model,
                        failures = state.consecutive_failures,
                        "circuit breaker: opening (failure threshold reached)"
                    );
                    state.status = CircuitStatus::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitStatus::HalfOpen => {
                warn!(model = %self.model, "circuit breaker: reopening (probe failed)");
                state.status = CircuitStatus::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitStatus::Open => {}
        }
    }

    /// Current status, without triggering the open → half-open transition.
    pub async fn status(&self) -> CircuitStatus {
        self.state.read().await.status
    }

    /// Length of the current consecutive-failure run.
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    /// Model this breaker guards.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }
}

/// Lazily-populated collection of per-model breakers.
///
/// All breakers share one [`BreakerConfig`]. Handles returned by
/// [`BreakerRegistry::breaker`] are clones over shared state.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, CircuitBreaker>,
}

impl BreakerRegistry {
    /// Create an empty registry.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `model`, created closed on first access.
    pub fn breaker(&self, model: &str) -> CircuitBreaker {
        self.breakers
            .entry(model.to_string())
            .or_insert_with(|| CircuitBreaker::new(model, self.config))
            .clone()
    }

    /// Status snapshot for every model seen so far.
    ///
    /// Clones the handles out of the map first so no shard lock is held
    /// across an await.
    pub async fn statuses(&self) -> Vec<(String, CircuitStatus)> {
        let handles: Vec<(String, CircuitBreaker)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut out = Vec::with_capacity(handles.len());
        for (model, breaker) in handles {
            out.push((model, breaker.status().await));
        }
        out
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
