//! Append-only cost ledger.
//!
//! Records one [`CostEvent`] per exiting request and maintains running
//! dollar totals. Totals use atomic micro-dollar counters so snapshotting
//! never blocks recording; the event log itself sits behind a lock that is
//! only touched on append and export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;
use tracing::warn;

use super::CostEvent;

/// Append-only sink for cost events with lock-free running totals.
///
/// Dollar totals are stored as micro-dollars (1 USD = 1 000 000
/// micro-dollars) to avoid floating-point drift in long-running
/// aggregations. Sub-micro-dollar residue per event truncates.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Default)]
pub struct CostLedger {
    events: RwLock<Vec<CostEvent>>,

    events_recorded: AtomicU64,
    base_micro: AtomicU64,
    infra_micro: AtomicU64,
    cache_savings_micro: AtomicU64,
    routing_savings_micro: AtomicU64,
    prefix_savings_micro: AtomicU64,
}

impl CostLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal event.
    ///
    /// Totals are updated first and unconditionally; the event log append
    /// is best-effort and degrades (with a warning) if the log lock was
    /// poisoned by a panicking reader.
    ///
    /// # Arguments
    ///
    /// * `event` — The event to append. Never mutated afterwards.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn record(&self, event: CostEvent) {
        self.base_micro
            .fetch_add(f64_to_micro(event.base_cost_usd), Ordering::Relaxed);
        self.infra_micro
            .fetch_add(f64_to_micro(event.infra_cost_usd), Ordering::Relaxed);
        self.cache_savings_micro
            .fetch_add(f64_to_micro(event.cache_savings_usd), Ordering::Relaxed);
        self.routing_savings_micro
            .fetch_add(f64_to_micro(event.routing_savings_usd), Ordering::Relaxed);
        self.prefix_savings_micro
            .fetch_add(f64_to_micro(event.prefix_savings_usd), Ordering::Relaxed);
        self.events_recorded.fetch_add(1, Ordering::Relaxed);

        match self.events.write() {
            Ok(mut log) => log.push(event),
            Err(_) => {
                warn!(
                    request_id = %event.request_id,
                    "cost ledger event log poisoned, keeping running totals only"
                );
            }
        }
    }

    /// Point-in-time totals, computed from atomics without locking writers.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let base = self.base_micro.load(Ordering::Relaxed);
        let infra = self.infra_micro.load(Ordering::Relaxed);
        let cache = self.cache_savings_micro.load(Ordering::Relaxed);
        let routing = self.routing_savings_micro.load(Ordering::Relaxed);
        let prefix = self.prefix_savings_micro.load(Ordering::Relaxed);

        let gross = base + infra;
        let savings = cache + routing + prefix;
        let net = gross.saturating_sub(savings);

        LedgerSnapshot {
            events: self.events_recorded.load(Ordering::Relaxed),
            base_cost_usd: micro_to_f64(base),
            infra_cost_usd: micro_to_f64(infra),
            cache_savings_usd: micro_to_f64(cache),
            routing_savings_usd: micro_to_f64(routing),
            prefix_savings_usd: micro_to_f64(prefix),
            total_savings_usd: micro_to_f64(savings),
            net_cost_usd: micro_to_f64(net),
            savings_rate: if gross > 0 {
                savings as f64 / gross as f64
            } else {
                0.0
            },
        }
    }

    /// Copy of the event log, in recording order.
    ///
    /// Returns an empty list if the log lock was poisoned; running totals
    /// remain available through [`CostLedger::snapshot`].
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn events(&self) -> Vec<CostEvent> {
        match self.events.read() {
            Ok(log) => log.clone(),
            Err(_) => {
                warn!("cost ledger event log poisoned, returning empty export");
                Vec::new()
            }
        }
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events_recorded.load(Ordering::Relaxed) as usize
    }

    /// Whether any event has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-in-time totals over everything the ledger has recorded.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    /// Events recorded so far.
    pub events: u64,
    /// Provider cost actually incurred, USD.
    pub base_cost_usd: f64,
    /// Infrastructure cost attributed, USD.
    pub infra_cost_usd: f64,
    /// Savings from exact and semantic cache hits, USD.
    pub cache_savings_usd: f64,
    /// Savings from cost-aware tier routing, USD.
    pub routing_savings_usd: f64,
    /// Savings from shared-prefix reuse, USD.
    pub prefix_savings_usd: f64,
    /// All savings combined, USD.
    pub total_savings_usd: f64,
    /// Gross cost minus savings, floored at zero, USD.
    pub net_cost_usd: f64,
    /// Fraction of gross cost that was saved; `0.0` when nothing was spent.
    pub savings_rate: f64,
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Convert USD to micro-dollars, truncating sub-micro residue.
fn f64_to_micro(usd: f64) -> u64 {
    (usd * 1_000_000.0) as u64
}

/// Convert micro-dollars to USD.
fn micro_to_f64(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}

// ── Tests ──────────────────────────────────────────────────────────────
