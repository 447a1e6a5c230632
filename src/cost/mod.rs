//! # Stage: Cost Attribution
//!
//! ## Responsibility
//! Price every request that leaves the pipeline and attribute where money
//! went and where it was saved. Each exit — served from cache, generated by
//! a backend, or failed terminally — produces exactly one [`CostEvent`];
//! the [`CostLedger`](ledger::CostLedger) appends it and maintains running
//! totals.
//!
//! ## Guarantees
//! - Exactly one event per exiting request; events are never mutated or
//!   recomputed after emission.
//! - Running totals are carried as integer micro-dollars in atomics, so
//!   snapshots never block writers and long aggregations do not drift.
//! - All savings are floored at zero: routing to a pricier model than the
//!   baseline is not negative savings, it is zero.
//!
//! ## NOT Responsible For
//! - Aggregation beyond running totals (group-by belongs to a query layer)
//! - Deciding which model runs (the `routing` module owns that)
//! - Budget enforcement or alerting

pub mod ledger;

pub use ledger::{CostLedger, LedgerSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ModelSpec;
use crate::lanes::Lane;
use crate::{CacheHit, CostSummary, RequestMetadata, TokenUsage};

/// Terminal cost/savings record for one request.
///
/// Produced exactly once per request that exits the pipeline, including
/// requests that fail with `DeadlineExceeded` or `NoAvailableModel` (those
/// carry zero cost but still count). Append-only: the ledger never mutates
/// an event after recording it.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    /// Identifier of the request this event settles.
    pub request_id: String,
    /// When the request exited the pipeline.
    pub timestamp: DateTime<Utc>,
    /// Lane the request was admitted to.
    pub lane: Lane,
    /// Model that served the request, or the model the cached entry was
    /// produced by. `None` when no model is attributable (terminal failure).
    pub model: Option<String>,
    /// Capability tier the router selected, as a label.
    pub tier: Option<String>,
    /// Complexity score the routing decision used.
    pub score: f64,
    /// Which cache tier served the request, if any.
    pub cache_hit: CacheHit,
    /// Token usage, backend-reported or estimated.
    pub usage: TokenUsage,
    /// Wall-clock latency from admission to exit, milliseconds.
    pub latency_ms: u64,
    /// Fallback hops taken past the primary model.
    pub fallback_hops: u32,
    /// Provider cost actually incurred, USD.
    pub base_cost_usd: f64,
    /// Infrastructure cost attributed to this request, USD.
    pub infra_cost_usd: f64,
    /// Provider cost avoided by serving from the exact or semantic tier, USD.
    pub cache_savings_usd: f64,
    /// Cost delta between the premium reference model and the model actually
    /// used, USD.
    pub routing_savings_usd: f64,
    /// Prompt-price value of shared-prefix tokens the backend did not have
    /// to re-ingest, USD.
    pub prefix_savings_usd: f64,
    /// Terminal error kind for failed-and-billed requests.
    pub error: Option<String>,
    /// Dimensional attribution tags carried from the request.
    pub metadata: RequestMetadata,
}

impl CostEvent {
    /// Total cost before savings: provider plus infrastructure.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn gross_cost(&self) -> f64 {
        self.base_cost_usd + self.infra_cost_usd
    }

    /// Combined savings across cache, routing, and prefix reuse.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn savings(&self) -> f64 {
        self.cache_savings_usd + self.routing_savings_usd + self.prefix_savings_usd
    }

    /// Cost after savings, floored at zero.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn net_cost(&self) -> f64 {
        (self.gross_cost() - self.savings()).max(0.0)
    }

    /// Fraction of gross cost that was saved; `0.0` when nothing was spent.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn savings_rate(&self) -> f64 {
        let gross = self.gross_cost();
        if gross == 0.0 {
            return 0.0;
        }
        self.savings() / gross
    }

    /// Dollar totals in the shape responses carry.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn summary(&self) -> CostSummary {
        CostSummary {
            base_cost: self.gross_cost(),
            savings: self.savings(),
            net_cost: self.net_cost(),
        }
    }
}

// ── Pricing ────────────────────────────────────────────────────────────

/// Price token usage against a model's configured per-1k rates.
///
/// # Panics
///
/// This function never panics.
pub fn base_cost_usd(spec: &ModelSpec, usage: TokenUsage) -> f64 {
    let prompt = (usage.prompt_tokens as f64 / 1000.0) * spec.prompt_price_per_1k;
    let completion = (usage.completion_tokens as f64 / 1000.0) * spec.completion_price_per_1k;
    prompt + completion
}

/// Savings from running on `used` instead of `reference`, floored at zero.
///
/// # Panics
///
/// This function never panics.
pub fn routing_savings_usd(reference: &ModelSpec, used: &ModelSpec, usage: TokenUsage) -> f64 {
    (base_cost_usd(reference, usage) - base_cost_usd(used, usage)).max(0.0)
}

/// Prompt-price value of `tokens` shared-prefix tokens.
///
/// # Panics
///
/// This function never panics.
pub fn prefix_savings_usd(spec: &ModelSpec, tokens: u64) -> f64 {
    (tokens as f64 / 1000.0) * spec.prompt_price_per_1k
}

// ── Tests ──────────────────────────────────────────────────────────────
