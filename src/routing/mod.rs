//! # Stage: Cost-Aware Model Routing
//!
//! ## Responsibility
//! Map each request onto the cheapest capable model. A weighted complexity
//! estimate selects a capability tier (economy / standard / premium); within
//! the tier the cheapest model leads an ordered fallback chain. Per-model
//! circuit breakers steer traffic away from failing backends and let them
//! recover via half-open probes.
//!
//! ## Guarantees
//! - Deterministic: the same request always produces the same score, tier,
//!   and candidate order.
//! - Bounded: an attempt list never exceeds `1 + max_fallback_hops` models;
//!   exhausting it is a terminal `NoAvailableModel`.
//! - Non-blocking: planning is a pure scan over the prompt with no I/O;
//!   only breaker checks touch shared state.
//! - Fail-fast configuration: weights that do not sum to 1.0 are rejected
//!   at construction, not at the first request.
//!
//! ## NOT Responsible For
//! - Invoking the chosen model (that belongs to `pipeline` / `backend`)
//! - Cache lookups (requests reach the router only on a cache miss)
//! - Cost accounting (the `cost` module prices what actually ran)

pub mod breaker;
pub mod estimator;
pub mod router;

// Re-exports for convenience
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitStatus};
pub use estimator::{ComplexityBreakdown, ComplexityEstimator};
pub use router::{ModelRegistry, ModelRouter, RoutePlan};
