//! # tokio-inference-pipeline
//!
//! A cost- and latency-aware orchestration pipeline for LLM inference over Tokio.
//!
//! ## Architecture
//!
//! Requests are classified into priority lanes, batched adaptively, checked
//! against a three-tier cache, and routed to the cheapest capable backend:
//!
//! ```text
//! submit → lane classifier → [express|standard|batch] lane actor
//!        → released batch → cache chain (exact → semantic → prefix)
//!        → complexity estimator → cost-aware router (+ circuit breakers)
//!        → backend invoke → cache population → cost ledger → response
//! ```

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod backend;
pub mod cache;
pub mod config;
pub mod cost;
pub mod lanes;
pub mod metrics;
pub mod pipeline;
pub mod routing;
pub mod scheduler;

// Re-exports for convenience
pub use backend::{ModelBackend, SimulatedBackend};
pub use lanes::Lane;
pub use pipeline::Pipeline;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
///   (Datadog, Grafana Loki, etc.)
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use tokio_inference_pipeline::{init_tracing, PipelineError};
/// # fn example() -> Result<(), PipelineError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), PipelineError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| PipelineError::Config(format!("tracing init failed: {e}")))
}

/// Top-level pipeline errors.
///
/// Every error surface in the pipeline is mapped to a variant here.
/// All variants implement `std::error::Error` via [`thiserror`].
///
/// Only [`PipelineError::DeadlineExceeded`] and
/// [`PipelineError::NoAvailableModel`] are surfaced to callers during normal
/// operation; backend and cache faults are absorbed by fallback and tier
/// degradation respectively.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The declared request priority is not one of `express|standard|batch`.
    ///
    /// Silently defaulting to `standard` is not permitted; the caller must
    /// be told the value was rejected.
    #[error("unrecognized priority {0:?} (expected express|standard|batch)")]
    InvalidPriority(String),

    /// Complexity-estimator weights do not sum to 1.0.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first scoring call.
    #[error("complexity weights must sum to 1.0, got {0}")]
    InvalidWeights(f64),

    /// The request's latency budget expired while it was still queued.
    ///
    /// Recoverable: the caller may retry. Sibling members of the same
    /// batch window are unaffected.
    #[error("deadline exceeded after {waited_ms}ms in queue")]
    DeadlineExceeded {
        /// How long the request sat in its lane before expiry.
        waited_ms: u64,
    },

    /// Every candidate model failed or was circuit-open; the fallback
    /// chain is exhausted.
    #[error("no available model after {attempts} routing attempts")]
    NoAvailableModel {
        /// Total invocation attempts made (primary + fallback hops).
        attempts: u32,
    },

    /// A backend model client failed (network, API, or decode error).
    ///
    /// Feeds circuit-breaker accounting and fallback; not surfaced raw.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A cache tier store is unreachable.
    ///
    /// The chain skips the tier and degrades; a cache-only fault never
    /// fails a request.
    #[error("cache tier unavailable: {0}")]
    CacheUnavailable(String),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline channel or reply handle closed unexpectedly, indicating
    /// lane-actor shutdown.
    #[error("channel closed unexpectedly")]
    ChannelClosed,

    /// Internal fault: metric registration, task join, or another
    /// infrastructure failure that is not attributable to the request.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Estimate the token count of a piece of text.
///
/// Uses the flat four-characters-per-token heuristic, floored at one token.
/// Applied wherever a backend does not report exact usage: cache savings,
/// prefix discounts, and simulated backends.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust
/// use tokio_inference_pipeline::estimate_tokens;
/// assert_eq!(estimate_tokens("abcdefgh"), 2);
/// assert_eq!(estimate_tokens(""), 1);
/// ```
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

/// Dimensional attribution tags carried by a request.
///
/// Every field is optional; whatever is present is copied verbatim onto the
/// request's terminal [`cost::CostEvent`] for downstream group-by queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestMetadata {
    /// End-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Conversation/session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Product feature that issued the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Experiment arm, if the request is part of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
    /// Calling application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    /// Deployment environment (`prod`, `staging`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Free-form tags merged into the cost event's dimensions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_tags: HashMap<String, String>,
}

/// An inference request submitted by a client.
///
/// Immutable once admitted: the pipeline never mutates a request after
/// [`pipeline::Pipeline::submit`] accepts it.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Unique identifier, used for trace correlation and cost attribution.
    pub request_id: String,
    /// The raw prompt text.
    pub prompt: String,
    /// Optional explicit model choice; bypasses tier selection but still
    /// respects circuit breakers and the fallback chain.
    pub model_hint: Option<String>,
    /// Declared priority: `express`, `standard`, or `batch`. Anything else
    /// is rejected with [`PipelineError::InvalidPriority`] at admission.
    pub priority: String,
    /// Caller latency budget in milliseconds. If it expires while the
    /// request is still queued, the request fails with
    /// [`PipelineError::DeadlineExceeded`].
    pub deadline_ms: Option<u64>,
    /// Master cache switch; `false` skips every tier, lookup and population.
    pub use_cache: bool,
    /// Opt-in for the semantic tier (consulted only when the exact tier
    /// misses).
    pub use_semantic_cache: bool,
    /// Maximum completion tokens requested from the backend.
    pub max_tokens: u32,
    /// Sampling temperature; participates in the exact-tier cache key.
    pub temperature: f64,
    /// Number of prior conversation turns, fed to the complexity estimator.
    pub context_depth: u32,
    /// Per-request TTL override for cache population, in seconds.
    pub cache_ttl_override_secs: Option<u64>,
    /// Attribution dimensions.
    pub metadata: RequestMetadata,
}

impl InferenceRequest {
    /// Create a request with defaults: generated UUID, `standard` priority,
    /// caching enabled, 512 max tokens, temperature 0.7.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokio_inference_pipeline::InferenceRequest;
    /// let req = InferenceRequest::new("Explain lifetimes").with_priority("express");
    /// assert_eq!(req.priority, "express");
    /// assert!(req.use_cache);
    /// ```
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            model_hint: None,
            priority: "standard".to_string(),
            deadline_ms: None,
            use_cache: true,
            use_semantic_cache: true,
            max_tokens: 512,
            temperature: 0.7,
            context_depth: 0,
            cache_ttl_override_secs: None,
            metadata: RequestMetadata::default(),
        }
    }

    /// Set the declared priority lane name.
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Pin the request to a specific model.
    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    /// Set the caller latency budget in milliseconds.
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Set the maximum completion tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enable or disable all caching for this request.
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Enable or disable the semantic tier for this request.
    pub fn with_semantic_cache(mut self, use_semantic_cache: bool) -> Self {
        self.use_semantic_cache = use_semantic_cache;
        self
    }

    /// Set the conversational depth signal for the complexity estimator.
    pub fn with_context_depth(mut self, depth: u32) -> Self {
        self.context_depth = depth;
        self
    }

    /// Override the cache-population TTL for this request.
    pub fn with_cache_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_override_secs = Some(ttl_secs);
        self
    }

    /// Attach attribution metadata.
    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Which cache tier served a request, if any.
///
/// `Prefix` is set only when a full prefix match skipped the backend call
/// entirely; a partial prefix match leaves this at `None` and surfaces as
/// a non-zero prefix saving on the cost event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHit {
    /// No tier served the request.
    None,
    /// Exact-digest tier hit.
    Exact,
    /// Semantic-similarity tier hit.
    Semantic,
    /// Full shared-prefix hit (backend call skipped).
    Prefix,
}

impl CacheHit {
    /// Label form used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHit::None => "none",
            CacheHit::Exact => "exact",
            CacheHit::Semantic => "semantic",
            CacheHit::Prefix => "prefix",
        }
    }
}

/// Token counts reported by (or estimated for) a backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens produced as completion.
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Construct usage from prompt and completion counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens across prompt and completion.
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Dollar totals attached to a single response.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CostSummary {
    /// Provider cost actually incurred, USD.
    pub base_cost: f64,
    /// Combined cache + routing + prefix savings, USD.
    pub savings: f64,
    /// `base_cost - savings`, floored at zero.
    pub net_cost: f64,
}

/// The pipeline's answer to one [`InferenceRequest`].
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    /// Identifier of the originating request.
    pub request_id: String,
    /// Generated (or cached) completion text.
    pub text: String,
    /// Model that produced the text, or the model the cached entry was
    /// produced by on a cache hit.
    pub model: String,
    /// Which cache tier served the request, if any.
    pub cache_hit: CacheHit,
    /// Token usage, backend-reported or estimated.
    pub usage: TokenUsage,
    /// Wall-clock latency from admission to completion, milliseconds.
    pub latency_ms: u64,
    /// Cost attribution for this request.
    pub cost: CostSummary,
}
