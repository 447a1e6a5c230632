//! Request complexity estimation.
//!
//! Analyses an [`InferenceRequest`] and produces a complexity score in the
//! range `0.0..=1.0`.  The score drives tier selection:
//!
//! | Score       | Tier     |
//! |-------------|----------|
//! | `< 0.3`     | Economy  |
//! | `0.3 – 0.7` | Standard |
//! | `> 0.7`     | Premium  |
//!
//! ## Signals
//!
//! 1. **Prompt length** — `min(1, chars / 2000)`
//! 2. **Reasoning markers** — distinct phrases like "analyze" or
//!    "step by step" — `min(1, hits / 3)`
//! 3. **Domain terms** — distinct technical vocabulary — `min(1, hits / 2)`
//! 4. **Conversation depth** — `0.5` once the exchange runs deeper than two
//!    turns, `0.0` otherwise
//! 5. **Requested output** — `min(1, max_tokens / 2000)`
//!
//! Each signal is multiplied by its configured weight.  Weights must sum to
//! 1.0, so the weighted sum lands in `[0.0, 1.0]` without rescaling.

use crate::config::ComplexityWeights;
use crate::{InferenceRequest, PipelineError};

/// Phrases whose presence suggests multi-step reasoning is wanted.
const REASONING_MARKERS: [&str; 13] = [
    "analyze",
    "explain",
    "compare",
    "evaluate",
    "argue",
    "reason",
    "deduce",
    "infer",
    "conclude",
    "synthesize",
    "step by step",
    "think through",
    "let me break down",
];

/// Vocabulary that flags domain-specific work.
const DOMAIN_TERMS: [&str; 12] = [
    "code",
    "programming",
    "algorithm",
    "mathematics",
    "science",
    "physics",
    "chemistry",
    "biology",
    "legal",
    "medical",
    "financial",
    "engineering",
];

/// Tolerance when checking that weights sum to 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// A request complexity estimator.
///
/// Stateless after construction and cheap to clone.  All analysis runs in
/// O(n) over the prompt text with no I/O.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone)]
pub struct ComplexityEstimator {
    weights: ComplexityWeights,
}

impl ComplexityEstimator {
    /// Create an estimator with the given per-signal weights.
    ///
    /// # Arguments
    ///
    /// * `weights` — Per-signal weights; must sum to 1.0.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidWeights`] when the weights do not sum
    /// to 1.0 within a small tolerance, so misconfiguration surfaces at
    /// startup rather than at the first scoring call.
    pub fn new(weights: ComplexityWeights) -> Result<Self, PipelineError> {
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PipelineError::InvalidWeights(sum));
        }
        Ok(Self { weights })
    }

    /// Score a request for complexity.
    ///
    /// # Arguments
    ///
    /// * `request` — The request to analyse.
    ///
    /// # Returns
    ///
    /// A `f64` in `[0.0, 1.0]`; higher means more complex.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tokio_inference_pipeline::config::ComplexityWeights;
    /// use tokio_inference_pipeline::routing::ComplexityEstimator;
    /// use tokio_inference_pipeline::InferenceRequest;
    ///
    /// let estimator = ComplexityEstimator::new(ComplexityWeights::default()).unwrap();
    /// let score = estimator.score(&InferenceRequest::new("Say hello"));
    /// assert!(score < 0.3);
    /// ```
    pub fn score(&self, request: &InferenceRequest) -> f64 {
        self.breakdown(request).total
    }

    /// Provide a breakdown of individual weighted signal contributions.
    ///
    /// Useful for debugging, logging, and transparency into tier selection.
    ///
    /// # Arguments
    ///
    /// * `request` — The request to analyse.
    ///
    /// # Returns
    ///
    /// A [`ComplexityBreakdown`] whose contribution fields sum to `total`.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn breakdown(&self, request: &InferenceRequest) -> ComplexityBreakdown {
        let lower = request.prompt.to_lowercase();

        let length = self.weights.length * Self::length_signal(&lower);
        let reasoning = self.weights.reasoning * Self::reasoning_signal(&lower);
        let domain = self.weights.domain * Self::domain_signal(&lower);
        let context = self.weights.context * Self::context_signal(request.context_depth);
        let output = self.weights.output * Self::output_signal(request.max_tokens);
        let total = clamp_score(length + reasoning + domain + context + output);

        ComplexityBreakdown {
            length,
            reasoning,
            domain,
            context,
            output,
            total,
        }
    }

    // ── Individual signals (raw, unweighted) ───────────────────────────

    /// Prompt length in characters, saturating at 2 000.
    fn length_signal(lower: &str) -> f64 {
        (lower.chars().count() as f64 / 2000.0).min(1.0)
    }

    /// Distinct reasoning markers present, saturating at three.
    fn reasoning_signal(lower: &str) -> f64 {
        let hits = REASONING_MARKERS
            .iter()
            .filter(|marker| lower.contains(*marker))
            .count();
        (hits as f64 / 3.0).min(1.0)
    }

    /// Distinct domain terms present, saturating at two.
    fn domain_signal(lower: &str) -> f64 {
        let hits = DOMAIN_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .count();
        (hits as f64 / 2.0).min(1.0)
    }

    /// Flat bonus once the conversation runs deeper than two turns.
    fn context_signal(context_depth: u32) -> f64 {
        if context_depth > 2 {
            0.5
        } else {
            0.0
        }
    }

    /// Requested completion budget, saturating at 2 000 tokens.
    fn output_signal(max_tokens: u32) -> f64 {
        (f64::from(max_tokens) / 2000.0).min(1.0)
    }
}

impl Default for ComplexityEstimator {
    /// Default weights always sum to 1.0, so this cannot fail.
    fn default() -> Self {
        Self {
            weights: ComplexityWeights::default(),
        }
    }
}

/// Clamp a raw score to the valid `[0.0, 1.0]` range.
fn clamp_score(raw: f64) -> f64 {
    raw.clamp(0.0, 1.0)
}

/// Breakdown of weighted complexity signal contributions.
///
/// Returned by [`ComplexityEstimator::breakdown`] for observability.  Each
/// field already includes its weight, so the five contributions sum to
/// `total`.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityBreakdown {
    /// Weighted contribution of the prompt-length signal.
    pub length: f64,
    /// Weighted contribution of the reasoning-marker signal.
    pub reasoning: f64,
    /// Weighted contribution of the domain-term signal.
    pub domain: f64,
    /// Weighted contribution of the conversation-depth signal.
    pub context: f64,
    /// Weighted contribution of the requested-output signal.
    pub output: f64,
    /// Final clamped score in `[0.0, 1.0]`.
    pub total: f64,
}

// ── Tests ──────────────────────────────────────────────────────────────
