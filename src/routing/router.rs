//! Cost-aware model selection.
//!
//! The [`ModelRouter`] combines a
//! [`ComplexityEstimator`](super::ComplexityEstimator) with the tier
//! breakpoints from [`RoutingConfig`](crate::config::RoutingConfig) to build
//! a [`RoutePlan`] for each request: a primary model plus an ordered fallback
//! chain.
//!
//! Planning is pure — no I/O, no awaits — so the same request always yields
//! the same plan. Availability is the executor's concern: it re-checks each
//! candidate's [`CircuitBreaker`](super::CircuitBreaker) at attempt time and
//! walks past models whose circuit is open.

use std::cmp::Ordering;

use tracing::warn;

use crate::config::{ModelSpec, ModelTier, RoutingConfig};
use crate::{InferenceRequest, PipelineError};

use super::breaker::BreakerRegistry;
use super::estimator::ComplexityEstimator;

/// Static model catalogue, in configured order.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    /// Build a registry from configured model specs, keeping their order.
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    /// Look up a model by name.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    /// All models, cheapest first.
    ///
    /// Cost is compared on combined prompt + completion price per 1 000
    /// tokens. The sort is stable, so equally priced models keep their
    /// configured order.
    pub fn by_price(&self) -> Vec<&ModelSpec> {
        let mut sorted: Vec<&ModelSpec> = self.models.iter().collect();
        sorted.sort_by(|a, b| {
            blended_price(a)
                .partial_cmp(&blended_price(b))
                .unwrap_or(Ordering::Equal)
        });
        sorted
    }

    /// Models in `tier`, cheapest first.
    pub fn tier_by_price(&self, tier: ModelTier) -> Vec<&ModelSpec> {
        self.by_price().into_iter().filter(|m| m.tier == tier).collect()
    }

    /// The priciest premium model — the baseline for routing-savings
    /// attribution.
    pub fn premium_reference(&self) -> Option<&ModelSpec> {
        self.models
            .iter()
            .filter(|m| m.tier == ModelTier::Premium)
            .max_by(|a, b| {
                blended_price(a)
                    .partial_cmp(&blended_price(b))
                    .unwrap_or(Ordering::Equal)
            })
    }

    /// Configured specs in original order.
    pub fn specs(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry has no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Combined per-1k price used for cheapest-first ordering.
fn blended_price(spec: &ModelSpec) -> f64 {
    spec.prompt_price_per_1k + spec.completion_price_per_1k
}

/// The attempt list planned for a single request.
///
/// `candidates` holds model names in attempt order — primary first — and is
/// capped at `1 + max_fallback_hops` entries.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Complexity score that drove tier selection.
    pub score: f64,
    /// Tier the score mapped to.
    pub tier: ModelTier,
    /// Model names in attempt order.
    pub candidates: Vec<String>,
    /// Whether an explicit model hint pinned the primary.
    pub pinned: bool,
}

impl RoutePlan {
    /// The first model to attempt, if any model is registered.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn primary(&self) -> Option<&str> {
        self.candidates.first().map(String::as_str)
    }

    /// Models to try after the primary, in order.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn fallbacks(&self) -> &[String] {
        self.candidates.get(1..).unwrap_or(&[])
    }
}

/// Cost-aware model router.
///
/// Scores each request, maps the score onto a capability tier, and plans an
/// ordered attempt list: the tier's models cheapest-first, then the rest of
/// the catalogue cheapest-first. An explicit model hint replaces the tier
/// choice but keeps the fallback chain.
///
/// Thread-safe: the router is immutable after construction apart from the
/// breaker registry, which uses interior locking. Share it behind an `Arc`.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug)]
pub struct ModelRouter {
    estimator: ComplexityEstimator,
    registry: ModelRegistry,
    breakers: BreakerRegistry,
    config: RoutingConfig,
}

impl ModelRouter {
    /// Create a router from routing settings and the model catalogue.
    ///
    /// # Arguments
    ///
    /// * `config` — Weights, tier breakpoints, fallback and breaker settings.
    /// * `models` — The model catalogue, in configured order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidWeights`] when the complexity weights
    /// do not sum to 1.0.
    pub fn new(config: RoutingConfig, models: Vec<ModelSpec>) -> Result<Self, PipelineError> {
        let estimator = ComplexityEstimator::new(config.weights)?;
        Ok(Self {
            estimator,
            registry: ModelRegistry::new(models),
            breakers: BreakerRegistry::new(config.breaker),
            config,
        })
    }

    /// Plan the attempt list for a request.
    ///
    /// # Arguments
    ///
    /// * `request` — The request to route.
    ///
    /// # Returns
    ///
    /// A [`RoutePlan`] whose candidate list is capped at
    /// `1 + max_fallback_hops` models.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn plan(&self, request: &InferenceRequest) -> RoutePlan {
        let score = self.estimator.score(request);
        let tier = self.tier_for(score);
        let cap = self.config.max_fallback_hops as usize + 1;

        if let Some(hint) = request.model_hint.as_deref() {
            if self.registry.get(hint).is_some() {
                let mut candidates = vec![hint.to_string()];
                for spec in self.registry.by_price() {
                    if candidates.len() >= cap {
                        break;
                    }
                    if spec.name != hint {
                        candidates.push(spec.name.clone());
                    }
                }
                return RoutePlan {
                    score,
                    tier,
                    candidates,
                    pinned: true,
                };
            }
            warn!(model = hint, "model hint not in registry, using tier routing");
        }

        let mut candidates: Vec<String> = Vec::with_capacity(cap);
        for spec in self.registry.tier_by_price(tier) {
            if candidates.len() >= cap {
                break;
            }
            candidates.push(spec.name.clone());
        }
        for spec in self.registry.by_price() {
            if candidates.len() >= cap {
                break;
            }
            if !candidates.iter().any(|name| name == &spec.name) {
                candidates.push(spec.name.clone());
            }
        }

        RoutePlan {
            score,
            tier,
            candidates,
            pinned: false,
        }
    }

    /// Map a complexity score onto a capability tier.
    ///
    /// Scores strictly below `economy_below` go economy; scores strictly
    /// above `premium_above` go premium; the band between is standard,
    /// boundaries included.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn tier_for(&self, score: f64) -> ModelTier {
        if score < self.config.economy_below {
            ModelTier::Economy
        } else if score > self.config.premium_above {
            ModelTier::Premium
        } else {
            ModelTier::Standard
        }
    }

    /// The model catalogue.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Per-model circuit breakers.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The complexity estimator, for external breakdown queries.
    pub fn estimator(&self) -> &ComplexityEstimator {
        &self.estimator
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn default_models() -> Vec<ModelSpec> {
        PipelineConfig::default().models
    }

    fn default_router() -> ModelRouter {
        ModelRouter::new(RoutingConfig::default(), default_models()).unwrap()
    }

    fn premium_prompt() -> InferenceRequest {
        let prompt = "analyze and explain then compare the physics and chemistry data ".repeat(40);
        InferenceRequest::new(prompt)
            .with_context_depth(4)
            .with_max_tokens(2000)
    }

    // -- registry ----------------------------------------------------------

    #[test]
    fn test_registry_lookup_by_name() {
        let registry = ModelRegistry::new(default_models());
        assert!(registry.get("gpt-4").is_some());
        assert!(registry.get("gpt-5").is_none());
    }

    #[test]
    fn test_registry_by_price_cheapest_first() {
        let registry = ModelRegistry::new(default_models());
        let names: Vec<&str> = registry.by_price().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["gpt-3.5-turbo", "claude-3-sonnet", "claude-3-opus", "gpt-4"],
            "equal blended prices keep configured order"
        );
    }

    #[test]
    fn test_registry_tier_by_price_filters() {
        let registry = ModelRegistry::new(default_models());
        let premium: Vec<&str> = registry
            .tier_by_price(ModelTier::Premium)
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(premium, vec!["claude-3-opus", "gpt-4"]);
    }

    #[test]
    fn test_registry_premium_reference_is_priciest() {
        let registry = ModelRegistry::new(default_models());
        let reference = registry.premium_reference().unwrap();
        assert_eq!(reference.name, "gpt-4");
    }

    #[test]
    fn test_registry_premium_reference_absent_without_premium_models() {
        let models: Vec<ModelSpec> = default_models()
            .into_iter()
            .filter(|m| m.tier != ModelTier::Premium)
            .collect();
        let registry = ModelRegistry::new(models);
        assert!(registry.premium_reference().is_none());
    }

    #[test]
    fn test_registry_len_and_is_empty() {
        let registry = ModelRegistry::new(default_models());
        assert_eq!(registry.len(), 4);
        assert!(!registry.is_empty());
        assert!(ModelRegistry::new(Vec::new()).is_empty());
    }

    // -- tier mapping --------------------------------------------------------

    #[test]
    fn test_tier_breakpoints() {
        let router = default_router();
        assert_eq!(router.tier_for(0.0), ModelTier::Economy);
        assert_eq!(router.tier_for(0.29), ModelTier::Economy);
        assert_eq!(router.tier_for(0.3), ModelTier::Standard, "lower bound is inclusive");
        assert_eq!(router.tier_for(0.5), ModelTier::Standard);
        assert_eq!(router.tier_for(0.7), ModelTier::Standard, "upper bound is inclusive");
        assert_eq!(router.tier_for(0.71), ModelTier::Premium);
        assert_eq!(router.tier_for(1.0), ModelTier::Premium);
    }

    // -- planning --------------------------------------------------------------

    #[test]
    fn test_plan_simple_prompt_picks_cheapest_economy_model() {
        let router = default_router();
        let plan = router.plan(&InferenceRequest::new("Say hello"));
        assert_eq!(plan.tier, ModelTier::Economy);
        assert_eq!(plan.primary(), Some("gpt-3.5-turbo"));
        assert!(!plan.pinned);
        assert!(plan.score < 0.3);
    }

    #[test]
    fn test_plan_loaded_prompt_picks_premium_tier() {
        let router = default_router();
        let plan = router.plan(&premium_prompt());
        assert_eq!(plan.tier, ModelTier::Premium);
        assert_eq!(
            plan.primary(),
            Some("claude-3-opus"),
            "cheapest premium model leads; the blended-price tie keeps configured order"
        );
        assert!(plan.score > 0.7);
    }

    #[test]
    fn test_plan_fallback_chain_covers_other_tiers() {
        let router = default_router();
        let plan = router.plan(&InferenceRequest::new("Say hello"));
        assert_eq!(
            plan.candidates,
            vec!["gpt-3.5-turbo", "claude-3-sonnet", "claude-3-opus", "gpt-4"],
            "after the tier, the rest of the catalogue follows cheapest-first"
        );
        assert_eq!(plan.fallbacks().len(), 3);
    }

    #[test]
    fn test_plan_candidates_capped_by_max_fallback_hops() {
        let config = RoutingConfig {
            max_fallback_hops: 1,
            ..RoutingConfig::default()
        };
        let router = ModelRouter::new(config, default_models()).unwrap();
        let plan = router.plan(&InferenceRequest::new("Say hello"));
        assert_eq!(plan.candidates.len(), 2);
    }

    #[test]
    fn test_plan_zero_hops_yields_single_candidate() {
        let config = RoutingConfig {
            max_fallback_hops: 0,
            ..RoutingConfig::default()
        };
        let router = ModelRouter::new(config, default_models()).unwrap();
        let plan = router.plan(&InferenceRequest::new("Say hello"));
        assert_eq!(plan.candidates, vec!["gpt-3.5-turbo"]);
        assert!(plan.fallbacks().is_empty());
    }

    #[test]
    fn test_plan_empty_registry_yields_no_candidates() {
        let router = ModelRouter::new(RoutingConfig::default(), Vec::new()).unwrap();
        let plan = router.plan(&InferenceRequest::new("Say hello"));
        assert!(plan.candidates.is_empty());
        assert!(plan.primary().is_none());
    }

    // -- model hints --------------------------------------------------------

    #[test]
    fn test_model_hint_pins_primary_regardless_of_score() {
        let router = default_router();
        let request = InferenceRequest::new("Say hello").with_model_hint("gpt-4");
        let plan = router.plan(&request);
        assert!(plan.pinned);
        assert_eq!(plan.primary(), Some("gpt-4"));
        // The score still reflects the request, not the hint.
        assert_eq!(plan.tier, ModelTier::Economy);
    }

    #[test]
    fn test_model_hint_keeps_fallback_chain() {
        let router = default_router();
        let request = InferenceRequest::new("Say hello").with_model_hint("gpt-4");
        let plan = router.plan(&request);
        assert_eq!(
            plan.candidates,
            vec!["gpt-4", "gpt-3.5-turbo", "claude-3-sonnet", "claude-3-opus"]
        );
    }

    #[test]
    fn test_unknown_model_hint_falls_back_to_tier_routing() {
        let router = default_router();
        let request = InferenceRequest::new("Say hello").with_model_hint("gpt-5");
        let plan = router.plan(&request);
        assert!(!plan.pinned);
        assert_eq!(plan.primary(), Some("gpt-3.5-turbo"));
    }

    // -- construction ---------------------------------------------------------

    #[test]
    fn test_invalid_weights_rejected_at_construction() {
        let config = RoutingConfig {
            weights: crate::config::ComplexityWeights {
                length: 0.9,
                reasoning: 0.9,
                domain: 0.0,
                context: 0.0,
                output: 0.0,
            },
            ..RoutingConfig::default()
        };
        let err = ModelRouter::new(config, default_models()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWeights(_)));
    }

    // -- determinism ------------------------------------------------------------

    #[test]
    fn test_plan_is_deterministic() {
        let router = default_router();
        let request = premium_prompt();
        assert_eq!(router.plan(&request), router.plan(&request));
    }
}
