//! # Declarative Pipeline Configuration
//!
//! ## Responsibility
//! Parse and validate TOML configuration for the inference pipeline:
//! lane SLAs, batching bounds, cache tiers, routing weights and
//! breakpoints, the model price table, and observability switches.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `PipelineConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Type-safe: invalid field combinations are caught at parse time via serde
//! - Immutable: components receive the config by value at construction and
//!   never consult ambient process state afterwards
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the runtime pipeline from config (that belongs to `pipeline`)
//! - Scoring or routing decisions (that belongs to `routing`)
//! - Metrics collection (that belongs to `metrics`)

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::lanes::Lane;

// ── Default value functions ──────────────────────────────────────────────

/// Default express-lane tuning: 10ms window, 50ms SLA, batches capped at 4.
fn default_express_lane() -> LaneConfig {
    LaneConfig {
        max_wait_ms: 10,
        sla_ms: Some(50),
        max_batch: Some(4),
        target_latency_ms: None,
    }
}

/// Default standard-lane tuning: 50ms window, 200ms SLA.
fn default_standard_lane() -> LaneConfig {
    LaneConfig {
        max_wait_ms: 50,
        sla_ms: Some(200),
        max_batch: None,
        target_latency_ms: None,
    }
}

/// Default batch-lane tuning: 500ms window, best-effort SLA.
fn default_batch_lane() -> LaneConfig {
    LaneConfig {
        max_wait_ms: 500,
        sla_ms: None,
        max_batch: None,
        target_latency_ms: None,
    }
}

/// Default generic lane window: 50ms.
fn default_max_wait_ms() -> u64 {
    50
}

/// Default minimum batch size.
fn default_min_batch() -> usize {
    4
}

/// Default maximum batch size.
fn default_max_batch() -> usize {
    64
}

/// Default target p95 latency for the batch control law: 100ms.
fn default_target_latency_ms() -> u64 {
    100
}

/// Default rolling latency sample count.
fn default_latency_window() -> usize {
    100
}

/// Default per-tier cache capacity.
fn default_cache_capacity() -> usize {
    10_000
}

/// Default exact-tier TTL: 1 hour.
fn default_cache_ttl_secs() -> u64 {
    3_600
}

/// Default semantic similarity acceptance threshold.
fn default_similarity_threshold() -> f64 {
    0.92
}

/// Default semantic freshness bound: 24 hours.
fn default_semantic_max_age_secs() -> u64 {
    86_400
}

/// Default semantic popularity floor.
fn default_min_access_count() -> u64 {
    3
}

/// Default embedding dimension for the in-memory index.
fn default_embedding_dim() -> usize {
    64
}

/// Default minimum registered-prefix length in characters.
fn default_min_prefix_chars() -> usize {
    64
}

/// Default prefix-index capacity.
fn default_prefix_capacity() -> usize {
    1_024
}

/// Default complexity-score breakpoint below which the economy tier is used.
fn default_economy_below() -> f64 {
    0.3
}

/// Default complexity-score breakpoint above which the premium tier is used.
fn default_premium_above() -> f64 {
    0.7
}

/// Default maximum fallback hops after the primary model.
fn default_max_fallback_hops() -> u32 {
    3
}

/// Default consecutive failures before a circuit opens.
fn default_failure_threshold() -> u32 {
    5
}

/// Default circuit cool-down before a half-open probe: 30 seconds.
fn default_cooldown_secs() -> u64 {
    30
}

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

/// Default model price table.
///
/// Prices are USD per 1 000 tokens, split prompt/completion.
fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            name: "gpt-3.5-turbo".to_string(),
            tier: ModelTier::Economy,
            prompt_price_per_1k: 0.0015,
            completion_price_per_1k: 0.002,
        },
        ModelSpec {
            name: "claude-3-sonnet".to_string(),
            tier: ModelTier::Standard,
            prompt_price_per_1k: 0.003,
            completion_price_per_1k: 0.015,
        },
        ModelSpec {
            name: "claude-3-opus".to_string(),
            tier: ModelTier::Premium,
            prompt_price_per_1k: 0.015,
            completion_price_per_1k: 0.075,
        },
        ModelSpec {
            name: "gpt-4".to_string(),
            tier: ModelTier::Premium,
            prompt_price_per_1k: 0.03,
            completion_price_per_1k: 0.06,
        },
    ]
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a pipeline instance.
///
/// Deserialized from a TOML file and validated before use. Every section
/// has documented defaults, so an empty document is a valid configuration.
///
/// # Example
///
/// ```toml
/// [lanes.express]
/// max_wait_ms = 10
/// sla_ms = 50
/// max_batch = 4
///
/// [batching]
/// min_size = 4
/// max_size = 64
///
/// [[models]]
/// name = "gpt-4"
/// tier = "premium"
/// prompt_price_per_1k = 0.03
/// completion_price_per_1k = 0.06
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PipelineConfig {
    /// Per-lane window and SLA tuning.
    #[serde(default)]
    pub lanes: LanesConfig,
    /// Adaptive batch scheduler bounds and targets.
    #[serde(default)]
    pub batching: BatchingConfig,
    /// Cache tier settings: exact, semantic, prefix.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Complexity weights, tier breakpoints, fallback and breaker settings.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Model registry: names, tiers, prices.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
    /// Observability: logging format, metrics switch.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lanes: LanesConfig::default(),
            batching: BatchingConfig::default(),
            cache: CacheConfig::default(),
            routing: RoutingConfig::default(),
            models: default_models(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// ── Lanes ────────────────────────────────────────────────────────────────

/// Window and SLA tuning for the three priority lanes.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LanesConfig {
    /// Express lane: latency-sensitive interactive traffic.
    #[serde(default = "default_express_lane")]
    pub express: LaneConfig,
    /// Standard lane: the default for most requests.
    #[serde(default = "default_standard_lane")]
    pub standard: LaneConfig,
    /// Batch lane: throughput-oriented background work.
    #[serde(default = "default_batch_lane")]
    pub batch: LaneConfig,
}

impl LanesConfig {
    /// Tuning parameters for one lane.
    pub fn params(&self, lane: Lane) -> &LaneConfig {
        match lane {
            Lane::Express => &self.express,
            Lane::Standard => &self.standard,
            Lane::Batch => &self.batch,
        }
    }
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            express: default_express_lane(),
            standard: default_standard_lane(),
            batch: default_batch_lane(),
        }
    }
}

/// Tuning for one priority lane.
///
/// The field defaults here are generic; [`LanesConfig`] supplies the
/// per-lane defaults (express 10ms/50ms/cap 4, standard 50ms/200ms,
/// batch 500ms/best-effort).
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LaneConfig {
    /// Maximum time (ms) a batch window stays open before the timer forces
    /// its release.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Queue SLA (ms): the longest a request may wait in this lane before
    /// failing with a deadline error. `None` means best-effort.
    #[serde(default)]
    pub sla_ms: Option<u64>,
    /// Per-lane cap on batch size, applied on top of the global maximum.
    #[serde(default)]
    pub max_batch: Option<usize>,
    /// Per-lane override of the control-law target latency (ms).
    #[serde(default)]
    pub target_latency_ms: Option<u64>,
}

// ── Batching ─────────────────────────────────────────────────────────────

/// Adaptive batch scheduler bounds and control-law targets.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BatchingConfig {
    /// Lower bound on the adaptive target batch size. Always ≥ 1.
    #[serde(default = "default_min_batch")]
    pub min_size: usize,
    /// Upper bound on the adaptive target batch size.
    #[serde(default = "default_max_batch")]
    pub max_size: usize,
    /// Latency target (ms) the control law steers toward.
    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,
    /// Number of recent batch latencies kept for the rolling p95 estimate.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_batch(),
            max_size: default_max_batch(),
            target_latency_ms: default_target_latency_ms(),
            latency_window: default_latency_window(),
        }
    }
}

// ── Cache tiers ──────────────────────────────────────────────────────────

/// Settings for the three cache tiers.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheConfig {
    /// Exact-digest tier.
    #[serde(default)]
    pub exact: ExactCacheConfig,
    /// Semantic-similarity tier.
    #[serde(default)]
    pub semantic: SemanticCacheConfig,
    /// Shared-prefix tier.
    #[serde(default)]
    pub prefix: PrefixCacheConfig,
}

/// Exact-digest tier settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ExactCacheConfig {
    /// Whether the exact tier is consulted and populated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum entries before eviction.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry TTL in seconds; per-request overrides take precedence.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Victim selection policy when capacity is exceeded.
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl Default for ExactCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Semantic-similarity tier settings.
///
/// A candidate entry is accepted only when similarity, freshness, and
/// popularity all pass — the triple gate keeps one-off entries from being
/// replayed to other users.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SemanticCacheConfig {
    /// Whether the semantic tier is consulted and populated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum cosine similarity for acceptance.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Maximum entry age (seconds) for acceptance.
    #[serde(default = "default_semantic_max_age_secs")]
    pub max_age_secs: u64,
    /// Minimum prior access count for acceptance.
    #[serde(default = "default_min_access_count")]
    pub min_access_count: u64,
    /// Maximum entries before eviction.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Embedding dimension of the in-memory index.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Victim selection policy when capacity is exceeded.
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            max_age_secs: default_semantic_max_age_secs(),
            min_access_count: default_min_access_count(),
            capacity: default_cache_capacity(),
            embedding_dim: default_embedding_dim(),
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Shared-prefix tier settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PrefixCacheConfig {
    /// Whether the prefix tier is consulted and populated.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shortest prefix (characters) worth registering.
    #[serde(default = "default_min_prefix_chars")]
    pub min_prefix_chars: usize,
    /// Maximum registered prefixes before eviction.
    #[serde(default = "default_prefix_capacity")]
    pub capacity: usize,
}

impl Default for PrefixCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_prefix_chars: default_min_prefix_chars(),
            capacity: default_prefix_capacity(),
        }
    }
}

/// Victim selection policy for a full cache tier.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least-recently-accessed entry.
    #[default]
    Lru,
    /// Evict the least-frequently-accessed entry.
    Lfu,
    /// Evict expired entries first, then the oldest.
    Ttl,
    /// Evict the entry with the lowest savings-per-age ratio.
    CostAware,
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Complexity weights, tier breakpoints, fallback and breaker settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoutingConfig {
    /// Per-signal weights for the complexity estimator. Must sum to 1.0.
    #[serde(default)]
    pub weights: ComplexityWeights,
    /// Scores strictly below this use the economy tier.
    #[serde(default = "default_economy_below")]
    pub economy_below: f64,
    /// Scores strictly above this use the premium tier.
    #[serde(default = "default_premium_above")]
    pub premium_above: f64,
    /// Maximum fallback hops after the primary model fails.
    #[serde(default = "default_max_fallback_hops")]
    pub max_fallback_hops: u32,
    /// Per-model circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: ComplexityWeights::default(),
            economy_below: default_economy_below(),
            premium_above: default_premium_above(),
            max_fallback_hops: default_max_fallback_hops(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Per-signal weights for the complexity estimator.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ComplexityWeights {
    /// Weight of the prompt-length signal.
    pub length: f64,
    /// Weight of the reasoning-keyword signal.
    pub reasoning: f64,
    /// Weight of the domain-term signal.
    pub domain: f64,
    /// Weight of the conversational-depth signal.
    pub context: f64,
    /// Weight of the requested-output-length signal.
    pub output: f64,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            length: 0.20,
            reasoning: 0.30,
            domain: 0.20,
            context: 0.15,
            output: 0.15,
        }
    }
}

impl ComplexityWeights {
    /// Sum of all five weights.
    pub fn sum(&self) -> f64 {
        self.length + self.reasoning + self.domain + self.context + self.output
    }
}

/// Per-model circuit breaker settings.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before allowing a half-open probe.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

// ── Models ───────────────────────────────────────────────────────────────

/// Capability tier a model belongs to.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheapest models, for low-complexity requests.
    Economy,
    /// Mid-range models.
    Standard,
    /// Most capable (and most expensive) models.
    Premium,
}

impl ModelTier {
    /// Label form used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Economy => "economy",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
        }
    }
}

/// Static registry entry for one backend model.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ModelSpec {
    /// Model identifier, matched against registered backend clients.
    pub name: String,
    /// Capability tier.
    pub tier: ModelTier,
    /// Prompt price, USD per 1 000 tokens.
    pub prompt_price_per_1k: f64,
    /// Completion price, USD per 1 000 tokens.
    pub completion_price_per_1k: f64,
}

// ── Observability ────────────────────────────────────────────────────────

/// Observability configuration: logging format and metrics switch.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Whether the Prometheus registry is initialised at startup.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics_enabled: true,
        }
    }
}

/// Default log format: pretty.
fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Log output format.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

/// Export the JSON Schema for `PipelineConfig`.
///
/// This enables IDE autocomplete when editing TOML config files.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(PipelineConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_express_lane_values() {
        let lane = default_express_lane();
        assert_eq!(lane.max_wait_ms, 10);
        assert_eq!(lane.sla_ms, Some(50));
        assert_eq!(lane.max_batch, Some(4));
    }

    #[test]
    fn test_default_standard_lane_values() {
        let lane = default_standard_lane();
        assert_eq!(lane.max_wait_ms, 50);
        assert_eq!(lane.sla_ms, Some(200));
        assert_eq!(lane.max_batch, None);
    }

    #[test]
    fn test_default_batch_lane_is_best_effort() {
        let lane = default_batch_lane();
        assert_eq!(lane.max_wait_ms, 500);
        assert_eq!(lane.sla_ms, None);
    }

    #[test]
    fn test_default_batching_bounds() {
        let batching = BatchingConfig::default();
        assert_eq!(batching.min_size, 4);
        assert_eq!(batching.max_size, 64);
        assert_eq!(batching.target_latency_ms, 100);
        assert_eq!(batching.latency_window, 100);
    }

    #[test]
    fn test_default_similarity_threshold_returns_092() {
        assert!((default_similarity_threshold() - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_semantic_gates() {
        let semantic = SemanticCacheConfig::default();
        assert_eq!(semantic.max_age_secs, 86_400);
        assert_eq!(semantic.min_access_count, 3);
    }

    #[test]
    fn test_default_breaker_values() {
        let breaker = BreakerConfig::default();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.cooldown_secs, 30);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = ComplexityWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_models_cover_all_tiers() {
        let models = default_models();
        assert_eq!(models.len(), 4);
        for tier in [ModelTier::Economy, ModelTier::Standard, ModelTier::Premium] {
            assert!(
                models.iter().any(|m| m.tier == tier),
                "no model in tier {tier:?}"
            );
        }
    }

    #[test]
    fn test_lanes_params_maps_each_lane() {
        let lanes = LanesConfig::default();
        assert_eq!(lanes.params(Lane::Express).max_wait_ms, 10);
        assert_eq!(lanes.params(Lane::Standard).max_wait_ms, 50);
        assert_eq!(lanes.params(Lane::Batch).max_wait_ms, 500);
    }

    #[test]
    fn test_eviction_policy_serializes_to_snake_case() {
        let json = serde_json::to_string(&EvictionPolicy::CostAware).expect("test: serialization");
        assert_eq!(json, "\"cost_aware\"");
    }

    #[test]
    fn test_eviction_policy_deserializes_from_snake_case() {
        let policy: EvictionPolicy =
            serde_json::from_str("\"lfu\"").expect("test: deserialization");
        assert_eq!(policy, EvictionPolicy::Lfu);
    }

    #[test]
    fn test_model_tier_serializes_to_snake_case() {
        let json = serde_json::to_string(&ModelTier::Premium).expect("test: serialization");
        assert_eq!(json, "\"premium\"");
    }

    #[test]
    fn test_log_format_deserializes_from_snake_case() {
        let fmt: LogFormat = serde_json::from_str("\"json\"").expect("test: deserialization");
        assert_eq!(fmt, LogFormat::Json);
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: schema export");
        let parsed: serde_json::Value =
            serde_json::from_str(&schema).expect("test: schema is valid JSON");
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
    }

    #[test]
    fn test_empty_toml_is_a_valid_config() {
        let config: PipelineConfig = toml::from_str("").expect("test: empty TOML parses");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.lanes.express.max_wait_ms, 10);
        assert_eq!(config.models.len(), 4);
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let toml_str = r#"
[batching]
min_size = 2
max_size = 16
"#;
        let config: PipelineConfig = toml::from_str(toml_str).expect("test: partial TOML parses");
        assert_eq!(config.batching.min_size, 2);
        assert_eq!(config.batching.max_size, 16);
        // Untouched sections keep their defaults.
        assert_eq!(config.batching.target_latency_ms, 100);
        assert_eq!(config.cache.semantic.min_access_count, 3);
        assert_eq!(config.routing.max_fallback_hops, 3);
    }

    #[test]
    fn test_full_toml_parses() {
        let toml_str = r#"
[lanes.express]
max_wait_ms = 8
sla_ms = 40
max_batch = 2

[lanes.standard]
max_wait_ms = 60
sla_ms = 250

[lanes.batch]
max_wait_ms = 1000

[batching]
min_size = 1
max_size = 32
target_latency_ms = 80
latency_window = 50

[cache.exact]
capacity = 500
ttl_secs = 900
eviction = "lfu"

[cache.semantic]
enabled = true
similarity_threshold = 0.95
max_age_secs = 3600
min_access_count = 5
capacity = 200
embedding_dim = 32

[cache.prefix]
enabled = false

[routing]
economy_below = 0.25
premium_above = 0.75
max_fallback_hops = 2

[routing.weights]
length = 0.2
reasoning = 0.3
domain = 0.2
context = 0.15
output = 0.15

[routing.breaker]
failure_threshold = 3
cooldown_secs = 10

[[models]]
name = "tiny"
tier = "economy"
prompt_price_per_1k = 0.0001
completion_price_per_1k = 0.0002

[[models]]
name = "big"
tier = "premium"
prompt_price_per_1k = 0.02
completion_price_per_1k = 0.05

[observability]
log_format = "json"
metrics_enabled = false
"#;
        let config: PipelineConfig = toml::from_str(toml_str).expect("test: full TOML parses");
        assert_eq!(config.lanes.express.max_wait_ms, 8);
        assert_eq!(config.lanes.express.max_batch, Some(2));
        assert_eq!(config.cache.exact.eviction, EvictionPolicy::Lfu);
        assert!((config.cache.semantic.similarity_threshold - 0.95).abs() < f64::EPSILON);
        assert!(!config.cache.prefix.enabled);
        assert_eq!(config.routing.max_fallback_hops, 2);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].tier, ModelTier::Premium);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("test: serialize to TOML");
        let deserialized: PipelineConfig =
            toml::from_str(&toml_str).expect("test: deserialize from TOML");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).expect("test: serialize to JSON");
        let deserialized: PipelineConfig =
            serde_json::from_str(&json).expect("test: deserialize from JSON");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_all_eviction_policies_roundtrip_toml() {
        // TOML requires a table wrapper for enum serialization
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            policy: EvictionPolicy,
        }

        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Ttl,
            EvictionPolicy::CostAware,
        ] {
            let w = Wrapper { policy };
            let s = toml::to_string(&w).expect("test: serialize policy");
            let deserialized: Wrapper = toml::from_str(&s).expect("test: deserialize policy");
            assert_eq!(w, deserialized);
        }
    }

    #[test]
    fn test_lane_config_defaults_applied_when_omitted() {
        let toml_str = r#"
max_wait_ms = 25
"#;
        let lane: LaneConfig = toml::from_str(toml_str).expect("test: parse with defaults");
        assert_eq!(lane.max_wait_ms, 25);
        assert!(lane.sla_ms.is_none());
        assert!(lane.max_batch.is_none());
    }
}
