//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`PipelineConfig`] that cannot
//! be expressed through the type system alone (e.g., range checks, cross-field
//! invariants such as the complexity weights summing to 1.0).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::PipelineConfig;

/// Tolerance used when checking that the complexity weights sum to 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "batching.min_size").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for crate::PipelineError {
    fn from(e: ConfigError) -> Self {
        crate::PipelineError::Config(e.to_string())
    }
}

/// Validate all semantic constraints on a [`PipelineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Arguments
///
/// * `config` — The parsed config to validate.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &PipelineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Lanes ────────────────────────────────────────────────────────
    for (name, lane) in [
        ("lanes.express", &config.lanes.express),
        ("lanes.standard", &config.lanes.standard),
        ("lanes.batch", &config.lanes.batch),
    ] {
        if lane.max_wait_ms == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("{name}.max_wait_ms"),
                value: "0".into(),
                reason: "must be at least 1ms".into(),
            });
        }
        if lane.max_batch == Some(0) {
            errors.push(ConfigError::InvalidField {
                field: format!("{name}.max_batch"),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
    }

    // ── Batching ─────────────────────────────────────────────────────
    if config.batching.min_size == 0 {
        errors.push(ConfigError::InvalidField {
            field: "batching.min_size".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.batching.min_size > config.batching.max_size {
        errors.push(ConfigError::InvalidField {
            field: "batching.min_size".into(),
            value: config.batching.min_size.to_string(),
            reason: "must be \u{2264} batching.max_size".into(),
        });
    }

    if config.batching.target_latency_ms == 0 {
        errors.push(ConfigError::InvalidField {
            field: "batching.target_latency_ms".into(),
            value: "0".into(),
            reason: "must be at least 1ms".into(),
        });
    }

    if config.batching.latency_window == 0 {
        errors.push(ConfigError::InvalidField {
            field: "batching.latency_window".into(),
            value: "0".into(),
            reason: "must be at least 1 sample".into(),
        });
    }

    // ── Complexity weights ───────────────────────────────────────────
    let weights = &config.routing.weights;
    for (name, value) in [
        ("routing.weights.length", weights.length),
        ("routing.weights.reasoning", weights.reasoning),
        ("routing.weights.domain", weights.domain),
        ("routing.weights.context", weights.context),
        ("routing.weights.output", weights.output),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::InvalidField {
                field: name.into(),
                value: value.to_string(),
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
    }

    let sum = weights.sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        errors.push(ConfigError::InvalidField {
            field: "routing.weights".into(),
            value: sum.to_string(),
            reason: "weights must sum to 1.0".into(),
        });
    }

    // ── Tier breakpoints ─────────────────────────────────────────────
    if !(0.0..=1.0).contains(&config.routing.economy_below) {
        errors.push(ConfigError::InvalidField {
            field: "routing.economy_below".into(),
            value: config.routing.economy_below.to_string(),
            reason: "must be between 0.0 and 1.0".into(),
        });
    }

    if !(0.0..=1.0).contains(&config.routing.premium_above) {
        errors.push(ConfigError::InvalidField {
            field: "routing.premium_above".into(),
            value: config.routing.premium_above.to_string(),
            reason: "must be between 0.0 and 1.0".into(),
        });
    }

    if config.routing.economy_below > config.routing.premium_above {
        errors.push(ConfigError::InvalidField {
            field: "routing.economy_below".into(),
            value: config.routing.economy_below.to_string(),
            reason: "must be \u{2264} routing.premium_above".into(),
        });
    }

    // ── Circuit breaker ──────────────────────────────────────────────
    if config.routing.breaker.failure_threshold == 0 {
        errors.push(ConfigError::InvalidField {
            field: "routing.breaker.failure_threshold".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.routing.breaker.cooldown_secs == 0 {
        errors.push(ConfigError::InvalidField {
            field: "routing.breaker.cooldown_secs".into(),
            value: "0".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    // ── Cache tiers ──────────────────────────────────────────────────
    if config.cache.exact.enabled && config.cache.exact.capacity == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.exact.capacity".into(),
            value: "0".into(),
            reason: "must be at least 1 when the tier is enabled".into(),
        });
    }

    let semantic = &config.cache.semantic;
    if !(0.0..=1.0).contains(&semantic.similarity_threshold) {
        errors.push(ConfigError::InvalidField {
            field: "cache.semantic.similarity_threshold".into(),
            value: semantic.similarity_threshold.to_string(),
            reason: "must be between 0.0 and 1.0".into(),
        });
    }

    if semantic.enabled && semantic.capacity == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.semantic.capacity".into(),
            value: "0".into(),
            reason: "must be at least 1 when the tier is enabled".into(),
        });
    }

    if semantic.embedding_dim == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.semantic.embedding_dim".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.cache.prefix.enabled && config.cache.prefix.capacity == 0 {
        errors.push(ConfigError::InvalidField {
            field: "cache.prefix.capacity".into(),
            value: "0".into(),
            reason: "must be at least 1 when the tier is enabled".into(),
        });
    }

    // ── Model registry ───────────────────────────────────────────────
    if config.models.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "models".into(),
            value: "[]".into(),
            reason: "at least one model must be configured".into(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for (i, model) in config.models.iter().enumerate() {
        if model.name.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].name"),
                value: String::new(),
                reason: "model name must not be empty".into(),
            });
        }
        if !seen.insert(model.name.clone()) {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].name"),
                value: model.name.clone(),
                reason: "duplicate model name".into(),
            });
        }
        if model.prompt_price_per_1k < 0.0 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].prompt_price_per_1k"),
                value: model.prompt_price_per_1k.to_string(),
                reason: "price must not be negative".into(),
            });
        }
        if model.completion_price_per_1k < 0.0 {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].completion_price_per_1k"),
                value: model.completion_price_per_1k.to_string(),
                reason: "price must not be negative".into(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
