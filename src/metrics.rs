//! Prometheus metrics for the inference pipeline.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup **before** building a
//! pipeline. The helper functions (`inc_admitted`, `observe_batch`, …) are
//! no-ops if `init_metrics` was never called, so the pipeline is always
//! safe to run — observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `pipeline_requests_total` | Counter | `lane` |
//! | `pipeline_requests_expired_total` | Counter | `lane` |
//! | `pipeline_cache_lookups_total` | Counter | `tier` |
//! | `pipeline_batches_released_total` | Counter | `lane`, `trigger` |
//! | `pipeline_batch_size` | Histogram | `lane` |
//! | `pipeline_batch_duration_seconds` | Histogram | `lane` |
//! | `pipeline_request_duration_seconds` | Histogram | `lane` |
//! | `pipeline_model_invocations_total` | Counter | `model`, `outcome` |
//! | `pipeline_errors_total` | Counter | `kind` |
//! | `pipeline_cost_usd_total` | Counter | `component` |
//! | `pipeline_target_batch_size` | Gauge | `lane` |

use crate::PipelineError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the pipeline, bundled together so they can
/// be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Requests admitted per lane.
    pub requests_total: CounterVec,
    /// Requests that expired while queued, per lane.
    pub requests_expired: CounterVec,
    /// Cache lookups by serving tier (`exact`, `semantic`, `prefix`,
    /// `miss`).
    pub cache_lookups: CounterVec,
    /// Batches released, by lane and trigger (`size` or `timer`).
    pub batches_released: CounterVec,
    /// Released batch sizes per lane.
    pub batch_size: HistogramVec,
    /// Batch dispatch duration per lane.
    pub batch_duration: HistogramVec,
    /// End-to-end request latency per lane.
    pub request_duration: HistogramVec,
    /// Backend invocations by model and outcome (`ok`, `err`,
    /// `skipped_open`).
    pub model_invocations: CounterVec,
    /// Terminal errors by kind.
    pub errors_total: CounterVec,
    /// Accumulated dollars by component (`base`, `cache_savings`,
    /// `routing_savings`, `prefix_savings`).
    pub cost_usd: CounterVec,
    /// Current adaptive target batch size per lane.
    pub target_batch_size: IntGaugeVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register_counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, PipelineError> {
    let counter = CounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| PipelineError::Internal(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| PipelineError::Internal(format!("metrics registration failed: {e}")))?;
    Ok(counter)
}

fn register_histogram(
    registry: &Registry,
    name: &str,
    help: &str,
    buckets: Vec<f64>,
    labels: &[&str],
) -> Result<HistogramVec, PipelineError> {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .map_err(|e| PipelineError::Internal(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| PipelineError::Internal(format!("metrics registration failed: {e}")))?;
    Ok(histogram)
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private
/// registry.
///
/// Must be called once at process startup before building a pipeline.
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`PipelineError::Internal`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), PipelineError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = register_counter(
        &registry,
        "pipeline_requests_total",
        "Requests admitted per lane",
        &["lane"],
    )?;
    let requests_expired = register_counter(
        &registry,
        "pipeline_requests_expired_total",
        "Requests expired while queued, per lane",
        &["lane"],
    )?;
    let cache_lookups = register_counter(
        &registry,
        "pipeline_cache_lookups_total",
        "Cache lookups by serving tier",
        &["tier"],
    )?;
    let batches_released = register_counter(
        &registry,
        "pipeline_batches_released_total",
        "Batches released by lane and trigger",
        &["lane", "trigger"],
    )?;
    let batch_size = register_histogram(
        &registry,
        "pipeline_batch_size",
        "Released batch sizes per lane",
        vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0],
        &["lane"],
    )?;
    let batch_duration = register_histogram(
        &registry,
        "pipeline_batch_duration_seconds",
        "Batch dispatch duration per lane",
        prometheus::DEFAULT_BUCKETS.to_vec(),
        &["lane"],
    )?;
    let request_duration = register_histogram(
        &registry,
        "pipeline_request_duration_seconds",
        "End-to-end request latency per lane",
        prometheus::DEFAULT_BUCKETS.to_vec(),
        &["lane"],
    )?;
    let model_invocations = register_counter(
        &registry,
        "pipeline_model_invocations_total",
        "Backend invocations by model and outcome",
        &["model", "outcome"],
    )?;
    let errors_total = register_counter(
        &registry,
        "pipeline_errors_total",
        "Terminal errors by kind",
        &["kind"],
    )?;
    let cost_usd = register_counter(
        &registry,
        "pipeline_cost_usd_total",
        "Accumulated dollars by component",
        &["component"],
    )?;

    let target_batch_size = IntGaugeVec::new(
        Opts::new(
            "pipeline_target_batch_size",
            "Current adaptive target batch size per lane",
        ),
        &["lane"],
    )
    .map_err(|e| PipelineError::Internal(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(target_batch_size.clone()))
        .map_err(|e| PipelineError::Internal(format!("metrics registration failed: {e}")))?;

    // If another thread raced us, the first one wins — both initializations
    // produce identical metric descriptors, so neither outcome is incorrect.
    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        requests_expired,
        cache_lookups,
        batches_released,
        batch_size,
        batch_duration,
        request_duration,
        model_invocations,
        errors_total,
        cost_usd,
        target_batch_size,
    });

    Ok(())
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one admitted request.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_admitted(lane: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_total.get_metric_with_label_values(&[lane]) {
            c.inc();
        }
    }
}

/// Count one request that expired while queued.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_expired(lane: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.requests_expired.get_metric_with_label_values(&[lane]) {
            c.inc();
        }
    }
}

/// Count one cache lookup by serving tier (`exact`, `semantic`, `prefix`)
/// or `miss`.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_cache_lookup(tier: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_lookups.get_metric_with_label_values(&[tier]) {
            c.inc();
        }
    }
}

/// Record one released batch: its size, dispatch duration, and trigger
/// (`size` or `timer`).
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn observe_batch(lane: &str, size: usize, duration: Duration, trigger: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .batches_released
            .get_metric_with_label_values(&[lane, trigger])
        {
            c.inc();
        }
        if let Ok(h) = m.batch_size.get_metric_with_label_values(&[lane]) {
            h.observe(size as f64);
        }
        if let Ok(h) = m.batch_duration.get_metric_with_label_values(&[lane]) {
            h.observe(duration.as_secs_f64());
        }
    }
}

/// Record one request's end-to-end latency.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn observe_request_latency(lane: &str, duration: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.request_duration.get_metric_with_label_values(&[lane]) {
            h.observe(duration.as_secs_f64());
        }
    }
}

/// Count one backend invocation attempt: outcome is `ok`, `err`, or
/// `skipped_open` for a candidate rejected by its circuit breaker.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_model_invocation(model: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .model_invocations
            .get_metric_with_label_values(&[model, outcome])
        {
            c.inc();
        }
    }
}

/// Count one terminal error by kind.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_error(kind: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.errors_total.get_metric_with_label_values(&[kind]) {
            c.inc();
        }
    }
}

/// Accumulate dollars into a cost component (`base`, `cache_savings`,
/// `routing_savings`, `prefix_savings`).
///
/// Negative amounts are ignored; Prometheus counters only go up.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn add_cost(component: &str, usd: f64) {
    if usd <= 0.0 {
        return;
    }
    if let Some(m) = metrics() {
        if let Ok(c) = m.cost_usd.get_metric_with_label_values(&[component]) {
            c.inc_by(usd);
        }
    }
}

/// Set the adaptive target batch size gauge for a lane.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn set_target_batch_size(lane: &str, size: i64) {
    if let Some(m) = metrics() {
        if let Ok(g) = m.target_batch_size.get_metric_with_label_values(&[lane]) {
            g.set(size);
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails. Observability degrades gracefully rather than panicking.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
