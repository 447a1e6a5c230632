//! Demo binary for tokio-inference-pipeline
//!
//! Assembles the full pipeline against simulated backends and pushes a
//! small mix of traffic through it: a concurrent burst that fills batch
//! windows, cache-hitting repeats, a pinned model, and a request that
//! expires in queue. Finishes by printing the cost ledger and per-stage
//! counters.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter (default: info)

use std::sync::Arc;

use tokio_inference_pipeline::backend::{ModelBackend, SimulatedBackend};
use tokio_inference_pipeline::config::PipelineConfig;
use tokio_inference_pipeline::{
    init_tracing, metrics, InferenceRequest, InferenceResponse, Pipeline, PipelineError,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Structured tracing (JSON or pretty, based on LOG_FORMAT env).
    let _ = init_tracing();

    // Prometheus registry before any stage runs.
    metrics::init_metrics()?;

    info!("Starting tokio-inference-pipeline demo");

    // Simulated clients for every model in the default price table, with
    // latency roughly tracking price.
    let backends: Vec<Arc<dyn ModelBackend>> = vec![
        Arc::new(SimulatedBackend::new("gpt-3.5-turbo").with_delay_ms(8)),
        Arc::new(SimulatedBackend::new("claude-3-sonnet").with_delay_ms(15)),
        Arc::new(SimulatedBackend::new("claude-3-opus").with_delay_ms(40)),
        Arc::new(SimulatedBackend::new("gpt-4").with_delay_ms(60)),
    ];

    let pipeline = Pipeline::new(PipelineConfig::default(), backends)?;
    info!("Pipeline lanes and dispatchers spawned");

    // A concurrent burst so the batch windows actually fill.
    let burst = vec![
        InferenceRequest::new("What is the capital of France?"),
        InferenceRequest::new("Write a haiku about programming"),
        InferenceRequest::new("How does photosynthesis work?"),
        InferenceRequest::new("Summarize the plot of Hamlet in two sentences"),
        InferenceRequest::new(
            "Analyze the trade-offs between optimistic and pessimistic locking \
             in distributed databases, step by step, and explain why each \
             strategy wins under contention",
        ),
        InferenceRequest::new("quick sanity check: 2 + 2").with_priority("express"),
    ];
    info!(count = burst.len(), "Sending demo burst");
    for result in pipeline.submit_batch(burst).await {
        report(&result);
    }

    // A repeat of a burst prompt: served from the exact cache tier.
    let repeat = InferenceRequest::new("What is the capital of France?");
    report(&pipeline.submit(repeat).await);

    // Two prompts sharing a long preamble: the second gets a prefix
    // discount without skipping the backend.
    let preamble = "You are a senior Rust reviewer. Focus on unsafe blocks, lock \
                    ordering, and error propagation. Be terse and concrete.";
    report(
        &pipeline
            .submit(InferenceRequest::new(format!("{preamble} Review lanes.rs")))
            .await,
    );
    report(
        &pipeline
            .submit(InferenceRequest::new(format!("{preamble} Review router.rs")))
            .await,
    );

    // A caller that insists on a specific model.
    let pinned = InferenceRequest::new("Translate 'borrow checker' to German")
        .with_model_hint("claude-3-opus");
    report(&pipeline.submit(pinned).await);

    // A deadline too tight for the standard window: expires in queue.
    let hurried = InferenceRequest::new("no time for batching").with_deadline_ms(5);
    report(&pipeline.submit(hurried).await);

    // Low-priority work rides the batch lane.
    let offline = vec![
        InferenceRequest::new("Reindex: summarize document 41").with_priority("batch"),
        InferenceRequest::new("Reindex: summarize document 42").with_priority("batch"),
    ];
    for result in pipeline.submit_batch(offline).await {
        report(&result);
    }

    // ── Summary ─────────────────────────────────────────────────────────

    let snapshot = pipeline.cost_snapshot();
    info!(
        events = snapshot.events,
        base_usd = format!("{:.6}", snapshot.base_cost_usd),
        cache_savings_usd = format!("{:.6}", snapshot.cache_savings_usd),
        routing_savings_usd = format!("{:.6}", snapshot.routing_savings_usd),
        prefix_savings_usd = format!("{:.6}", snapshot.prefix_savings_usd),
        net_usd = format!("{:.6}", snapshot.net_cost_usd),
        savings_rate = format!("{:.1}%", snapshot.savings_rate * 100.0),
        "Cost ledger totals"
    );

    let cache = pipeline.cache_stats();
    info!(
        exact_hits = cache.exact.hits,
        semantic_hits = cache.semantic.hits,
        prefix_hits = cache.prefix.hits,
        exact_entries = cache.exact.entries,
        "Cache chain counters"
    );

    for lane in pipeline.lane_stats() {
        info!(
            lane = lane.lane.as_str(),
            admitted = lane.admitted,
            expired = lane.expired,
            batches = lane.batches_released,
            by_size = lane.released_by_size,
            by_timer = lane.released_by_timer,
            target = lane.target_size,
            p95_ms = lane.p95_latency_ms,
            "Lane counters"
        );
    }

    for (model, status) in pipeline.breaker_statuses().await {
        info!(model = model.as_str(), status = status.as_str(), "Breaker");
    }

    info!("Demo complete - shutting down");
    pipeline.shutdown().await;

    Ok(())
}

/// Log one terminal outcome the way an operator would want to read it.
fn report(result: &Result<InferenceResponse, PipelineError>) {
    match result {
        Ok(response) => info!(
            model = response.model.as_str(),
            cache = response.cache_hit.as_str(),
            latency_ms = response.latency_ms,
            net_usd = format!("{:.6}", response.cost.net_cost),
            "{}",
            truncate(&response.text, 48)
        ),
        Err(e) => warn!(error = %e, "request failed"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}
