//! End-to-end pipeline integration suite.
//!
//! Exercises the full submit path across all three lanes under paused time:
//! - a mixed burst that fills express, standard, and batch windows
//! - cache warm-up economics over repeated traffic
//! - concurrent submitters sharing one pipeline behind an `Arc`
//! - conservation between the ledger snapshot and its event stream

use std::sync::Arc;

use tokio_inference_pipeline::backend::{ModelBackend, SimulatedBackend};
use tokio_inference_pipeline::config::PipelineConfig;
use tokio_inference_pipeline::{CacheHit, InferenceRequest, Lane, Pipeline};

fn sim_backends() -> Vec<Arc<dyn ModelBackend>> {
    ["gpt-3.5-turbo", "claude-3-sonnet", "claude-3-opus", "gpt-4"]
        .into_iter()
        .map(|model| {
            Arc::new(SimulatedBackend::new(model).with_delay_ms(5)) as Arc<dyn ModelBackend>
        })
        .collect()
}

fn lane_load(lane: &str, count: usize) -> Vec<InferenceRequest> {
    (0..count)
        .map(|i| InferenceRequest::new(format!("{lane} load item {i}")).with_priority(lane))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_mixed_lane_burst_serves_every_request() {
    let pipeline = Pipeline::new(PipelineConfig::default(), sim_backends()).unwrap();

    let mut burst = Vec::new();
    burst.extend(lane_load("express", 5));
    burst.extend(lane_load("standard", 5));
    burst.extend(lane_load("batch", 5));

    let results = pipeline.submit_batch(burst).await;
    assert_eq!(results.len(), 15);
    for result in &results {
        let response = result.as_ref().expect("every request is served");
        assert!(!response.text.is_empty());
    }

    let stats = pipeline.lane_stats();
    for lane in [Lane::Express, Lane::Standard, Lane::Batch] {
        let entry = stats.iter().find(|s| s.lane == lane).unwrap();
        assert_eq!(entry.admitted, 5, "{} admissions", lane.as_str());
        assert_eq!(entry.expired, 0);
    }
    // Express caps batches at 4, so five members need two windows: one
    // released by size, one by the age timer.
    let express = stats.iter().find(|s| s.lane == Lane::Express).unwrap();
    assert_eq!(express.released_by_size, 1);
    assert_eq!(express.released_by_timer, 1);

    assert_eq!(pipeline.ledger().len(), 15);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_warm_cache_turns_repeat_traffic_into_savings() {
    let pipeline = Pipeline::new(PipelineConfig::default(), sim_backends()).unwrap();
    let prompts: Vec<String> = (0..8)
        .map(|i| format!("knowledge base question number {i}"))
        .collect();

    let cold: Vec<InferenceRequest> = prompts
        .iter()
        .map(|p| InferenceRequest::new(p.as_str()))
        .collect();
    for result in pipeline.submit_batch(cold).await {
        assert_eq!(result.unwrap().cache_hit, CacheHit::None);
    }

    let warm: Vec<InferenceRequest> = prompts
        .iter()
        .map(|p| InferenceRequest::new(p.as_str()))
        .collect();
    for result in pipeline.submit_batch(warm).await {
        let response = result.unwrap();
        assert_eq!(response.cache_hit, CacheHit::Exact);
        assert!(response.cost.savings > 0.0);
    }

    assert_eq!(pipeline.cache_stats().exact.hits, 8);
    let snapshot = pipeline.cost_snapshot();
    assert_eq!(snapshot.events, 16);
    assert!(snapshot.cache_savings_usd > 0.0);
    assert!(snapshot.savings_rate > 0.0);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submitters_share_one_pipeline() {
    let pipeline = Arc::new(Pipeline::new(PipelineConfig::default(), sim_backends()).unwrap());

    let mut workers = Vec::new();
    for task in 0..4 {
        let pipeline = Arc::clone(&pipeline);
        workers.push(tokio::spawn(async move {
            let mut responses = Vec::new();
            for i in 0..5 {
                let request = InferenceRequest::new(format!("worker {task} request {i}"));
                responses.push(pipeline.submit(request).await);
            }
            responses
        }));
    }

    for worker in workers {
        for result in worker.await.unwrap() {
            assert!(result.is_ok());
        }
    }

    assert_eq!(pipeline.ledger().len(), 20);
    let pipeline = Arc::into_inner(pipeline).expect("all submitters finished");
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_totals_match_the_event_stream() {
    let pipeline = Pipeline::new(PipelineConfig::default(), sim_backends()).unwrap();

    pipeline
        .submit(InferenceRequest::new("conservation check one"))
        .await
        .unwrap();
    pipeline
        .submit(InferenceRequest::new("conservation check two"))
        .await
        .unwrap();
    // A repeat lands in the exact tier.
    pipeline
        .submit(InferenceRequest::new("conservation check one"))
        .await
        .unwrap();
    // And one request dies in queue.
    let _ = pipeline
        .submit(InferenceRequest::new("conservation check three").with_deadline_ms(5))
        .await;

    let events = pipeline.ledger().events();
    let snapshot = pipeline.cost_snapshot();
    assert_eq!(events.len(), 4);
    assert_eq!(snapshot.events, 4);

    let base: f64 = events.iter().map(|e| e.base_cost_usd).sum();
    let infra: f64 = events.iter().map(|e| e.infra_cost_usd).sum();
    let savings: f64 = events.iter().map(|e| e.savings()).sum();
    let expected_net = (base + infra - savings).max(0.0);

    // Totals are accumulated in micro-dollars, so allow rounding slack.
    assert!((snapshot.base_cost_usd - base).abs() < 1e-3);
    assert!((snapshot.total_savings_usd - savings).abs() < 1e-3);
    assert!((snapshot.net_cost_usd - expected_net).abs() < 1e-3);
    pipeline.shutdown().await;
}
