//! Failure-path integration suite.
//!
//! Drives the pipeline through degraded conditions under paused time:
//! - a circuit that opens, cools down, and recovers through a half-open
//!   probe
//! - a price-table model with no registered client, absorbed by fallback
//! - per-request cache bypass that always reaches the backend
//! - a deadline storm that expires loudly without touching healthy traffic

use std::sync::Arc;

use tokio::time::Duration;
use tokio_inference_pipeline::backend::{FlakyBackend, ModelBackend, SimulatedBackend};
use tokio_inference_pipeline::config::PipelineConfig;
use tokio_inference_pipeline::routing::CircuitStatus;
use tokio_inference_pipeline::{CacheHit, InferenceRequest, Lane, Pipeline, PipelineError};

fn sims_for(models: &[&str]) -> Vec<Arc<dyn ModelBackend>> {
    models
        .iter()
        .map(|model| {
            Arc::new(SimulatedBackend::new(*model).with_delay_ms(5)) as Arc<dyn ModelBackend>
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_a_half_open_probe() {
    let flaky = Arc::new(FlakyBackend::new("gpt-3.5-turbo", 5));
    let mut backends = sims_for(&["claude-3-sonnet", "claude-3-opus", "gpt-4"]);
    backends.push(flaky.clone());
    let pipeline = Pipeline::new(PipelineConfig::default(), backends).unwrap();

    // Five consecutive failures open the circuit; each request still lands
    // on the next candidate.
    for i in 0..5 {
        let response = pipeline
            .submit(InferenceRequest::new(format!("outage probe {i}")))
            .await
            .unwrap();
        assert_eq!(response.model, "claude-3-sonnet");
    }
    assert!(pipeline
        .breaker_statuses()
        .await
        .contains(&("gpt-3.5-turbo".to_string(), CircuitStatus::Open)));

    // After the cooldown the next request is admitted as a half-open probe;
    // the backend has recovered, so the circuit closes again.
    tokio::time::advance(Duration::from_secs(31)).await;
    let response = pipeline
        .submit(InferenceRequest::new("recovery probe"))
        .await
        .unwrap();
    assert_eq!(response.model, "gpt-3.5-turbo");
    assert_eq!(flaky.calls(), 6);
    assert!(pipeline
        .breaker_statuses()
        .await
        .contains(&("gpt-3.5-turbo".to_string(), CircuitStatus::Closed)));

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_client_is_absorbed_until_its_circuit_opens() {
    // The price table still lists gpt-3.5-turbo, but nobody registered a
    // client for it.
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        sims_for(&["claude-3-sonnet", "claude-3-opus", "gpt-4"]),
    )
    .unwrap();

    for i in 0..5 {
        let response = pipeline
            .submit(InferenceRequest::new(format!("clientless probe {i}")))
            .await
            .unwrap();
        assert_eq!(response.model, "claude-3-sonnet");
    }

    // Every miss counted as a failure, so the phantom model's circuit is
    // now open and later requests skip it without logging a miss.
    assert!(pipeline
        .breaker_statuses()
        .await
        .contains(&("gpt-3.5-turbo".to_string(), CircuitStatus::Open)));

    let response = pipeline
        .submit(InferenceRequest::new("post-open probe"))
        .await
        .unwrap();
    assert_eq!(response.model, "claude-3-sonnet");

    let events = pipeline.ledger().events();
    assert!(events.iter().all(|e| e.fallback_hops == 1));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cache_bypass_always_reaches_the_backend() {
    let counter = Arc::new(FlakyBackend::new("gpt-3.5-turbo", 0));
    let mut backends = sims_for(&["claude-3-sonnet", "claude-3-opus", "gpt-4"]);
    backends.push(counter.clone());
    let pipeline = Pipeline::new(PipelineConfig::default(), backends).unwrap();

    for _ in 0..2 {
        let request = InferenceRequest::new("always fresh").with_cache(false);
        let response = pipeline.submit(request).await.unwrap();
        assert_eq!(response.cache_hit, CacheHit::None);
    }
    assert_eq!(counter.calls(), 2);
    // Bypassed requests are not written back either.
    assert_eq!(pipeline.cache_stats().exact.entries, 0);

    // The same prompt with caching on generates once more, then sticks.
    let response = pipeline
        .submit(InferenceRequest::new("always fresh"))
        .await
        .unwrap();
    assert_eq!(response.cache_hit, CacheHit::None);
    assert_eq!(counter.calls(), 3);
    assert_eq!(pipeline.cache_stats().exact.entries, 1);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deadline_storm_spares_healthy_traffic() {
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        sims_for(&["gpt-3.5-turbo", "claude-3-sonnet", "claude-3-opus", "gpt-4"]),
    )
    .unwrap();

    let mut storm = Vec::new();
    for i in 0..10 {
        storm.push(InferenceRequest::new(format!("hurried {i}")).with_deadline_ms(5));
        storm.push(InferenceRequest::new(format!("patient {i}")));
    }
    let results = pipeline.submit_batch(storm).await;

    for (i, result) in results.iter().enumerate() {
        if i % 2 == 0 {
            assert!(matches!(
                result,
                Err(PipelineError::DeadlineExceeded { .. })
            ));
        } else {
            assert!(result.is_ok(), "patient request {i} must be served");
        }
    }

    let stats = pipeline.lane_stats();
    let standard = stats.iter().find(|s| s.lane == Lane::Standard).unwrap();
    assert_eq!(standard.admitted, 20);
    assert_eq!(standard.expired, 10);
    assert_eq!(pipeline.ledger().len(), 20);
    pipeline.shutdown().await;
}
