//! Backend model clients.
//!
//! Provides the [`ModelBackend`] trait and the shipped implementations:
//! - [`SimulatedBackend`]: deterministic delay-and-echo client for demos
//!   and tests
//! - [`FlakyBackend`]: fault-injecting client that fails its first N
//!   invocations, for exercising fallback and circuit-breaker paths
//!
//! Real provider clients plug in behind the same trait; the pipeline only
//! ever sees `Arc<dyn ModelBackend>`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::Duration;

use crate::{estimate_tokens, InferenceRequest, PipelineError, TokenUsage};

/// Sampling parameters passed through to a backend invocation.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvokeParams {
    /// Maximum completion tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl From<&InferenceRequest> for InvokeParams {
    fn from(request: &InferenceRequest) -> Self {
        Self {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

/// One completed backend invocation: the generated text and its usage.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutput {
    /// Generated completion text.
    pub text: String,
    /// Backend-reported (or estimated) token usage.
    pub usage: TokenUsage,
}

/// Trait for backend model clients.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn ModelBackend>`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// The model this client serves; must match a price-table entry for
    /// cost attribution to price its output.
    fn model_name(&self) -> &str;

    /// Perform one inference call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BackendError`] on any provider failure.
    /// The caller feeds that into circuit-breaker accounting and fallback;
    /// it is never surfaced raw.
    async fn invoke(
        &self,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, PipelineError>;

    /// Invoke a whole batch against this model.
    ///
    /// The default fans out member by member and preserves order; backends
    /// with a true batched endpoint override this with one logical call.
    /// Member failures are independent.
    async fn invoke_batch(
        &self,
        prompts: &[(String, InvokeParams)],
    ) -> Vec<Result<BackendOutput, PipelineError>> {
        let calls = prompts
            .iter()
            .map(|(prompt, params)| self.invoke(prompt, params));
        futures::future::join_all(calls).await
    }

    /// Liveness probe.
    async fn health_check(&self) -> bool {
        true
    }
}

// ── Simulated backend ──────────────────────────────────────────────────

/// Deterministic backend for demos and tests.
///
/// Sleeps for a configured delay, then echoes the prompt back prefixed
/// with the model name. Same prompt, same output — which is exactly what
/// the cache tiers need to be testable.
///
/// # Example
///
/// ```rust
/// use tokio_inference_pipeline::backend::SimulatedBackend;
///
/// let backend = SimulatedBackend::new("gpt-4").with_delay_ms(5);
/// ```
#[derive(Debug)]
pub struct SimulatedBackend {
    model: String,
    delay: Duration,
}

impl SimulatedBackend {
    /// Create a simulated client for `model` with a 10ms delay.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            delay: Duration::from_millis(10),
        }
    }

    /// Set the simulated inference delay.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }
}

#[async_trait]
impl ModelBackend for SimulatedBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, PipelineError> {
        tokio::time::sleep(self.delay).await;

        let text = format!("[{}] {}", self.model, prompt);
        let completion_tokens = estimate_tokens(&text).min(u64::from(params.max_tokens));
        Ok(BackendOutput {
            text,
            usage: TokenUsage::new(estimate_tokens(prompt), completion_tokens),
        })
    }

    /// One logical call for the whole batch: a single delay, not one per
    /// member.
    async fn invoke_batch(
        &self,
        prompts: &[(String, InvokeParams)],
    ) -> Vec<Result<BackendOutput, PipelineError>> {
        tokio::time::sleep(self.delay).await;

        prompts
            .iter()
            .map(|(prompt, params)| {
                let text = format!("[{}] {}", self.model, prompt);
                let completion_tokens =
                    estimate_tokens(&text).min(u64::from(params.max_tokens));
                Ok(BackendOutput {
                    text,
                    usage: TokenUsage::new(estimate_tokens(prompt), completion_tokens),
                })
            })
            .collect()
    }
}

// ── Flaky backend ──────────────────────────────────────────────────────

/// Fault-injecting backend: fails its first `fail_first` invocations with
/// a backend error, then behaves like [`SimulatedBackend`].
///
/// Used to drive circuit breakers open and exercise fallback chains in
/// tests and demos.
#[derive(Debug)]
pub struct FlakyBackend {
    model: String,
    fail_first: u64,
    calls: AtomicU64,
}

impl FlakyBackend {
    /// Create a client for `model` that fails its first `fail_first` calls.
    pub fn new(model: impl Into<String>, fail_first: u64) -> Self {
        Self {
            model: model.into(),
            fail_first,
            calls: AtomicU64::new(0),
        }
    }

    /// Total invocations seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelBackend for FlakyBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if call < self.fail_first {
            return Err(PipelineError::BackendError(format!(
                "{} simulated outage (call {})",
                self.model,
                call + 1
            )));
        }

        let text = format!("[{}] {}", self.model, prompt);
        let completion_tokens = estimate_tokens(&text).min(u64::from(params.max_tokens));
        Ok(BackendOutput {
            text,
            usage: TokenUsage::new(estimate_tokens(prompt), completion_tokens),
        })
    }

    async fn health_check(&self) -> bool {
        self.calls.load(Ordering::Relaxed) >= self.fail_first
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
