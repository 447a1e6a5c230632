//! # Stage: Pipeline Coordination
//!
//! ## Responsibility
//! Own the end-to-end request path: classify each request into a priority
//! lane, ride that lane's batch scheduler, walk the cache chain at dispatch,
//! route misses to the cheapest capable backend with fallback, attribute
//! cost, and reply to the caller.
//!
//! ## Guarantees
//! - Exactly one reply per submitted request: a response, a deadline error,
//!   or a fallback-exhaustion error.
//! - Exactly one cost event per request admitted to a lane. Requests
//!   rejected before admission (unrecognized priority) produce none.
//! - A cache fault or a single backend fault never fails a request on its
//!   own; only an exhausted fallback chain does.
//! - Shutdown flushes open windows before stopping: parked callers are
//!   answered, not dropped.
//!
//! ## NOT Responsible For
//! - Batch timing (the `scheduler` lane actors own the windows)
//! - Candidate selection (the `routing` module plans the attempt list)
//! - Pricing math (the `cost` module prices what actually ran)

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, field, info, info_span, warn, Instrument};

use crate::backend::{BackendOutput, InvokeParams, ModelBackend};
use crate::cache::{CacheChain, CachedResponse, ChainStats};
use crate::config::{ModelSpec, PipelineConfig};
use crate::cost::{
    base_cost_usd, prefix_savings_usd, routing_savings_usd, CostEvent, CostLedger, LedgerSnapshot,
};
use crate::lanes::{classify, Lane};
use crate::metrics;
use crate::routing::{CircuitStatus, ModelRouter, RoutePlan};
use crate::scheduler::{
    spawn_lane, BatchEntry, CompletionFeed, LaneEvent, LaneHandle, LaneStats, ReleasedBatch,
};
use crate::{CacheHit, InferenceRequest, InferenceResponse, PipelineError, TokenUsage};

// ── Pipeline ───────────────────────────────────────────────────────────────

/// The assembled inference pipeline.
///
/// Construction spawns one lane actor and one batch dispatcher per priority
/// lane; [`Pipeline::shutdown`] stops them all, flushing any open windows
/// first. The pipeline is `Send + Sync` and can be shared behind an `Arc`
/// for concurrent submission.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_inference_pipeline::backend::{ModelBackend, SimulatedBackend};
/// use tokio_inference_pipeline::config::PipelineConfig;
/// use tokio_inference_pipeline::{InferenceRequest, Pipeline};
///
/// # async fn example() -> Result<(), tokio_inference_pipeline::PipelineError> {
/// let backends: Vec<Arc<dyn ModelBackend>> =
///     vec![Arc::new(SimulatedBackend::new("gpt-3.5-turbo"))];
/// let pipeline = Pipeline::new(PipelineConfig::default(), backends)?;
///
/// let response = pipeline.submit(InferenceRequest::new("Explain lifetimes")).await?;
/// println!("{} answered in {}ms", response.model, response.latency_ms);
///
/// pipeline.shutdown().await;
/// # Ok(()) }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    core: PipelineCore,
    handles: LaneHandles,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Read side of the pipeline shared by every lane dispatcher.
#[derive(Clone)]
struct PipelineCore {
    router: Arc<ModelRouter>,
    chain: Arc<CacheChain>,
    ledger: Arc<CostLedger>,
    backends: Arc<HashMap<String, Arc<dyn ModelBackend>>>,
    /// Baseline for routing-savings attribution; absent when the price
    /// table has no premium models.
    premium_reference: Option<ModelSpec>,
}

/// Admission handles for the three lane actors.
struct LaneHandles {
    express: LaneHandle,
    standard: LaneHandle,
    batch: LaneHandle,
}

impl LaneHandles {
    fn get(&self, lane: Lane) -> &LaneHandle {
        match lane {
            Lane::Express => &self.express,
            Lane::Standard => &self.standard,
            Lane::Batch => &self.batch,
        }
    }
}

impl Pipeline {
    /// Assemble a pipeline from configuration and backend clients.
    ///
    /// Backends are keyed by [`ModelBackend::model_name`] and matched
    /// against the configured price table. Mismatches in either direction
    /// are logged at `warn`; a price-table model with no client is simply
    /// routed past at invoke time, which feeds its circuit breaker.
    ///
    /// # Arguments
    ///
    /// * `config` — Lane, batching, cache, routing, and model settings.
    /// * `backends` — One client per servable model.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidWeights`] when the complexity weights do
    ///   not sum to 1.0.
    /// - [`PipelineError::Config`] when no registered backend matches any
    ///   model in the price table (nothing could ever be served).
    /// - [`PipelineError::Internal`] when metric registration fails.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, as it spawns the lane
    /// actors and dispatchers.
    pub fn new(
        config: PipelineConfig,
        backends: Vec<Arc<dyn ModelBackend>>,
    ) -> Result<Self, PipelineError> {
        if config.observability.metrics_enabled {
            metrics::init_metrics()?;
        }

        let router = Arc::new(ModelRouter::new(
            config.routing.clone(),
            config.models.clone(),
        )?);

        let mut by_model: HashMap<String, Arc<dyn ModelBackend>> =
            HashMap::with_capacity(backends.len());
        for backend in backends {
            let model = backend.model_name().to_string();
            if router.registry().get(&model).is_none() {
                warn!(
                    model = model.as_str(),
                    "backend has no price-table entry, its usage will bill at zero"
                );
            }
            if by_model.insert(model.clone(), backend).is_some() {
                warn!(
                    model = model.as_str(),
                    "duplicate backend for model, keeping the later registration"
                );
            }
        }
        for spec in router.registry().specs() {
            if !by_model.contains_key(&spec.name) {
                warn!(
                    model = spec.name.as_str(),
                    "price-table model has no registered backend"
                );
            }
        }
        let serviceable = router
            .registry()
            .specs()
            .iter()
            .any(|spec| by_model.contains_key(&spec.name));
        if !serviceable {
            return Err(PipelineError::Config(
                "no registered backend matches any model in the price table".to_string(),
            ));
        }

        let premium_reference = router.registry().premium_reference().cloned();
        let core = PipelineCore {
            router,
            chain: Arc::new(CacheChain::from_config(&config.cache)),
            ledger: Arc::new(CostLedger::default()),
            backends: Arc::new(by_model),
            premium_reference,
        };

        let mut tasks = Vec::with_capacity(Lane::ALL.len() * 2);
        let handles = LaneHandles {
            express: spawn_pair(Lane::Express, &config, &core, &mut tasks),
            standard: spawn_pair(Lane::Standard, &config, &core, &mut tasks),
            batch: spawn_pair(Lane::Batch, &config, &core, &mut tasks),
        };

        info!(
            models = core.backends.len(),
            max_fallback_hops = config.routing.max_fallback_hops,
            "inference pipeline started"
        );
        Ok(Self {
            config,
            core,
            handles,
            tasks,
        })
    }

    /// Submit one request and wait for its terminal outcome.
    ///
    /// The request is classified into its declared lane, rides that lane's
    /// batch window, and is answered from cache or a backend. The returned
    /// future resolves when the request exits the pipeline.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidPriority`] before admission, for an
    ///   unrecognized priority name.
    /// - [`PipelineError::DeadlineExceeded`] when the queue deadline passed
    ///   before dispatch.
    /// - [`PipelineError::NoAvailableModel`] when the fallback chain is
    ///   exhausted.
    /// - [`PipelineError::ChannelClosed`] when the pipeline shut down with
    ///   the request in flight.
    pub async fn submit(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, PipelineError> {
        let span = info_span!(
            "request",
            request_id = %request.request_id,
            lane = field::Empty,
            model = field::Empty,
            cache = field::Empty,
            latency_ms = field::Empty,
        );

        async {
            let admission = match classify(&request, &self.config.lanes) {
                Ok(admission) => admission,
                Err(e) => {
                    metrics::inc_error("invalid_priority");
                    return Err(e);
                }
            };
            let span = tracing::Span::current();
            span.record("lane", admission.lane.as_str());
            metrics::inc_admitted(admission.lane.as_str());
            debug!(
                deadline_ms = admission.queue_deadline_ms,
                "request admitted"
            );

            let (entry, reply) = BatchEntry::new(request, admission.queue_deadline_ms);
            self.handles.get(admission.lane).admit(entry).await?;
            let result = reply.await.map_err(|_| PipelineError::ChannelClosed)?;
            if let Ok(ref response) = result {
                span.record("model", response.model.as_str());
                span.record("cache", response.cache_hit.as_str());
                span.record("latency_ms", response.latency_ms);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Submit many requests concurrently, preserving input order.
    ///
    /// Each request is admitted independently, so they may land in
    /// different lanes and windows. Failures are per-slot; one bad request
    /// never poisons its neighbors.
    pub async fn submit_batch(
        &self,
        requests: Vec<InferenceRequest>,
    ) -> Vec<Result<InferenceResponse, PipelineError>> {
        join_all(requests.into_iter().map(|request| self.submit(request))).await
    }

    /// Stop the pipeline, flushing open batch windows first.
    ///
    /// Dropping the admission handles lets each lane actor release its open
    /// window, so requests parked at shutdown are still dispatched and
    /// answered before the tasks join.
    pub async fn shutdown(self) {
        info!("inference pipeline shutting down");
        let Self { handles, tasks, .. } = self;
        drop(handles);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "pipeline task failed during shutdown");
            }
        }
        info!("inference pipeline stopped");
    }

    /// Running cost totals.
    pub fn cost_snapshot(&self) -> LedgerSnapshot {
        self.core.ledger.snapshot()
    }

    /// The append-only cost ledger.
    pub fn ledger(&self) -> &CostLedger {
        &self.core.ledger
    }

    /// Per-tier cache counters.
    pub fn cache_stats(&self) -> ChainStats {
        self.core.chain.stats()
    }

    /// Scheduler counters for every lane.
    pub fn lane_stats(&self) -> Vec<LaneStats> {
        Lane::ALL
            .iter()
            .map(|&lane| self.handles.get(lane).stats())
            .collect()
    }

    /// Circuit status for every model that has seen traffic.
    pub async fn breaker_statuses(&self) -> Vec<(String, CircuitStatus)> {
        self.core.router.breakers().statuses().await
    }

    /// The router, exposed for plan inspection.
    pub fn router(&self) -> &ModelRouter {
        &self.core.router
    }

    /// The configuration this pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

/// Spawn one lane actor plus the dispatcher that consumes its events.
fn spawn_pair(
    lane: Lane,
    config: &PipelineConfig,
    core: &PipelineCore,
    tasks: &mut Vec<JoinHandle<()>>,
) -> LaneHandle {
    let spawned = spawn_lane(lane, config.lanes.params(lane), &config.batching);
    let dispatcher = Dispatcher {
        lane,
        core: core.clone(),
        completions: spawned.completions,
    };
    tasks.push(tokio::spawn(dispatcher.run(spawned.events)));
    tasks.push(spawned.join);
    spawned.handle
}

// ── Dispatcher ─────────────────────────────────────────────────────────────

/// One dispatcher per lane: consumes released batches and expired members
/// from the lane actor, settles every member, and feeds batch latency back
/// into the lane's control law.
struct Dispatcher {
    lane: Lane,
    core: PipelineCore,
    completions: CompletionFeed,
}

/// A batch member that missed every serving cache tier and is walking its
/// candidate list.
struct PendingMember {
    entry: BatchEntry,
    plan: RoutePlan,
    /// Index of the next untried candidate in `plan.candidates`.
    next_candidate: usize,
    /// Candidates consumed so far, skipped or invoked.
    attempts: u32,
    /// Shared-prefix tokens from a partial prefix match; discounts the
    /// bill without skipping the backend.
    prefix_tokens: u64,
}

impl Dispatcher {
    async fn run(self, mut events: mpsc::Receiver<LaneEvent>) {
        info!(lane = self.lane.as_str(), "batch dispatcher started");
        while let Some(event) = events.recv().await {
            match event {
                LaneEvent::Batch(batch) => self.dispatch(batch).await,
                LaneEvent::Expired(entry) => self.expire(entry),
            }
        }
        info!(lane = self.lane.as_str(), "batch dispatcher stopped");
    }

    /// Settle every member of a released batch.
    async fn dispatch(&self, batch: ReleasedBatch) {
        let started = Instant::now();
        let size = batch.members.len();
        let trigger = if batch.forced_by_timer { "timer" } else { "size" };
        debug!(
            lane = self.lane.as_str(),
            size,
            trigger,
            target_size = batch.target_size,
            "dispatching batch"
        );

        // Cache walk first: served members never reach the router.
        let mut pending: Vec<PendingMember> = Vec::with_capacity(size);
        for entry in batch.members {
            let outcome = self.core.chain.lookup(&entry.request).await;
            metrics::inc_cache_lookup(if outcome.served() {
                outcome.hit.as_str()
            } else {
                "miss"
            });
            match outcome.response {
                Some(cached) => self.reply_cached(entry, outcome.hit, cached),
                None => {
                    let plan = self.core.router.plan(&entry.request);
                    pending.push(PendingMember {
                        entry,
                        plan,
                        next_candidate: 0,
                        attempts: 0,
                        prefix_tokens: outcome.prefix_tokens,
                    });
                }
            }
        }

        // Misses walk their candidate lists in waves: members wanting the
        // same model share one backend call; failed members rejoin the next
        // wave one candidate further along.
        while !pending.is_empty() {
            let mut groups: HashMap<String, Vec<PendingMember>> = HashMap::new();
            for mut member in std::mem::take(&mut pending) {
                match self.next_admitted(&mut member).await {
                    Some(model) => groups.entry(model).or_default().push(member),
                    None => self.reply_no_model(member),
                }
            }
            let waves = join_all(
                groups
                    .into_iter()
                    .map(|(model, members)| self.invoke_group(model, members)),
            )
            .await;
            for survivors in waves {
                pending.extend(survivors);
            }
        }

        let elapsed = started.elapsed();
        metrics::observe_batch(self.lane.as_str(), size, elapsed, trigger);
        self.completions.record(elapsed.as_millis() as u64).await;
    }

    /// Advance a member to its next circuit-admitted candidate.
    ///
    /// Every candidate consumed — skipped or invoked — spends one attempt
    /// against the fallback budget.
    async fn next_admitted(&self, member: &mut PendingMember) -> Option<String> {
        while let Some(model) = member.plan.candidates.get(member.next_candidate).cloned() {
            member.next_candidate += 1;
            member.attempts += 1;
            if self.core.router.breakers().breaker(&model).check().await {
                return Some(model);
            }
            metrics::inc_model_invocation(&model, "skipped_open");
            debug!(
                request_id = %member.entry.request.request_id,
                model = model.as_str(),
                "circuit open, skipping candidate"
            );
        }
        None
    }

    /// Invoke one model for all members that chose it this wave.
    ///
    /// Returns the members whose invocation failed; they continue their
    /// fallback walk in the next wave.
    async fn invoke_group(
        &self,
        model: String,
        members: Vec<PendingMember>,
    ) -> Vec<PendingMember> {
        let breaker = self.core.router.breakers().breaker(&model);

        let Some(backend) = self.core.backends.get(&model) else {
            warn!(model = model.as_str(), "routed model has no backend client");
            breaker.record_failure().await;
            metrics::inc_model_invocation(&model, "err");
            return members;
        };

        let prompts: Vec<(String, InvokeParams)> = members
            .iter()
            .map(|m| {
                (
                    m.entry.request.prompt.clone(),
                    InvokeParams::from(&m.entry.request),
                )
            })
            .collect();
        let results = match prompts.as_slice() {
            [(prompt, params)] => vec![backend.invoke(prompt, params).await],
            _ => backend.invoke_batch(&prompts).await,
        };

        if results.len() != members.len() {
            warn!(
                model = model.as_str(),
                expected = members.len(),
                got = results.len(),
                "backend returned a mismatched result count, failing the group"
            );
            breaker.record_failure().await;
            metrics::inc_model_invocation(&model, "err");
            return members;
        }

        let mut survivors = Vec::new();
        for (member, result) in members.into_iter().zip(results) {
            match result {
                Ok(output) => {
                    breaker.record_success().await;
                    metrics::inc_model_invocation(&model, "ok");
                    self.reply_generated(member, &model, output).await;
                }
                Err(e) => {
                    breaker.record_failure().await;
                    metrics::inc_model_invocation(&model, "err");
                    debug!(
                        request_id = %member.entry.request.request_id,
                        model = model.as_str(),
                        error = %e,
                        "invocation failed, continuing fallback walk"
                    );
                    survivors.push(member);
                }
            }
        }
        survivors
    }

    /// Serve a member from a cache tier: price the avoided call, settle the
    /// ledger, reply.
    fn reply_cached(&self, entry: BatchEntry, hit: CacheHit, cached: CachedResponse) {
        let latency_ms = entry.waited_ms();
        let BatchEntry { request, reply, .. } = entry;

        // The avoided call is priced at the cached entry's own model.
        let spec = self.core.router.registry().get(&cached.model);
        let cache_savings = spec.map_or(0.0, |spec| base_cost_usd(spec, cached.usage));
        metrics::add_cost("cache_savings", cache_savings);
        metrics::observe_request_latency(self.lane.as_str(), Duration::from_millis(latency_ms));

        let event = CostEvent {
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
            lane: self.lane,
            model: Some(cached.model.clone()),
            tier: None,
            score: self.core.router.estimator().score(&request),
            cache_hit: hit,
            usage: cached.usage,
            latency_ms,
            fallback_hops: 0,
            base_cost_usd: 0.0,
            infra_cost_usd: 0.0,
            cache_savings_usd: cache_savings,
            routing_savings_usd: 0.0,
            prefix_savings_usd: 0.0,
            error: None,
            metadata: request.metadata.clone(),
        };
        let cost = event.summary();
        self.core.ledger.record(event);

        debug!(
            request_id = %request.request_id,
            tier = hit.as_str(),
            saved_usd = cache_savings,
            "served from cache"
        );
        let response = InferenceResponse {
            request_id: request.request_id,
            text: cached.text,
            model: cached.model,
            cache_hit: hit,
            usage: cached.usage,
            latency_ms,
            cost,
        };
        if reply.send(Ok(response)).is_err() {
            debug!("caller gone before cached reply");
        }
    }

    /// Settle a backend-served member: populate the caches, price the call,
    /// settle the ledger, reply.
    async fn reply_generated(&self, member: PendingMember, model: &str, output: BackendOutput) {
        let PendingMember {
            entry,
            plan,
            attempts,
            prefix_tokens,
            ..
        } = member;
        let latency_ms = entry.waited_ms();
        let BatchEntry { request, reply, .. } = entry;

        // Write-back so the next identical or near-duplicate prompt can
        // skip the backend.
        let cached = CachedResponse::new(output.text.clone(), model, output.usage);
        self.core.chain.populate(&request, &cached).await;

        let spec = self.core.router.registry().get(model);
        let base = spec.map_or(0.0, |spec| base_cost_usd(spec, output.usage));
        // A hint that was honored is the caller's choice, not a routing win.
        let pinned_primary = plan.pinned && plan.primary() == Some(model);
        let routing_savings = match (&self.core.premium_reference, spec) {
            (Some(reference), Some(used)) if !pinned_primary => {
                routing_savings_usd(reference, used, output.usage)
            }
            _ => 0.0,
        };
        let prefix_savings = spec.map_or(0.0, |spec| prefix_savings_usd(spec, prefix_tokens));
        metrics::add_cost("base", base);
        metrics::add_cost("routing_savings", routing_savings);
        metrics::add_cost("prefix_savings", prefix_savings);
        metrics::observe_request_latency(self.lane.as_str(), Duration::from_millis(latency_ms));

        let event = CostEvent {
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
            lane: self.lane,
            model: Some(model.to_string()),
            tier: Some(plan.tier.as_str().to_string()),
            score: plan.score,
            cache_hit: CacheHit::None,
            usage: output.usage,
            latency_ms,
            fallback_hops: attempts.saturating_sub(1),
            base_cost_usd: base,
            infra_cost_usd: 0.0,
            cache_savings_usd: 0.0,
            routing_savings_usd: routing_savings,
            prefix_savings_usd: prefix_savings,
            error: None,
            metadata: request.metadata.clone(),
        };
        let cost = event.summary();
        self.core.ledger.record(event);

        debug!(
            request_id = %request.request_id,
            model,
            hops = attempts.saturating_sub(1),
            base_usd = base,
            "request served"
        );
        let response = InferenceResponse {
            request_id: request.request_id,
            text: output.text,
            model: model.to_string(),
            cache_hit: CacheHit::None,
            usage: output.usage,
            latency_ms,
            cost,
        };
        if reply.send(Ok(response)).is_err() {
            debug!("caller gone before generated reply");
        }
    }

    /// Fail a member whose fallback chain is exhausted.
    fn reply_no_model(&self, member: PendingMember) {
        let PendingMember {
            entry,
            plan,
            attempts,
            ..
        } = member;
        let latency_ms = entry.waited_ms();
        let BatchEntry { request, reply, .. } = entry;

        warn!(
            request_id = %request.request_id,
            attempts,
            "fallback chain exhausted"
        );
        metrics::inc_error("no_available_model");
        metrics::observe_request_latency(self.lane.as_str(), Duration::from_millis(latency_ms));

        let event = CostEvent {
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
            lane: self.lane,
            model: None,
            tier: Some(plan.tier.as_str().to_string()),
            score: plan.score,
            cache_hit: CacheHit::None,
            usage: TokenUsage::default(),
            latency_ms,
            fallback_hops: attempts.saturating_sub(1),
            base_cost_usd: 0.0,
            infra_cost_usd: 0.0,
            cache_savings_usd: 0.0,
            routing_savings_usd: 0.0,
            prefix_savings_usd: 0.0,
            error: Some("no_available_model".to_string()),
            metadata: request.metadata.clone(),
        };
        self.core.ledger.record(event);

        if reply
            .send(Err(PipelineError::NoAvailableModel { attempts }))
            .is_err()
        {
            debug!("caller gone before terminal failure reply");
        }
    }

    /// Fail a member whose queue deadline passed before dispatch.
    fn expire(&self, entry: BatchEntry) {
        let waited_ms = entry.waited_ms();
        let BatchEntry { request, reply, .. } = entry;

        metrics::inc_expired(self.lane.as_str());
        metrics::inc_error("deadline_exceeded");
        metrics::observe_request_latency(self.lane.as_str(), Duration::from_millis(waited_ms));

        let event = CostEvent {
            request_id: request.request_id.clone(),
            timestamp: Utc::now(),
            lane: self.lane,
            model: None,
            tier: None,
            score: self.core.router.estimator().score(&request),
            cache_hit: CacheHit::None,
            usage: TokenUsage::default(),
            latency_ms: waited_ms,
            fallback_hops: 0,
            base_cost_usd: 0.0,
            infra_cost_usd: 0.0,
            cache_savings_usd: 0.0,
            routing_savings_usd: 0.0,
            prefix_savings_usd: 0.0,
            error: Some("deadline_exceeded".to_string()),
            metadata: request.metadata.clone(),
        };
        self.core.ledger.record(event);

        if reply
            .send(Err(PipelineError::DeadlineExceeded { waited_ms }))
            .is_err()
        {
            debug!("caller gone before expiry reply");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
