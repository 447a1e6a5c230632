//! # Module: Response Cache Chain
//!
//! Three lookup tiers walked in order, short-circuiting on the first hit:
//!
//! 1. **exact** — digest of (normalized prompt, model, sampling params)
//!    against a key-value store ([`store`]);
//! 2. **semantic** — nearest-neighbor embedding match behind a triple
//!    gate of similarity, freshness, and popularity ([`semantic`]);
//! 3. **prefix** — shared leading segment with a previously computed
//!    prompt; a full match replays, a partial match only discounts the
//!    backend bill ([`prefix`]).
//!
//! ## Responsibility
//!
//! - Decide whether a request can skip the backend, and with what payload.
//! - Write every successfully computed response back to the tiers.
//! - Absorb tier faults: an unreachable store skips its tier and the walk
//!   continues. A cache fault never fails a request.
//!
//! ## NOT Responsible For
//!
//! - Model selection and pricing (`routing`)
//! - Cost bookkeeping (`cost`) — the chain only reports saved tokens
//! - Batch timing (`scheduler`)

pub mod eviction;
pub mod key;
pub mod prefix;
pub mod semantic;
pub mod store;

pub use key::CacheKey;
pub use prefix::{PrefixIndex, PrefixMatch};
pub use semantic::{
    Embedder, HashEmbedder, MemoryVectorIndex, NearestMatch, SemanticEntry, VectorIndex,
};
pub use store::{KeyValueStore, MemoryKvStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::{CacheHit, InferenceRequest, PipelineError, TokenUsage};

/// Payload stored by the serving tiers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CachedResponse {
    /// Completion text.
    pub text: String,
    /// Model that produced it.
    pub model: String,
    /// Token usage recorded at computation time.
    pub usage: TokenUsage,
}

impl CachedResponse {
    /// Bundle a computed completion for storage.
    pub fn new(text: impl Into<String>, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage,
        }
    }
}

/// Point-in-time counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TierStats {
    /// Live entries.
    pub entries: usize,
    /// Lookups served (full and partial for the prefix tier).
    pub hits: u64,
    /// Lookups not served.
    pub misses: u64,
    /// Entries dropped by capacity eviction.
    pub evictions: u64,
}

impl TierStats {
    /// Hits over total lookups, 0.0 when nothing has been looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Per-tier counters for the whole chain.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ChainStats {
    /// Exact tier.
    pub exact: TierStats,
    /// Semantic tier.
    pub semantic: TierStats,
    /// Prefix tier.
    pub prefix: TierStats,
}

/// Result of walking the chain for one request.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    /// Which tier served the request, if any.
    pub hit: CacheHit,
    /// Replayable payload on a serving hit.
    pub response: Option<CachedResponse>,
    /// Similarity of an accepted semantic match.
    pub similarity: Option<f64>,
    /// Tokens avoided entirely by a serving hit.
    pub saved_tokens: u64,
    /// Reusable shared-prefix tokens on a partial match; discounts cost
    /// without skipping the backend.
    pub prefix_tokens: u64,
}

impl CacheOutcome {
    /// No tier served and no prefix discount applies.
    pub fn miss() -> Self {
        Self {
            hit: CacheHit::None,
            response: None,
            similarity: None,
            saved_tokens: 0,
            prefix_tokens: 0,
        }
    }

    /// Whether a tier produced a replayable response.
    pub fn served(&self) -> bool {
        self.response.is_some()
    }
}

/// The three-tier chain. Disabled tiers are absent entirely, not stubbed.
pub struct CacheChain {
    config: CacheConfig,
    exact: Option<Arc<dyn KeyValueStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    semantic: Option<Arc<dyn VectorIndex>>,
    prefix: Option<Arc<PrefixIndex>>,
    semantic_hits: AtomicU64,
    semantic_misses: AtomicU64,
}

impl CacheChain {
    /// Build the in-process chain from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        let exact: Option<Arc<dyn KeyValueStore>> = if config.exact.enabled {
            Some(Arc::new(MemoryKvStore::new(
                config.exact.capacity,
                config.exact.eviction,
            )))
        } else {
            None
        };
        let (embedder, semantic) = if config.semantic.enabled {
            let embedder: Arc<dyn Embedder> =
                Arc::new(HashEmbedder::new(config.semantic.embedding_dim));
            let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(
                config.semantic.capacity,
                config.semantic.eviction,
                Duration::from_secs(config.semantic.max_age_secs),
            ));
            (Some(embedder), Some(index))
        } else {
            (None, None)
        };
        let prefix = if config.prefix.enabled {
            Some(Arc::new(PrefixIndex::new(
                config.prefix.min_prefix_chars,
                config.prefix.capacity,
            )))
        } else {
            None
        };
        Self {
            config: config.clone(),
            exact,
            embedder,
            semantic,
            prefix,
            semantic_hits: AtomicU64::new(0),
            semantic_misses: AtomicU64::new(0),
        }
    }

    /// Swap in an external exact-tier store (e.g. Redis behind the trait).
    pub fn with_exact_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.exact = Some(store);
        self
    }

    /// Swap in an external embedding service and vector index.
    pub fn with_semantic_tier(
        mut self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        self.embedder = Some(embedder);
        self.semantic = Some(index);
        self
    }

    /// Walk the tiers for `request`.
    ///
    /// Never errors: an unavailable tier is logged at `warn` and skipped,
    /// degrading to a plain backend call in the worst case.
    pub async fn lookup(&self, request: &InferenceRequest) -> CacheOutcome {
        if !request.use_cache {
            return CacheOutcome::miss();
        }
        let normalized = key::normalize(&request.prompt);

        if let Some(store) = &self.exact {
            let cache_key = CacheKey::from_request(request).to_string();
            match store.get(&cache_key).await {
                Ok(Some(response)) => {
                    debug!(
                        request_id = request.request_id.as_str(),
                        key = cache_key.as_str(),
                        "cache hit (exact)"
                    );
                    let saved_tokens = response.usage.total();
                    return CacheOutcome {
                        hit: CacheHit::Exact,
                        response: Some(response),
                        similarity: None,
                        saved_tokens,
                        prefix_tokens: 0,
                    };
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "exact cache tier unavailable, skipping"),
            }
        }

        if request.use_semantic_cache {
            if let (Some(embedder), Some(index)) = (&self.embedder, &self.semantic) {
                match self.semantic_lookup(embedder, index, request, &normalized).await {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "semantic cache tier unavailable, skipping"),
                }
            }
        }

        if let Some(prefix) = &self.prefix {
            match prefix.lookup(&normalized) {
                Some(PrefixMatch::Full { response }) => {
                    debug!(
                        request_id = request.request_id.as_str(),
                        "cache hit (prefix)"
                    );
                    let saved_tokens = response.usage.total();
                    return CacheOutcome {
                        hit: CacheHit::Prefix,
                        response: Some(response),
                        similarity: None,
                        saved_tokens,
                        prefix_tokens: 0,
                    };
                }
                Some(PrefixMatch::Partial {
                    matched_chars,
                    saved_tokens,
                }) => {
                    debug!(
                        request_id = request.request_id.as_str(),
                        matched_chars = matched_chars,
                        "partial prefix match, discounting"
                    );
                    return CacheOutcome {
                        hit: CacheHit::None,
                        response: None,
                        similarity: None,
                        saved_tokens: 0,
                        prefix_tokens: saved_tokens,
                    };
                }
                None => {}
            }
        }

        CacheOutcome::miss()
    }

    async fn semantic_lookup(
        &self,
        embedder: &Arc<dyn Embedder>,
        index: &Arc<dyn VectorIndex>,
        request: &InferenceRequest,
        normalized: &str,
    ) -> Result<Option<CacheOutcome>, PipelineError> {
        let embedding = embedder.embed(normalized).await?;
        let found = match index.nearest(&embedding).await? {
            Some(found) => found,
            None => {
                self.semantic_misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };
        if !semantic::accept_match(&found, &self.config.semantic, SystemTime::now()) {
            self.semantic_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        index.record_access(&found.entry.id).await?;
        self.semantic_hits.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = request.request_id.as_str(),
            id = found.entry.id.as_str(),
            similarity = found.similarity,
            "cache hit (semantic)"
        );
        let saved_tokens = found.entry.response.usage.total();
        Ok(Some(CacheOutcome {
            hit: CacheHit::Semantic,
            response: Some(found.entry.response),
            similarity: Some(found.similarity),
            saved_tokens,
            prefix_tokens: 0,
        }))
    }

    /// Write-back after a successful backend call.
    ///
    /// Population failures are logged and absorbed; the response has
    /// already been produced and must still reach the caller.
    pub async fn populate(&self, request: &InferenceRequest, response: &CachedResponse) {
        if !request.use_cache {
            return;
        }
        let normalized = key::normalize(&request.prompt);

        if let Some(store) = &self.exact {
            let cache_key = CacheKey::from_request(request).to_string();
            let ttl = Duration::from_secs(
                request
                    .cache_ttl_override_secs
                    .unwrap_or(self.config.exact.ttl_secs),
            );
            if let Err(e) = store.set(&cache_key, response.clone(), ttl).await {
                warn!(error = %e, "exact cache population failed");
            }
        }

        if request.use_semantic_cache {
            if let (Some(embedder), Some(index)) = (&self.embedder, &self.semantic) {
                match embedder.embed(&normalized).await {
                    Ok(embedding) => {
                        let id = key::digest16(&normalized);
                        let entry = SemanticEntry::new(id, embedding, response.clone());
                        if let Err(e) = index.insert(entry).await {
                            warn!(error = %e, "semantic cache population failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "embedding failed during population"),
                }
            }
        }

        if let Some(prefix) = &self.prefix {
            prefix.register(&normalized, response.clone());
        }
    }

    /// Counters across all three tiers.
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            exact: self
                .exact
                .as_ref()
                .map(|s| s.stats())
                .unwrap_or_default(),
            semantic: TierStats {
                entries: self.semantic.as_ref().map(|i| i.len()).unwrap_or(0),
                hits: self.semantic_hits.load(Ordering::Relaxed),
                misses: self.semantic_misses.load(Ordering::Relaxed),
                evictions: self.semantic.as_ref().map(|i| i.evictions()).unwrap_or(0),
            },
            prefix: self
                .prefix
                .as_ref()
                .map(|p| p.stats())
                .unwrap_or_default(),
        }
    }
}
