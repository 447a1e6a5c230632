//! Semantic cache tier: embedding similarity with freshness and
//! popularity gates.
//!
//! The tier accepts a nearest-neighbor match only when all three hold:
//! cosine similarity at or above the configured threshold, entry age
//! within the freshness bound, and prior access count at or above the
//! popularity floor. Accepting increments the entry's access count; the
//! count grows toward the floor through repeated population of the same
//! prompt, so only prompts the fleet actually recomputes become servable.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::cache::eviction::{self, EntryMeta};
use crate::cache::CachedResponse;
use crate::config::{EvictionPolicy, SemanticCacheConfig};
use crate::PipelineError;

/// Embedding provider seam.
///
/// The in-process [`HashEmbedder`] is deterministic and dependency-free;
/// production deployments substitute a real embedding service behind this
/// trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a fixed-dimension vector.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CacheUnavailable`] when the embedding
    /// service cannot be reached; the chain skips the tier.
    async fn embed(&self, text: &str) -> Result<Vec<f64>, PipelineError>;

    /// Output dimensionality.
    fn dim(&self) -> usize;
}

/// One entry in the semantic index.
#[derive(Debug, Clone)]
pub struct SemanticEntry {
    /// Prompt digest identity (16 hex chars of the normalized prompt).
    pub id: String,
    /// Unit-norm embedding of the normalized prompt.
    pub embedding: Vec<f64>,
    /// Payload replayed on an accepted match.
    pub response: CachedResponse,
    /// When the payload was (re)computed.
    pub created_at: SystemTime,
    /// Stores and serves of this entry so far.
    pub access_count: u64,
    /// Most recent store or serve.
    pub last_accessed: SystemTime,
}

impl SemanticEntry {
    /// Entry computed just now, with zero prior accesses.
    pub fn new(id: impl Into<String>, embedding: Vec<f64>, response: CachedResponse) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            embedding,
            response,
            created_at: now,
            access_count: 0,
            last_accessed: now,
        }
    }
}

/// Nearest-neighbor result from a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct NearestMatch {
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
    /// Snapshot of the matched entry.
    pub entry: SemanticEntry,
}

/// Vector index seam for the semantic tier.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert `entry`, or refresh an existing entry with the same id,
    /// bumping its access count and resetting its freshness.
    async fn insert(&self, entry: SemanticEntry) -> Result<(), PipelineError>;

    /// The single closest entry to `embedding`, if the index is non-empty.
    async fn nearest(&self, embedding: &[f64]) -> Result<Option<NearestMatch>, PipelineError>;

    /// Record that entry `id` was served from cache.
    async fn record_access(&self, id: &str) -> Result<(), PipelineError>;

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Whether the index holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries dropped by capacity eviction so far.
    fn evictions(&self) -> u64 {
        0
    }
}

/// The acceptance gate for a nearest match: similar enough, fresh enough,
/// and popular enough. Reads the stored access count; the serve-time
/// increment happens only after acceptance.
pub fn accept_match(found: &NearestMatch, config: &SemanticCacheConfig, now: SystemTime) -> bool {
    if found.similarity < config.similarity_threshold {
        return false;
    }
    let age = now
        .duration_since(found.entry.created_at)
        .unwrap_or_default();
    if age.as_secs() > config.max_age_secs {
        return false;
    }
    found.entry.access_count >= config.min_access_count
}

/// Cosine similarity of two vectors, clamped to `[-1, 1]`.
///
/// Mismatched lengths or zero-magnitude inputs score 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if mag_a < 1e-9 || mag_b < 1e-9 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

// ── Hash embedder ────────────────────────────────────────────────────────

/// Deterministic pseudo-embedder: hashes each word and projects the hash
/// through sin/cos, then L2-normalizes. No model, no network, stable
/// across processes with the same word multiset.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Embedder producing `dim`-dimensional vectors.
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

fn pseudo_embed(text: &str, dim: usize) -> Vec<f64> {
    if dim == 0 {
        return Vec::new();
    }
    let mut acc = vec![0.0f64; dim];
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return acc;
    }
    for word in &words {
        let mut h = DefaultHasher::new();
        word.hash(&mut h);
        let hv = h.finish();
        for (i, slot) in acc.iter_mut().enumerate() {
            let angle = (hv.wrapping_add(i as u64) as f64) * std::f64::consts::PI / dim as f64;
            *slot += if i % 2 == 0 { angle.sin() } else { angle.cos() };
        }
    }
    let norm: f64 = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 1e-9 {
        acc.iter_mut().for_each(|v| *v /= norm);
    }
    acc
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, PipelineError> {
        Ok(pseudo_embed(text, self.dim))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// ── In-memory index ──────────────────────────────────────────────────────

/// Linear-scan cosine index over an `RwLock<Vec<_>>`.
///
/// Fine for the capacities this tier is configured with; larger
/// deployments put an ANN store behind [`VectorIndex`] instead.
pub struct MemoryVectorIndex {
    entries: RwLock<Vec<SemanticEntry>>,
    capacity: usize,
    policy: EvictionPolicy,
    max_age: Duration,
    evicted: AtomicU64,
}

impl MemoryVectorIndex {
    /// Index holding at most `capacity` entries, evicting by `policy`.
    /// `max_age` is the freshness horizon used by the `ttl` policy.
    pub fn new(capacity: usize, policy: EvictionPolicy, max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity,
            policy,
            max_age,
            evicted: AtomicU64::new(0),
        }
    }

    fn lock_poisoned() -> PipelineError {
        PipelineError::CacheUnavailable("semantic index lock poisoned".to_string())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(&self, entry: SemanticEntry) -> Result<(), PipelineError> {
        let mut guard = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        if let Some(existing) = guard.iter_mut().find(|e| e.id == entry.id) {
            // Re-population of a known prompt: the payload was just
            // recomputed, so freshness resets and popularity grows.
            existing.access_count += 1;
            existing.response = entry.response;
            existing.created_at = entry.created_at;
            existing.last_accessed = entry.last_accessed;
            return Ok(());
        }
        if guard.len() >= self.capacity {
            let now = SystemTime::now();
            let metas: Vec<EntryMeta> = guard
                .iter()
                .map(|e| EntryMeta {
                    key: e.id.clone(),
                    created_at: e.created_at,
                    last_accessed: e.last_accessed,
                    expires_at: e.created_at + self.max_age,
                    access_count: e.access_count,
                    saved_tokens: e.response.usage.total(),
                })
                .collect();
            if let Some(victim) = eviction::select_victim(self.policy, now, &metas) {
                guard.retain(|e| e.id != victim);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!(id = victim.as_str(), "evicted semantic index entry");
            }
        }
        guard.push(entry);
        Ok(())
    }

    async fn nearest(&self, embedding: &[f64]) -> Result<Option<NearestMatch>, PipelineError> {
        let guard = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        let mut best_sim = f64::NEG_INFINITY;
        let mut best_entry: Option<&SemanticEntry> = None;
        for entry in guard.iter() {
            let sim = cosine_similarity(embedding, &entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_entry = Some(entry);
            }
        }
        Ok(best_entry.map(|entry| NearestMatch {
            similarity: best_sim,
            entry: entry.clone(),
        }))
    }

    async fn record_access(&self, id: &str) -> Result<(), PipelineError> {
        let mut guard = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        if let Some(entry) = guard.iter_mut().find(|e| e.id == id) {
            entry.access_count += 1;
            entry.last_accessed = SystemTime::now();
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    fn evictions(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenUsage;

    fn response(text: &str) -> CachedResponse {
        CachedResponse::new(text, "test-model", TokenUsage::new(10, 20))
    }

    fn entry(id: &str, prompt: &str) -> SemanticEntry {
        SemanticEntry::new(id, pseudo_embed(prompt, 64), response("cached"))
    }

    fn index() -> MemoryVectorIndex {
        MemoryVectorIndex::new(16, EvictionPolicy::Lfu, Duration::from_secs(86_400))
    }

    // -- embedding -------------------------------------------------------

    #[test]
    fn test_embed_deterministic() {
        assert_eq!(
            pseudo_embed("hello world", 64),
            pseudo_embed("hello world", 64)
        );
    }

    #[test]
    fn test_embed_dimension_matches() {
        for dim in [1, 16, 64, 256] {
            assert_eq!(pseudo_embed("some text", dim).len(), dim);
        }
        assert!(pseudo_embed("anything", 0).is_empty());
    }

    #[test]
    fn test_embed_is_unit_norm() {
        let v = pseudo_embed("normalize me please", 64);
        let magnitude: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6, "got magnitude {}", magnitude);
    }

    #[test]
    fn test_embed_empty_text_is_zero_vector() {
        let v = pseudo_embed("", 32);
        assert!(v.iter().all(|x| x.abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn test_hash_embedder_trait_roundtrip() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.dim(), 64);
        let v = embedder.embed("via the trait").await.unwrap();
        assert_eq!(v, pseudo_embed("via the trait", 64));
    }

    // -- cosine ----------------------------------------------------------

    #[test]
    fn test_cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_negated_is_negative_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b: Vec<f64> = a.iter().map(|v| -v).collect();
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    // -- index -----------------------------------------------------------

    #[tokio::test]
    async fn test_nearest_on_empty_index() {
        let idx = index();
        let probe = pseudo_embed("anything", 64);
        assert!(idx.nearest(&probe).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_then_nearest_finds_identical() {
        let idx = index();
        idx.insert(entry("id-1", "explain async rust")).await.unwrap();
        idx.insert(entry("id-2", "completely different topic"))
            .await
            .unwrap();
        let probe = pseudo_embed("explain async rust", 64);
        let found = idx.nearest(&probe).await.unwrap().unwrap();
        assert_eq!(found.entry.id, "id-1");
        assert!((found.similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reinsert_same_id_bumps_access_count() {
        let idx = index();
        idx.insert(entry("dup", "same prompt")).await.unwrap();
        idx.insert(entry("dup", "same prompt")).await.unwrap();
        idx.insert(entry("dup", "same prompt")).await.unwrap();
        assert_eq!(idx.len(), 1);
        let probe = pseudo_embed("same prompt", 64);
        let found = idx.nearest(&probe).await.unwrap().unwrap();
        assert_eq!(found.entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_record_access_increments() {
        let idx = index();
        idx.insert(entry("served", "popular prompt")).await.unwrap();
        idx.record_access("served").await.unwrap();
        idx.record_access("served").await.unwrap();
        let probe = pseudo_embed("popular prompt", 64);
        let found = idx.nearest(&probe).await.unwrap().unwrap();
        assert_eq!(found.entry.access_count, 2);
    }

    #[tokio::test]
    async fn test_capacity_eviction_drops_least_frequent() {
        let idx = MemoryVectorIndex::new(2, EvictionPolicy::Lfu, Duration::from_secs(86_400));
        idx.insert(entry("a", "prompt alpha")).await.unwrap();
        idx.insert(entry("b", "prompt beta")).await.unwrap();
        idx.record_access("b").await.unwrap();

        idx.insert(entry("c", "prompt gamma")).await.unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.evictions(), 1);
        let probe = pseudo_embed("prompt alpha", 64);
        let found = idx.nearest(&probe).await.unwrap().unwrap();
        assert_ne!(found.entry.id, "a", "least-frequent entry should be gone");
    }

    // -- acceptance gate ---------------------------------------------------

    fn gate_config() -> SemanticCacheConfig {
        SemanticCacheConfig::default()
    }

    fn nearest_with(similarity: f64, age_secs: u64, access_count: u64) -> NearestMatch {
        let mut e = entry("gated", "prompt");
        e.created_at = SystemTime::now() - Duration::from_secs(age_secs);
        e.access_count = access_count;
        NearestMatch {
            similarity,
            entry: e,
        }
    }

    #[test]
    fn test_gate_accepts_similar_fresh_popular() {
        let m = nearest_with(0.95, 60, 5);
        assert!(accept_match(&m, &gate_config(), SystemTime::now()));
    }

    #[test]
    fn test_gate_rejects_below_similarity_threshold() {
        let m = nearest_with(0.91, 60, 5);
        assert!(!accept_match(&m, &gate_config(), SystemTime::now()));
    }

    #[test]
    fn test_gate_rejects_stale_entry() {
        // Older than the 24h default freshness bound.
        let m = nearest_with(0.99, 86_401, 5);
        assert!(!accept_match(&m, &gate_config(), SystemTime::now()));
    }

    #[test]
    fn test_gate_rejects_unpopular_entry() {
        let m = nearest_with(0.99, 60, 2);
        assert!(!accept_match(&m, &gate_config(), SystemTime::now()));
    }

    #[test]
    fn test_gate_boundary_values_accept() {
        // Exactly at threshold, exactly at the freshness bound, exactly at
        // the popularity floor.
        let m = nearest_with(0.92, 86_400, 3);
        assert!(accept_match(&m, &gate_config(), SystemTime::now()));
    }
}
