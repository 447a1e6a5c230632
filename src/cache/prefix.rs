//! Shared-prefix tier.
//!
//! Tracks prompts whose leading segment (typically a system prompt) has
//! already been computed. A full match replays the stored response and
//! skips the backend; a partial match only discounts the prompt tokens the
//! backend can reuse, so the call still happens. Prompts shorter than the
//! configured minimum are never registered: they cannot produce a shared
//! segment worth accounting for.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

use crate::cache::key;
use crate::cache::{CachedResponse, TierStats};

/// Outcome of a prefix lookup.
#[derive(Debug, Clone)]
pub enum PrefixMatch {
    /// The whole prompt was previously computed; the stored response can
    /// be replayed and the backend skipped.
    Full {
        /// Stored payload for the identical prompt.
        response: CachedResponse,
    },
    /// A leading segment is shared with a prior prompt; its computation
    /// is reusable, charging fewer effective prompt tokens.
    Partial {
        /// Characters of shared leading text.
        matched_chars: usize,
        /// Estimated prompt tokens the backend can reuse.
        saved_tokens: u64,
    },
}

struct PrefixEntry {
    prompt: String,
    response: CachedResponse,
    created_at: SystemTime,
    hits: u64,
}

/// Registered-prompt index keyed by normalized-prompt digest.
///
/// # Panics
///
/// This type never panics.
pub struct PrefixIndex {
    entries: DashMap<String, PrefixEntry>,
    min_prefix_chars: usize,
    capacity: usize,
    full_hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PrefixIndex {
    /// Index accepting prompts of at least `min_prefix_chars` characters,
    /// holding at most `capacity` of them.
    pub fn new(min_prefix_chars: usize, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            min_prefix_chars,
            capacity,
            full_hits: AtomicU64::new(0),
            partial_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of registered prompts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the registered prompt sharing the longest leading segment with
    /// the (already normalized) `prompt`.
    pub fn lookup(&self, prompt: &str) -> Option<PrefixMatch> {
        let prompt_chars = prompt.chars().count();
        if prompt_chars < self.min_prefix_chars {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Entries are keyed by prompt digest, so a full match is a direct
        // map hit rather than a scan.
        let digest = key::digest16(prompt);
        if let Some(mut entry) = self.entries.get_mut(&digest) {
            if entry.prompt == prompt {
                entry.hits += 1;
                let response = entry.response.clone();
                drop(entry);
                self.full_hits.fetch_add(1, Ordering::Relaxed);
                debug!(chars = prompt_chars, "full prefix match");
                return Some(PrefixMatch::Full { response });
            }
        }

        let mut best_common = 0usize;
        for entry in self.entries.iter() {
            let common = common_prefix_chars(prompt, &entry.prompt);
            if common > best_common {
                best_common = common;
            }
        }
        if best_common >= self.min_prefix_chars {
            self.partial_hits.fetch_add(1, Ordering::Relaxed);
            let saved_tokens = (best_common as u64 / 4).max(1);
            debug!(
                chars = best_common,
                saved_tokens = saved_tokens,
                "partial prefix match"
            );
            return Some(PrefixMatch::Partial {
                matched_chars: best_common,
                saved_tokens,
            });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Register a computed `(prompt, response)` pair. Prompts below the
    /// minimum length are skipped; re-registering refreshes the payload.
    pub fn register(&self, prompt: &str, response: CachedResponse) {
        if prompt.chars().count() < self.min_prefix_chars {
            return;
        }
        let digest = key::digest16(prompt);
        if let Some(mut entry) = self.entries.get_mut(&digest) {
            entry.response = response;
            entry.created_at = SystemTime::now();
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(
            digest,
            PrefixEntry {
                prompt: prompt.to_string(),
                response,
                created_at: SystemTime::now(),
                hits: 0,
            },
        );
    }

    fn evict_one(&self) {
        // Snapshot first so no shard lock is held during removal.
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| (e.hits, e.created_at))
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = key.as_str(), "evicted prefix entry");
            }
        }
    }

    /// Point-in-time counters; hits cover both full and partial matches.
    pub fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.len(),
            hits: self.full_hits.load(Ordering::Relaxed) + self.partial_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}
