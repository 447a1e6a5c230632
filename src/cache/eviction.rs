//! Victim selection for capacity-bounded cache tiers.
//!
//! Each tier snapshots its entry metadata into [`EntryMeta`] records and
//! asks [`select_victim`] which key to drop. Selection is pure, so every
//! policy can be tested without a live store.

use std::cmp::Ordering as CmpOrdering;
use std::time::SystemTime;

use crate::config::EvictionPolicy;

/// Metadata snapshot of one cache entry, as seen by victim selection.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Store key of the entry.
    pub key: String,
    /// When the entry was written.
    pub created_at: SystemTime,
    /// Most recent read or write.
    pub last_accessed: SystemTime,
    /// When the entry stops being servable.
    pub expires_at: SystemTime,
    /// How many times the entry has been served.
    pub access_count: u64,
    /// Tokens a hit on this entry avoids recomputing.
    pub saved_tokens: u64,
}

/// Pick the key to evict under `policy`, or `None` when `entries` is empty.
///
/// - `lru` drops the least-recently-accessed entry.
/// - `lfu` drops the least-frequently-accessed entry, oldest first on ties.
/// - `ttl` drops the entry closest past its expiry; if nothing has expired
///   yet, the oldest entry goes.
/// - `cost_aware` drops the entry with the lowest saved-tokens-per-age
///   ratio, i.e. the one whose retention buys the least.
pub fn select_victim(
    policy: EvictionPolicy,
    now: SystemTime,
    entries: &[EntryMeta],
) -> Option<String> {
    match policy {
        EvictionPolicy::Lru => entries
            .iter()
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.key.clone()),
        EvictionPolicy::Lfu => entries
            .iter()
            .min_by_key(|e| (e.access_count, e.created_at))
            .map(|e| e.key.clone()),
        EvictionPolicy::Ttl => {
            let expired = entries
                .iter()
                .filter(|e| e.expires_at <= now)
                .min_by_key(|e| e.expires_at);
            match expired {
                Some(e) => Some(e.key.clone()),
                None => entries
                    .iter()
                    .min_by_key(|e| e.created_at)
                    .map(|e| e.key.clone()),
            }
        }
        EvictionPolicy::CostAware => entries
            .iter()
            .min_by(|a, b| {
                savings_rate(a, now)
                    .partial_cmp(&savings_rate(b, now))
                    .unwrap_or(CmpOrdering::Equal)
            })
            .map(|e| e.key.clone()),
    }
}

/// Saved tokens per second of age. Brand-new entries divide by a small
/// floor instead of zero, which keeps them near-unevictable until they age.
fn savings_rate(entry: &EntryMeta, now: SystemTime) -> f64 {
    let age_secs = now
        .duration_since(entry.created_at)
        .unwrap_or_default()
        .as_secs_f64()
        .max(1e-3);
    entry.saved_tokens as f64 / age_secs
}
