//! Exact-tier cache keys.
//!
//! A key binds the normalized prompt digest to the model and sampling
//! parameters, so a stored response is only replayed for a request that
//! would have produced the same completion. Lookup happens before routing,
//! so requests without an explicit model pin share the [`AUTO_MODEL`]
//! component instead of depending on the routing outcome.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::InferenceRequest;

/// Model component used when the caller leaves model choice to the router.
pub const AUTO_MODEL: &str = "auto";

/// Composite key for the exact cache tier.
///
/// Rendered as `"{digest}:{model}:{temperature}:{max_tokens}"`, where
/// `digest` is the first 16 hex characters of the SHA-256 of the
/// normalized prompt.
///
/// # Example
///
/// ```rust
/// use tokio_inference_pipeline::cache::CacheKey;
/// use tokio_inference_pipeline::InferenceRequest;
///
/// let a = CacheKey::from_request(&InferenceRequest::new("Hello   World"));
/// let b = CacheKey::from_request(&InferenceRequest::new("hello world"));
/// assert_eq!(a.to_string(), b.to_string());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    /// First 16 hex characters of the normalized prompt's SHA-256.
    pub digest: String,
    /// Pinned model name, or [`AUTO_MODEL`].
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Requested completion budget.
    pub max_tokens: u32,
}

impl CacheKey {
    /// Derive the key for `request`.
    pub fn from_request(request: &InferenceRequest) -> Self {
        let normalized = normalize(&request.prompt);
        Self {
            digest: digest16(&normalized),
            model: request
                .model_hint
                .clone()
                .unwrap_or_else(|| AUTO_MODEL.to_string()),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.digest, self.model, self.temperature, self.max_tokens
        )
    }
}

/// Canonical prompt form shared by the exact, semantic, and prefix tiers:
/// lowercased, interior whitespace collapsed to single spaces, trimmed.
pub fn normalize(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// First 16 hex characters of the SHA-256 of `text`.
pub fn digest16(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
