//! Priority Lanes
//!
//! Admission-time classification of requests into priority lanes.
//!
//! Classification is a pure function of the request's declared priority
//! field. An unrecognised value is an error — silently downgrading a
//! caller to `standard` would hide misconfigured clients, so the caller
//! is told instead.
//!
//! ## Usage
//!
//! ```rust
//! use tokio_inference_pipeline::lanes::Lane;
//!
//! assert!(matches!(Lane::from_name("express"), Ok(Lane::Express)));
//! assert!(Lane::from_name("urgent").is_err());
//! ```

use crate::config::LanesConfig;
use crate::{InferenceRequest, PipelineError};

/// Priority lanes, each with its own SLA and batch scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Latency-sensitive interactive traffic. Tight wait bound, small batches.
    Express,
    /// Default lane for most requests.
    Standard,
    /// Throughput-oriented background work. Best-effort latency.
    Batch,
}

impl Lane {
    /// All lanes, in descending urgency order.
    pub const ALL: [Lane; 3] = [Lane::Express, Lane::Standard, Lane::Batch];

    /// Parse a lane from its declared name (`"express"`, `"standard"`,
    /// `"batch"`; case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPriority`] for any other value.
    /// There is deliberately no default arm.
    pub fn from_name(s: &str) -> Result<Self, PipelineError> {
        match s.to_lowercase().as_str() {
            "express" => Ok(Lane::Express),
            "standard" => Ok(Lane::Standard),
            "batch" => Ok(Lane::Batch),
            _ => Err(PipelineError::InvalidPriority(s.to_string())),
        }
    }

    /// Label form used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Express => "express",
            Lane::Standard => "standard",
            Lane::Batch => "batch",
        }
    }
}

/// Outcome of admitting one request: its lane and the deadline that
/// applies while it sits in that lane's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Assigned lane.
    pub lane: Lane,
    /// Effective queue deadline in milliseconds: the tighter of the lane
    /// SLA and the caller's own budget. `None` means best-effort (batch
    /// lane with no caller deadline).
    pub queue_deadline_ms: Option<u64>,
}

/// Classify a request into a lane and derive its queue deadline.
///
/// Pure function, no side effects. The lane SLA comes from configuration;
/// the caller budget from the request. When both are present the tighter
/// one wins.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPriority`] if the request's priority
/// field is outside the recognised set.
pub fn classify(request: &InferenceRequest, config: &LanesConfig) -> Result<Admission, PipelineError> {
    let lane = Lane::from_name(&request.priority)?;
    let sla_ms = config.params(lane).sla_ms;

    let queue_deadline_ms = match (sla_ms, request.deadline_ms) {
        (Some(sla), Some(budget)) => Some(sla.min(budget)),
        (Some(sla), None) => Some(sla),
        (None, Some(budget)) => Some(budget),
        (None, None) => None,
    };

    Ok(Admission {
        lane,
        queue_deadline_ms,
    })
}
