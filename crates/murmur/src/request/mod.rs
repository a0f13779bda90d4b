//! Completion requests as received from prediction clients.
//!
//! A request arrives as JSON, is deserialized into a [`RawCompletionRequest`]
//! and validated into an immutable [`CompletionRequest`]. Validation errors
//! name the offending field and the bound it broke, and nothing else.

mod sampling;

pub use sampling::*;

use crate::Error;
use serde::Deserialize;

/// Longest generation a client may ask for, in tokens.
pub const MAX_LENGTH: i64 = 200;

/// Group size used when a request does not specify `chunks`.
pub const DEFAULT_CHUNKS: i64 = 8;

/// Largest accepted sampling temperature.
pub const MAX_TEMPERATURE: f64 = 1.5;

/// Wire shape of a completion request, before validation.
///
/// Accepts the short field names used by older clients (`temp`, `p_alpha`).
/// Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCompletionRequest {
    pub prompt: String,
    pub length: i64,
    #[serde(default = "default_chunks")]
    pub chunks: i64,
    pub top_k: i64,
    #[serde(default, alias = "p_alpha")]
    pub penalty_alpha: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default, alias = "temp")]
    pub temperature: Option<f64>,
}

const fn default_chunks() -> i64 {
    DEFAULT_CHUNKS
}

/// A validated, immutable completion request.
///
/// # Example
/// ```
/// use murmur::{CompletionRequest, SamplingParams};
///
/// let req: CompletionRequest = serde_json::from_str(
///     r#"{"prompt": "Once", "length": 16, "chunks": 4, "top_k": 4, "p_alpha": 0.6}"#,
/// )
/// .unwrap();
/// assert!(matches!(req.sampling(), SamplingParams::Contrastive { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCompletionRequest")]
pub struct CompletionRequest {
    prompt: String,
    length: usize,
    chunks: usize,
    sampling: SamplingParams,
}

impl CompletionRequest {
    /// The text to continue. May be empty.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Requested number of new tokens.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Token group size used for streaming.
    pub const fn chunks(&self) -> usize {
        self.chunks
    }

    /// Resolved sampling strategy.
    pub const fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    /// Returns `true` when there is nothing to generate from.
    pub fn is_noop(&self) -> bool {
        self.prompt.is_empty()
    }
}

impl TryFrom<RawCompletionRequest> for CompletionRequest {
    type Error = Error;

    fn try_from(raw: RawCompletionRequest) -> Result<Self, Self::Error> {
        if !(1..=MAX_LENGTH).contains(&raw.length) {
            return Err(Error::invalid_request(format!(
                "length must be in [1, {MAX_LENGTH}], got {}",
                raw.length
            )));
        }
        if let Some(top_p) = raw.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(Error::invalid_request(format!(
                    "top_p must be in [0, 1], got {top_p}"
                )));
            }
        }
        if let Some(temperature) = raw.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
                return Err(Error::invalid_request(format!(
                    "temperature must be in [0, {MAX_TEMPERATURE}], got {temperature}"
                )));
            }
        }
        if let Some(alpha) = raw.penalty_alpha {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(Error::invalid_request(format!(
                    "penalty_alpha must be in (0, 1), got {alpha}"
                )));
            }
        }
        if raw.top_k < 0 {
            return Err(Error::invalid_request(format!(
                "top_k must not be negative, got {}",
                raw.top_k
            )));
        }
        // Contrastive search is undefined with fewer than two candidates.
        if raw.penalty_alpha.is_some() && raw.top_k < 2 {
            return Err(Error::invalid_request(format!(
                "top_k must be at least 2 with penalty_alpha, got {}",
                raw.top_k
            )));
        }
        if raw.chunks < 1 {
            return Err(Error::invalid_request(format!(
                "chunks must be at least 1, got {}",
                raw.chunks
            )));
        }
        if raw.chunks > raw.length {
            return Err(Error::invalid_request(format!(
                "chunks must not exceed length ({}), got {}",
                raw.length, raw.chunks
            )));
        }

        // All three were range checked above.
        let length = raw.length as usize;
        let top_k = raw.top_k as usize;
        let sampling = match raw.penalty_alpha {
            Some(penalty_alpha) => SamplingParams::Contrastive {
                top_k,
                max_new_tokens: length,
                penalty_alpha,
            },
            None => SamplingParams::Nucleus {
                top_k,
                max_new_tokens: length,
                top_p: raw.top_p.unwrap_or(1.0),
                temperature: raw.temperature.unwrap_or(1.0),
            },
        };

        Ok(Self {
            prompt: raw.prompt,
            length,
            chunks: raw.chunks as usize,
            sampling,
        })
    }
}

#[cfg(test)]
mod tests;
