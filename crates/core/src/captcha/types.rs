//! Types for the CAPTCHA resolver seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while solving a challenge.
///
/// Every variant is treated as retryable by the caller.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("CAPTCHA solving is not configured")]
    NotConfigured,

    #[error("Solver connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Solver rejected the task: {0}")]
    Rejected(String),

    #[error("Solver did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected solver response: {0}")]
    InvalidResponse(String),
}

/// Kind of challenge presented by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Distorted text rendered as an image.
    ImageText,
    /// Slider or rotation puzzle; solution is an offset.
    Puzzle,
}

/// A challenge captured from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub kind: ChallengeKind,
    /// Base64-encoded screenshot of the challenge element.
    pub image_base64: String,
    /// Page the challenge appeared on.
    pub page_url: String,
}

/// Answer returned by the solving service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvedChallenge {
    /// Text or offset to type into the challenge input.
    pub answer: String,
}

/// A CAPTCHA solving backend.
#[async_trait]
pub trait CaptchaResolver: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Solve one challenge, giving up after `timeout`.
    async fn solve(
        &self,
        challenge: &Challenge,
        timeout: Duration,
    ) -> Result<SolvedChallenge, ResolverError>;
}
