//! Mock CAPTCHA resolver for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::captcha::{CaptchaResolver, Challenge, ResolverError, SolvedChallenge};

/// Mock implementation of the CaptchaResolver trait.
///
/// Answers every challenge with a fixed string unless an error is queued.
#[derive(Debug)]
pub struct MockResolver {
    answer: Arc<RwLock<String>>,
    /// If set, the next solve will fail with this error.
    next_error: Arc<RwLock<Option<ResolverError>>>,
    /// Challenges received, in order.
    challenges: Arc<RwLock<Vec<Challenge>>>,
}

impl Default for MockResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            answer: Arc::new(RwLock::new("mock-answer".to_string())),
            next_error: Arc::new(RwLock::new(None)),
            challenges: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_answer(&self, answer: impl Into<String>) {
        *self.answer.write().await = answer.into();
    }

    /// Configure the next solve to fail with the given error.
    pub async fn set_next_error(&self, error: ResolverError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn solve_count(&self) -> usize {
        self.challenges.read().await.len()
    }

    pub async fn challenges(&self) -> Vec<Challenge> {
        self.challenges.read().await.clone()
    }
}

#[async_trait]
impl CaptchaResolver for MockResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn solve(
        &self,
        challenge: &Challenge,
        _timeout: Duration,
    ) -> Result<SolvedChallenge, ResolverError> {
        self.challenges.write().await.push(challenge.clone());

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        Ok(SolvedChallenge {
            answer: self.answer.read().await.clone(),
        })
    }
}
