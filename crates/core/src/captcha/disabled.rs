//! Resolver used when no solving service is configured.

use std::time::Duration;

use async_trait::async_trait;

use super::{CaptchaResolver, Challenge, ResolverError, SolvedChallenge};

/// Fails every challenge, leaving the order retryable for a later run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledResolver;

#[async_trait]
impl CaptchaResolver for DisabledResolver {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn solve(
        &self,
        _challenge: &Challenge,
        _timeout: Duration,
    ) -> Result<SolvedChallenge, ResolverError> {
        Err(ResolverError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::ChallengeKind;

    #[tokio::test]
    async fn test_always_not_configured() {
        let challenge = Challenge {
            kind: ChallengeKind::ImageText,
            image_base64: String::new(),
            page_url: "https://shop.test/orders".to_string(),
        };
        let err = DisabledResolver
            .solve(&challenge, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NotConfigured));
    }
}
