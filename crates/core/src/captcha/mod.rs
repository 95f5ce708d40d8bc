//! CAPTCHA resolver abstraction.
//!
//! The executor hands a captured `Challenge` to a `CaptchaResolver` once per
//! attempt; any failure leaves the order retryable.

mod disabled;
mod task_api;
mod types;

use std::sync::Arc;

pub use disabled::DisabledResolver;
pub use task_api::TaskApiResolver;
pub use types::*;

use crate::config::CaptchaConfig;

/// Build the resolver selected by configuration.
///
/// Without an API key every challenge fails as retryable.
pub fn create_resolver(config: &CaptchaConfig) -> Result<Arc<dyn CaptchaResolver>, ResolverError> {
    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Ok(Arc::new(TaskApiResolver::new(config, key.to_string())?)),
        None => Ok(Arc::new(DisabledResolver)),
    }
}
