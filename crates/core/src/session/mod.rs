//! Authenticated storefront sessions: persistence and acquisition.

mod manager;
mod store;
mod types;

pub use manager::{SessionAuthenticator, SessionManager};
pub use store::SessionStore;
pub use types::{Cookie, Credentials, Session};

use thiserror::Error;

use crate::persist::PersistenceError;

/// Authentication and expiry failures. Always abort the current run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("login presented a challenge that could not be completed")]
    ChallengeRequired,

    #[error("session expired or was rejected")]
    Expired,

    #[error("storefront unavailable: {0}")]
    Unavailable(String),

    #[error("could not establish a session after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
