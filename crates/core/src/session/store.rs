//! File-backed session persistence.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::persist::{read_json, write_json, PersistenceError};

use super::Session;

/// Persists the current session in a single JSON file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session.
    ///
    /// An unreadable or corrupt file is treated as "no session": the worst
    /// case is one extra login.
    pub fn load(&self) -> Option<Session> {
        match read_json::<Session>(&self.path) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring unusable session file: {}", e);
                None
            }
        }
    }

    /// Overwrite the stored session.
    pub fn save(&self, session: &Session) -> Result<(), PersistenceError> {
        write_json(&self.path, session, "session")?;
        debug!("Session saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the stored session, if any.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
