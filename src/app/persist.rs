//! On-disk session state.
//!
//! The transcript, theme and remembered user context survive restarts in a
//! single JSON file under the platform data directory. Loading is tolerant: a
//! missing or corrupt file yields a fresh session rather than an error.

use crate::app::chat::{truncate_conversation, ChatMessage};
use crate::error::{CompanionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// State carried across sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub conversation: Vec<ChatMessage>,
    pub theme: String,
    pub user_context: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Single-file JSON store for [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store at the platform default location
    /// (`<data_dir>/solmate/state.json`).
    ///
    /// # Errors
    ///
    /// Returns `Persist` when no platform data directory exists.
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| CompanionError::Persist("no platform data directory".to_owned()))?;
        Ok(Self::at(base.join("solmate").join("state.json")))
    }

    /// Store at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state, trimming the hydrated transcript to
    /// `max_conversation` turns. Missing or unreadable files yield `None`.
    #[must_use]
    pub fn load(&self, max_conversation: usize) -> Option<PersistedState> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("cannot read {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str::<PersistedState>(&text) {
            Ok(mut state) => {
                truncate_conversation(&mut state.conversation, max_conversation);
                info!(
                    "restored session: {} transcript lines",
                    state.conversation.len()
                );
                Some(state)
            }
            Err(e) => {
                warn!("corrupt state file {}, starting fresh: {e}", self.path.display());
                None
            }
        }
    }

    /// Write state to disk, stamping `saved_at`. The write goes through a
    /// sibling temp file and a rename so a crash never leaves a torn file.
    ///
    /// # Errors
    ///
    /// Returns `Persist` on serialization or filesystem failure.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let mut stamped = state.clone();
        stamped.saved_at = Some(Utc::now());
        let text = serde_json::to_string_pretty(&stamped)
            .map_err(|e| CompanionError::Persist(format!("cannot serialize state: {e}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
