//! Conversation history persistence.
//!
//! The history is an ordered JSON array of role-tagged turns, read whole at
//! the start of a turn and written whole after the assistant response
//! completes. The first turn is always the persona/system turn. Saves go
//! through a temp file plus rename so a reader never observes a partially
//! written history.

use crate::error::{AvatarError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona/system prompt.
    System,
    /// Transcribed user speech.
    User,
    /// Completed assistant response.
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author role.
    pub role: Role,
    /// Turn text.
    pub content: String,
}

impl Turn {
    /// Construct a turn.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Durable store for one character's conversation history.
pub struct ConversationStore {
    path: PathBuf,
    system_prompt: String,
}

impl ConversationStore {
    /// Create a store backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, system_prompt: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Load the ordered turn sequence.
    ///
    /// A missing file yields a fresh history containing only the system
    /// turn. A persisted history missing its system turn gets one prepended,
    /// preserving the exactly-one-system-turn-first invariant.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<Turn>> {
        if !self.path.exists() {
            return Ok(vec![self.system_turn()]);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut turns: Vec<Turn> = serde_json::from_str(&content)
            .map_err(|e| AvatarError::History(format!("{}: {e}", self.path.display())))?;
        if turns.first().map(|t| t.role) != Some(Role::System) {
            turns.insert(0, self.system_turn());
        }
        Ok(turns)
    }

    /// Overwrite the persisted history atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be serialized or written.
    pub fn save(&self, turns: &[Turn]) -> Result<()> {
        let content = serde_json::to_string_pretty(turns)
            .map_err(|e| AvatarError::History(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.tmp_path();
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Append a user turn (read-modify-write).
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be loaded or saved.
    pub fn append_user(&self, text: &str) -> Result<()> {
        self.append(Turn::new(Role::User, text))
    }

    /// Append an assistant turn (read-modify-write).
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be loaded or saved.
    pub fn append_assistant(&self, text: &str) -> Result<()> {
        self.append(Turn::new(Role::Assistant, text))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, turn: Turn) -> Result<()> {
        let mut turns = self.load()?;
        turns.push(turn);
        self.save(&turns)
    }

    fn system_turn(&self) -> Turn {
        Turn::new(Role::System, self.system_prompt.clone())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_owned();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
