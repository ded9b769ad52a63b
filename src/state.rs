//! Avatar animation state and its controller.
//!
//! The state machine has four externally-triggered states. Transitions are
//! driven by pipeline milestones (capture started, model call issued, first
//! playback item, queue drained) and by the `/set_state` control endpoint;
//! no ordering between states is enforced.

use crate::hub::BroadcastHub;
use crate::pipeline::messages::DisplayCommand;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

/// The avatar's current animation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarState {
    /// Looking around naturally, waiting for input.
    Idle,
    /// Capture in progress.
    Listening,
    /// Model call in flight.
    Thinking,
    /// Playback run active.
    Talking,
}

impl AvatarState {
    /// All valid states, in the order reported to callers.
    pub const ALL: [Self; 4] = [Self::Idle, Self::Listening, Self::Thinking, Self::Talking];

    /// Wire name of this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Talking => "talking",
        }
    }

    /// Parse a wire name. Returns `None` for anything but the four states.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "thinking" => Some(Self::Thinking),
            "talking" => Some(Self::Talking),
            _ => None,
        }
    }

    /// Valid wire names, for error responses.
    #[must_use]
    pub fn valid_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Display for AvatarState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the process-wide avatar state and broadcasts every change.
///
/// All mutation goes through [`StateController::set_state`]; readers always
/// observe the latest accepted value.
pub struct StateController {
    state: Mutex<AvatarState>,
    hub: Arc<BroadcastHub>,
}

impl StateController {
    /// Create a controller starting in the idle state.
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self {
            state: Mutex::new(AvatarState::Idle),
            hub,
        }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> AvatarState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set the state and broadcast the change to all display clients.
    ///
    /// The broadcast is awaited so callers observe delivery attempts
    /// completing before proceeding.
    pub async fn set_state(&self, state: AvatarState) {
        {
            let mut current = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *current = state;
        }
        info!("avatar state -> {state}");
        self.hub
            .broadcast_display(&DisplayCommand::SetState { state })
            .await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parses_the_four_states_only() {
        assert_eq!(AvatarState::from_name("idle"), Some(AvatarState::Idle));
        assert_eq!(
            AvatarState::from_name("listening"),
            Some(AvatarState::Listening)
        );
        assert_eq!(
            AvatarState::from_name("thinking"),
            Some(AvatarState::Thinking)
        );
        assert_eq!(AvatarState::from_name("talking"), Some(AvatarState::Talking));
        assert_eq!(AvatarState::from_name("dancing"), None);
        assert_eq!(AvatarState::from_name(""), None);
        assert_eq!(AvatarState::from_name("Idle"), None);
    }

    #[test]
    fn valid_names_match_wire_serialization() {
        for state in AvatarState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert_eq!(
            AvatarState::valid_names(),
            vec!["idle", "listening", "thinking", "talking"]
        );
    }

    #[tokio::test]
    async fn set_state_updates_current_and_broadcasts() {
        let hub = Arc::new(BroadcastHub::new());
        let controller = StateController::new(Arc::clone(&hub));
        assert_eq!(controller.current(), AvatarState::Idle);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.register_display(tx).await;
        // Drain nothing: registration itself sends no display commands.
        assert!(rx.try_recv().is_err());

        controller.set_state(AvatarState::Thinking).await;
        assert_eq!(controller.current(), AvatarState::Thinking);

        let sent = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(value["type"], "set_state");
        assert_eq!(value["state"], "thinking");
    }
}
