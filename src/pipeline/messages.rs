//! Message types passed between pipeline stages and broadcast to clients.

use crate::state::AvatarState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A TTS-ready slice of model output text.
///
/// Sequence numbers establish total order within one turn, assigned
/// monotonically from 0 by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position of this chunk within the turn.
    pub seq: u64,
    /// Complete chunk text.
    pub text: String,
}

/// A synthesized audio artifact queued for sequential playback.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    /// Sequence number inherited from the source [`TextChunk`].
    pub seq: u64,
    /// Path to the synthesized WAV artifact.
    pub audio_path: PathBuf,
    /// Expression tag for the avatar while this item plays.
    pub expression: String,
    /// Source text, forwarded to clients for subtitles.
    pub text: String,
    /// Declared playback duration in seconds. The worker paces itself by
    /// this value; it never waits for a client-side completion event.
    pub duration_secs: f64,
}

/// Parameters for a named animation clip command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationClip {
    /// Path or URL of the clip (`.vrma` or `.fbx`).
    pub animation_url: String,
    /// Play once then stop instead of looping.
    pub play_once: bool,
    /// Seconds to crop from the start of the clip.
    pub crop_start: f64,
    /// Seconds to crop from the end of the clip.
    pub crop_end: f64,
    /// Play in place (no root motion).
    pub lock_position: bool,
    /// Keep the character at the end position after the clip.
    pub track_position: bool,
}

impl Default for AnimationClip {
    fn default() -> Self {
        Self {
            animation_url: String::new(),
            play_once: false,
            crop_start: 0.0,
            crop_end: 0.0,
            lock_position: false,
            track_position: true,
        }
    }
}

impl AnimationClip {
    /// A looping clip with default crop/position settings.
    #[must_use]
    pub fn looping(url: impl Into<String>) -> Self {
        Self {
            animation_url: url.into(),
            ..Self::default()
        }
    }
}

/// Commands pushed to display clients.
///
/// This is the complete wire protocol: one closed variant per command kind,
/// tagged with the `type` field display clients dispatch on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayCommand {
    /// Play an audio cue with the given expression and subtitle text.
    StartAnimation {
        /// Path of the audio artifact, relative to the public audio dir.
        audio_path: String,
        /// Expression tag.
        expression: String,
        /// Subtitle text.
        audio_text: String,
        /// Declared duration in whole seconds.
        audio_duration: u64,
    },
    /// Start a VRMA animation clip.
    StartVrma {
        #[serde(flatten)]
        clip: AnimationClip,
    },
    /// Start a Mixamo (FBX) animation clip.
    StartMixamo {
        #[serde(flatten)]
        clip: AnimationClip,
    },
    /// Set the avatar's animation state.
    SetState {
        /// One of the four named states.
        state: AvatarState,
    },
}

impl DisplayCommand {
    /// Build the audio-cue command for a playback item.
    #[must_use]
    pub fn for_item(item: &PlaybackItem) -> Self {
        Self::StartAnimation {
            audio_path: item.audio_path.to_string_lossy().into_owned(),
            expression: item.expression.clone(),
            audio_text: item.text.clone(),
            // Whole seconds on the wire, matching the display protocol.
            audio_duration: item.duration_secs.round().max(0.0) as u64,
        }
    }
}

/// Messages pushed to status observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// Display-client connection count changed (or an observer just joined).
    CountUpdate {
        /// Current number of connected display clients.
        count: usize,
    },
}
