//! Configuration types for the avatar response pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the avatar server and pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// HTTP/websocket server settings.
    pub server: ServerConfig,
    /// Language model streaming settings.
    pub llm: LlmConfig,
    /// Text-to-speech synthesis settings.
    pub tts: TtsConfig,
    /// Text chunking settings.
    pub chunker: ChunkerConfig,
    /// Conversation history persistence settings.
    pub history: HistoryConfig,
    /// Animation clip paths broadcast at pipeline milestones.
    pub animation: AnimationConfig,
}

/// Bind address for the control surface and push channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default loopback).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8001,
        }
    }
}

/// OpenAI-compatible streaming LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the chat completions API (with or without `/v1`).
    pub api_url: String,
    /// Model identifier sent with each request.
    pub api_model: String,
    /// Environment variable holding the API key. The process refuses to
    /// start when this variable is unset.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Maximum tokens per response.
    pub max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/v1".to_owned(),
            api_model: "gpt-4.1-mini".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

/// GPT-SoVITS synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of the GPT-SoVITS API server.
    pub base_url: String,
    /// Reference audio sent with each request.
    pub refer_wav_path: String,
    /// Transcript of the reference audio.
    pub prompt_text: String,
    /// Request timeout in seconds. Synthesis is slow; the default is generous.
    pub timeout_secs: u64,
    /// Playback speed factor.
    pub speed: f64,
    /// Top-k sampling.
    pub top_k: u32,
    /// Top-p sampling.
    pub top_p: f64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Directory where synthesized WAV artifacts are written. Display
    /// clients resolve broadcast `audio_path` values against this directory.
    pub audio_dir: PathBuf,
    /// Expression tag attached to every playback item.
    pub default_expression: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9880".to_owned(),
            refer_wav_path: String::new(),
            prompt_text: String::new(),
            timeout_secs: 180,
            speed: 1.0,
            top_k: 15,
            top_p: 1.0,
            temperature: 1.0,
            audio_dir: PathBuf::from("audio"),
            default_expression: "relaxed".to_owned(),
        }
    }
}

/// Punctuation/length segmentation settings for TTS-sized chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Minimum buffer length before a sentence terminator emits a chunk.
    pub min_chunk_len: usize,
    /// Buffer length at which a chunk is emitted regardless of punctuation.
    pub max_chunk_len: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_len: 30,
            max_chunk_len: 120,
        }
    }
}

/// Conversation history persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// JSON file holding the ordered turn sequence for this character.
    pub history_file: PathBuf,
    /// Persona/system prompt used as the first turn of a fresh history.
    pub system_prompt: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from("history.json"),
            system_prompt: "You are a helpful assistant.".to_owned(),
        }
    }
}

/// Animation clips broadcast at pipeline milestones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Clip started once at the beginning of a talking run.
    pub talking_clip: String,
    /// Clip started when the model call is issued.
    pub thinking_clip: String,
    /// Clip started when the turn loop returns to idle.
    pub idle_clip: String,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            talking_clip: "animations/mixamo/Talking.fbx".to_owned(),
            thinking_clip: "animations/mixamo/Thinking.fbx".to_owned(),
            idle_clip: "animations/mixamo/Idle.fbx".to_owned(),
        }
    }
}

impl AvatarConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AvatarError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot
    /// be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AvatarError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/hikari/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("hikari")
            .join("config.toml")
    }

    /// Bind address string for the server socket.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AvatarConfig::default();
        assert!(config.server.port > 0);
        assert!(!config.llm.api_url.is_empty());
        assert!(!config.llm.api_model.is_empty());
        assert!(config.llm.max_tokens > 0);
        assert!(config.chunker.min_chunk_len < config.chunker.max_chunk_len);
        assert!(config.tts.timeout_secs > 0);
        assert!(!config.history.system_prompt.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AvatarConfig::default();
        config.server.port = 9100;
        config.chunker.min_chunk_len = 12;
        config.history.system_prompt = "You are Riko.".to_owned();

        config.save_to_file(&path).unwrap();
        let loaded = AvatarConfig::from_file(&path).unwrap();

        assert_eq!(loaded.server.port, 9100);
        assert_eq!(loaded.chunker.min_chunk_len, 12);
        assert_eq!(loaded.history.system_prompt, "You are Riko.");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[server]\nport = 9200\n").unwrap();

        let loaded = AvatarConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9200);
        assert_eq!(loaded.chunker.max_chunk_len, 120);
    }
}
