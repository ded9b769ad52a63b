//! Hikari: realtime voice-driven VRM avatar response pipeline.
//!
//! A streaming model response is segmented into TTS-sized chunks, each chunk
//! is synthesized into an audio artifact, and the artifacts are played back
//! strictly in order — paced by their declared durations — while display
//! clients receive synchronized animation and state commands over a
//! persistent websocket push channel.
//!
//! # Architecture
//!
//! - **Chunker**: punctuation/length segmentation of the model delta stream
//! - **Synthesizer**: remote GPT-SoVITS call, one WAV artifact per chunk
//! - **Playback queue**: single duration-paced worker, strict FIFO
//! - **Broadcast hub**: fan-out to display clients and status observers
//! - **State controller**: idle / listening / thinking / talking
//! - **History store**: durable role-tagged turn log, one system turn first

pub mod config;
pub mod error;
pub mod history;
pub mod hub;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod tts;

pub use config::AvatarConfig;
pub use error::{AvatarError, Result};
pub use hub::BroadcastHub;
pub use pipeline::coordinator::{TurnLoop, UserInputSource};
pub use pipeline::playback::PlaybackQueue;
pub use state::{AvatarState, StateController};
