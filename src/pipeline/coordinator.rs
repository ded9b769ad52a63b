//! Main turn loop wiring capture, model streaming, synthesis, and playback.
//!
//! One logical thread drives the conversation: wait for the playback queue
//! to drain, capture the next utterance, stream the model response through
//! the chunker, synthesize each chunk, and enqueue the results for the
//! playback worker. Avatar state transitions ride the same milestones.

use crate::config::AvatarConfig;
use crate::error::Result;
use crate::history::{ConversationStore, Role, Turn};
use crate::hub::BroadcastHub;
use crate::llm::{ResponseStreamer, StreamEvent};
use crate::pipeline::chunker::SentenceChunker;
use crate::pipeline::messages::{AnimationClip, DisplayCommand, PlaybackItem, TextChunk};
use crate::pipeline::playback::PlaybackQueue;
use crate::state::{AvatarState, StateController};
use crate::tts::{Synthesizer, clean_text};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause before retrying after a failed turn.
const TURN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Source of user utterances, one per turn.
///
/// Capture and transcription are external collaborators; the loop only
/// needs completed utterance text.
#[async_trait]
pub trait UserInputSource: Send {
    /// Block until the next utterance is available. `None` ends the loop.
    ///
    /// # Errors
    ///
    /// A failed capture fails the current turn only; the loop continues.
    async fn next_utterance(&mut self) -> Result<Option<String>>;
}

/// Outcome of a single turn.
enum TurnOutcome {
    /// Response fully streamed and persisted.
    Completed,
    /// Interrupted mid-stream; the partial response was not persisted.
    Interrupted,
}

/// The conversation turn loop.
pub struct TurnLoop<L, S, I> {
    config: AvatarConfig,
    hub: Arc<BroadcastHub>,
    controller: Arc<StateController>,
    queue: Arc<PlaybackQueue>,
    store: ConversationStore,
    llm: L,
    synthesizer: S,
    input: I,
    cancel: CancellationToken,
}

impl<L, S, I> TurnLoop<L, S, I>
where
    L: ResponseStreamer,
    S: Synthesizer,
    I: UserInputSource,
{
    /// Assemble a turn loop over already-constructed collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AvatarConfig,
        hub: Arc<BroadcastHub>,
        controller: Arc<StateController>,
        queue: Arc<PlaybackQueue>,
        store: ConversationStore,
        llm: L,
        synthesizer: S,
        input: I,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            hub,
            controller,
            queue,
            store,
            llm,
            synthesizer,
            input,
            cancel,
        }
    }

    /// Run turns until the input source ends or the loop is cancelled.
    /// Stops the playback worker on the way out.
    ///
    /// # Errors
    ///
    /// Individual turn failures are logged and retried; only playback
    /// shutdown failures propagate.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Let queued audio finish before listening again.
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = self.queue.wait_until_finished(None) => {}
            }

            self.hub
                .broadcast_display(&DisplayCommand::StartMixamo {
                    clip: AnimationClip::looping(self.config.animation.idle_clip.clone()),
                })
                .await;
            self.controller.set_state(AvatarState::Idle).await;

            self.controller.set_state(AvatarState::Listening).await;
            let utterance = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.input.next_utterance() => match result {
                    Ok(Some(text)) => text,
                    Ok(None) => break,
                    Err(e) => {
                        error!("capture failed: {e}");
                        tokio::time::sleep(TURN_RETRY_DELAY).await;
                        continue;
                    }
                }
            };
            if utterance.trim().is_empty() {
                continue;
            }

            self.hub
                .broadcast_display(&DisplayCommand::StartMixamo {
                    clip: AnimationClip::looping(self.config.animation.thinking_clip.clone()),
                })
                .await;
            self.controller.set_state(AvatarState::Thinking).await;

            match self.run_turn(&utterance).await {
                Ok(TurnOutcome::Completed) => {}
                Ok(TurnOutcome::Interrupted) => break,
                Err(e) => {
                    // One bad turn never takes the process down.
                    error!("turn failed: {e}");
                    tokio::time::sleep(TURN_RETRY_DELAY).await;
                }
            }
        }

        info!("turn loop stopping");
        self.queue.stop().await;
        Ok(())
    }

    /// Stream one response, synthesizing and enqueueing chunks as they
    /// complete, then persist the full assistant text.
    async fn run_turn(&mut self, utterance: &str) -> Result<TurnOutcome> {
        let mut turns = self.store.load()?;
        turns.push(Turn::new(Role::User, utterance));

        info!("streaming response");
        let mut chunker = SentenceChunker::new(&self.config.chunker);
        let mut rx = self.llm.stream_turn(&turns);
        let mut assistant_text = String::new();

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    // A partially streamed response is never persisted.
                    return Ok(TurnOutcome::Interrupted);
                }
                event = rx.recv() => event,
            };
            match event {
                Some(StreamEvent::Delta(delta)) => {
                    if let Some(chunk) = chunker.feed(&delta) {
                        self.handle_chunk(chunk, &mut assistant_text).await;
                    }
                }
                Some(StreamEvent::Error(e)) => {
                    return Err(crate::error::AvatarError::Llm(e));
                }
                None => break,
            }
        }
        if let Some(chunk) = chunker.flush() {
            self.handle_chunk(chunk, &mut assistant_text).await;
        }

        let final_text = assistant_text.trim().to_owned();
        info!("assistant response complete ({} chars)", final_text.len());
        turns.push(Turn::new(Role::Assistant, final_text));
        self.store.save(&turns)?;
        Ok(TurnOutcome::Completed)
    }

    /// Synthesize one chunk and enqueue it for playback. Synthesis failure
    /// skips this chunk's playback; the turn continues.
    async fn handle_chunk(&self, chunk: TextChunk, assistant_text: &mut String) {
        assistant_text.push_str(&chunk.text);
        assistant_text.push(' ');

        let tts_text = clean_text(&chunk.text);
        if tts_text.is_empty() {
            return;
        }

        match self.synthesizer.synthesize(&tts_text).await {
            Ok(synthesis) => {
                let item = PlaybackItem {
                    seq: chunk.seq,
                    audio_path: synthesis.audio_path,
                    expression: self.config.tts.default_expression.clone(),
                    text: chunk.text,
                    duration_secs: synthesis.duration_secs,
                };
                if let Err(e) = self.queue.enqueue(item) {
                    warn!("enqueue failed for chunk {}: {e}", chunk.seq);
                }
            }
            Err(e) => {
                warn!("synthesis failed for chunk {}: {e}; skipping playback", chunk.seq);
            }
        }
    }
}
