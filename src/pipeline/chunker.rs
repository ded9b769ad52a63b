//! Punctuation/length segmentation of the model's delta stream.
//!
//! Deltas accumulate in a buffer; the buffer is emitted as one chunk when it
//! ends in sentence-terminal punctuation and has reached the minimum length,
//! or unconditionally once it reaches the maximum length. The residual is
//! flushed at end of stream. One chunker serves exactly one turn.

use crate::config::ChunkerConfig;
use crate::pipeline::messages::TextChunk;

/// Characters that end a sentence for chunking purposes.
const SENTENCE_TERMINALS: [char; 4] = ['.', '?', '!', '…'];

/// Accumulates model deltas and emits TTS-ready chunks in arrival order.
pub struct SentenceChunker {
    buffer: String,
    min_len: usize,
    max_len: usize,
    next_seq: u64,
}

impl SentenceChunker {
    /// Create a chunker for one turn. Sequence numbers start at 0.
    #[must_use]
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            buffer: String::new(),
            min_len: config.min_chunk_len,
            max_len: config.max_chunk_len,
            next_seq: 0,
        }
    }

    /// Feed one delta; returns any chunk completed by it.
    ///
    /// The whole buffer is emitted as a single chunk when a boundary is
    /// reached, so a chunk may exceed the maximum length if one delta
    /// carries it past the threshold.
    pub fn feed(&mut self, delta: &str) -> Option<TextChunk> {
        if delta.is_empty() {
            return None;
        }
        self.buffer.push_str(delta);

        let len = self.buffer.chars().count();
        let terminal = self
            .buffer
            .chars()
            .next_back()
            .is_some_and(|c| SENTENCE_TERMINALS.contains(&c));

        if (terminal && len >= self.min_len) || len >= self.max_len {
            self.emit()
        } else {
            None
        }
    }

    /// Flush the residual buffer at end of stream.
    ///
    /// A whitespace-only residual is discarded, not emitted.
    pub fn flush(&mut self) -> Option<TextChunk> {
        self.emit()
    }

    fn emit(&mut self) -> Option<TextChunk> {
        let text = self.buffer.trim().to_owned();
        self.buffer.clear();
        if text.is_empty() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(TextChunk { seq, text })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn chunker(min: usize, max: usize) -> SentenceChunker {
        SentenceChunker::new(&ChunkerConfig {
            min_chunk_len: min,
            max_chunk_len: max,
        })
    }

    #[test]
    fn full_sentence_emits_one_chunk() {
        let mut c = chunker(10, 120);
        let chunk = c
            .feed("Hello there. How are you today my friend?")
            .unwrap();
        assert_eq!(chunk.seq, 0);
        assert_eq!(chunk.text, "Hello there. How are you today my friend?");
        assert!(c.flush().is_none());
    }

    #[test]
    fn short_sentences_wait_for_flush() {
        let mut c = chunker(10, 120);
        assert!(c.feed("Hi. ").is_none());
        assert!(c.feed("Ok.").is_none());
        let chunk = c.flush().unwrap();
        assert_eq!(chunk.text, "Hi. Ok.");
        assert_eq!(chunk.seq, 0);
    }

    #[test]
    fn max_length_forces_emission_without_punctuation() {
        let mut c = chunker(10, 20);
        assert!(c.feed("twelve chars").is_none());
        let chunk = c.feed(" and then some more").unwrap();
        assert_eq!(chunk.text, "twelve chars and then some more");
    }

    #[test]
    fn sequence_numbers_increase_monotonically() {
        let mut c = chunker(5, 120);
        let first = c.feed("One sentence here.").unwrap();
        let second = c.feed(" Another one follows!").unwrap();
        assert!(c.feed(" trailing").is_none());
        let third = c.flush().unwrap();
        assert_eq!((first.seq, second.seq, third.seq), (0, 1, 2));
    }

    #[test]
    fn whitespace_residual_is_dropped() {
        let mut c = chunker(10, 120);
        assert!(c.feed("   ").is_none());
        assert!(c.flush().is_none());

        let mut c = chunker(10, 120);
        assert!(c.flush().is_none());
    }

    #[test]
    fn ellipsis_counts_as_terminal_punctuation() {
        let mut c = chunker(5, 120);
        let chunk = c.feed("Well then…").unwrap();
        assert_eq!(chunk.text, "Well then…");
    }

    #[test]
    fn emitted_text_is_trimmed() {
        let mut c = chunker(5, 120);
        let chunk = c.feed("  Hello there.").unwrap();
        assert_eq!(chunk.text, "Hello there.");
    }
}
