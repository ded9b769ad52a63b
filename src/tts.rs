//! Text-to-speech synthesis boundary.
//!
//! Synthesis is a remote GPT-SoVITS call: text in, WAV bytes out. The
//! adapter validates the response body before writing the artifact and
//! reads the playback duration from the WAV header. One failed call is a
//! per-chunk event; the pipeline logs it and skips that chunk's playback.

use crate::config::TtsConfig;
use crate::error::{AvatarError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Duration assumed when the WAV header cannot be read back.
const FALLBACK_DURATION_SECS: f64 = 3.0;

/// Minimum plausible WAV body; SoVITS occasionally returns a tiny error
/// body with a 200 status.
const MIN_WAV_BYTES: usize = 2000;

/// A completed synthesis: artifact on disk plus its playback duration.
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// Path of the written WAV artifact.
    pub audio_path: PathBuf,
    /// Playback duration in seconds.
    pub duration_secs: f64,
}

/// One text chunk in, one audio artifact out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into a WAV artifact.
    ///
    /// # Errors
    ///
    /// [`AvatarError::Tts`] for transient network failures,
    /// [`AvatarError::TtsInvalid`] for non-retryable validation failures.
    async fn synthesize(&self, text: &str) -> Result<Synthesis>;
}

/// GPT-SoVITS HTTP adapter.
pub struct SovitsSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl SovitsSynthesizer {
    /// Build an adapter with the configured endpoint and request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AvatarError::Config(format!("TTS client: {e}")))?;
        Ok(Self { client, config })
    }

    fn artifact_path(&self) -> PathBuf {
        let filename = format!("output_{}.wav", Uuid::new_v4().simple());
        self.config.audio_dir.join(filename)
    }
}

#[async_trait]
impl Synthesizer for SovitsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Synthesis> {
        let url = format!("{}/", self.config.base_url.trim_end_matches('/'));
        let payload = serde_json::json!({
            "text": text,
            "text_language": "auto",
            "prompt_language": "auto",
            "refer_wav_path": self.config.refer_wav_path,
            "prompt_text": self.config.prompt_text,
            "top_k": self.config.top_k,
            "top_p": self.config.top_p,
            "temperature": self.config.temperature,
            "speed": self.config.speed,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AvatarError::Tts(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(500).collect();
            let message = format!("HTTP {status}: {snippet}");
            return if status.is_client_error() {
                Err(AvatarError::TtsInvalid(message))
            } else {
                Err(AvatarError::Tts(message))
            };
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| AvatarError::Tts(format!("body read failed: {e}")))?;

        if data.len() < MIN_WAV_BYTES
            || (!data.starts_with(b"RIFF") && !data[..data.len().min(32)].windows(4).any(|w| w == b"WAVE"))
        {
            return Err(AvatarError::TtsInvalid(format!(
                "response is too small or not WAV (size={})",
                data.len()
            )));
        }

        let audio_path = self.artifact_path();
        if let Some(parent) = audio_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&audio_path, &data)?;

        let duration_secs = wav_duration_secs(&audio_path).unwrap_or_else(|e| {
            warn!("cannot read WAV duration from {}: {e}", audio_path.display());
            FALLBACK_DURATION_SECS
        });

        Ok(Synthesis {
            audio_path,
            duration_secs,
        })
    }
}

/// Read a WAV file's playback duration from its header.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not valid WAV.
pub fn wav_duration_secs(path: &std::path::Path) -> Result<f64> {
    let reader =
        hound::WavReader::open(path).map_err(|e| AvatarError::TtsInvalid(e.to_string()))?;
    let spec = reader.spec();
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

/// Normalize model output for synthesis.
///
/// Hyphens become spaces, parentheticals are dropped, fancy apostrophes are
/// normalized, whitespace is collapsed, and the result is lowercased. The
/// unmodified text is what display clients receive as subtitles.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    // Parenthetical text is held back until its closing paren; only a
    // completed pair is dropped, an unclosed one is kept.
    let mut pending = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                pending.push(c);
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    pending.clear();
                } else {
                    pending.push(c);
                }
            }
            _ => {
                let out = if depth == 0 { &mut stripped } else { &mut pending };
                match c {
                    '-' => out.push(' '),
                    '\u{2019}' => out.push('\''),
                    _ => out.push(c),
                }
            }
        }
    }
    stripped.push_str(&pending);
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn silence_wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let samples = (seconds * f64::from(sample_rate)) as usize;
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn config(base_url: String, audio_dir: std::path::PathBuf) -> TtsConfig {
        TtsConfig {
            base_url,
            audio_dir,
            refer_wav_path: "ref.wav".to_owned(),
            prompt_text: "reference transcript".to_owned(),
            ..TtsConfig::default()
        }
    }

    #[tokio::test]
    async fn synthesize_writes_artifact_and_reads_duration() {
        let server = MockServer::start().await;
        let wav = silence_wav(2.0, 22_050);
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!({
                "text": "hello there.",
                "text_language": "auto",
                "prompt_language": "auto",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let synth = SovitsSynthesizer::new(config(server.uri(), dir.path().to_path_buf())).unwrap();

        let result = synth.synthesize("hello there.").await.unwrap();
        assert!(result.audio_path.exists());
        assert!((result.duration_secs - 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn undersized_body_is_a_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not audio".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let synth = SovitsSynthesizer::new(config(server.uri(), dir.path().to_path_buf())).unwrap();

        let err = synth.synthesize("hi").await.unwrap_err();
        assert!(matches!(err, AvatarError::TtsInvalid(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let synth = SovitsSynthesizer::new(config(server.uri(), dir.path().to_path_buf())).unwrap();

        let err = synth.synthesize("hi").await.unwrap_err();
        assert!(matches!(err, AvatarError::Tts(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unsupported language"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let synth = SovitsSynthesizer::new(config(server.uri(), dir.path().to_path_buf())).unwrap();

        let err = synth.synthesize("hi").await.unwrap_err();
        assert!(matches!(err, AvatarError::TtsInvalid(_)));
    }

    #[test]
    fn clean_text_normalizes_for_synthesis() {
        assert_eq!(
            clean_text("Well - that\u{2019}s GREAT (she laughs)  right?"),
            "well that's great right?"
        );
        assert_eq!(clean_text("Multi-word hy-phens"), "multi word hy phens");
        assert_eq!(clean_text("(entirely aside)"), "");
    }

    #[test]
    fn clean_text_keeps_unclosed_parenthetical() {
        assert_eq!(
            clean_text("Keep going (no closing here"),
            "keep going (no closing here"
        );
        assert_eq!(clean_text("Stray) paren stays."), "stray) paren stays.");
    }

    #[test]
    fn wav_duration_matches_written_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, silence_wav(1.5, 44_100)).unwrap();
        let duration = wav_duration_secs(&path).unwrap();
        assert!((duration - 1.5).abs() < 0.01);
    }
}
