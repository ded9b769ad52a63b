//! Streaming model client (OpenAI-compatible chat completions).
//!
//! The model is an opaque source of ordered text deltas for one turn. The
//! blocking SSE read runs on a `spawn_blocking` thread and deltas are
//! bridged into an async channel; the channel closing marks end of stream.

use crate::config::LlmConfig;
use crate::error::{AvatarError, Result};
use crate::history::Turn;
use tokio::sync::mpsc;
use tracing::info;

/// Channel capacity for delta tokens in flight.
const DELTA_CHANNEL_SIZE: usize = 64;

/// One event from the model stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text delta.
    Delta(String),
    /// The stream failed; no further deltas will arrive.
    Error(String),
}

/// Source of an ordered delta stream for one turn.
pub trait ResponseStreamer: Send + Sync {
    /// Start streaming a response to `turns`. The receiver yields deltas in
    /// arrival order and closes at end of stream.
    fn stream_turn(&self, turns: &[Turn]) -> mpsc::Receiver<StreamEvent>;
}

/// OpenAI-compatible streaming chat client.
pub struct ChatClient {
    config: LlmConfig,
    api_key: String,
    agent: ureq::Agent,
}

impl ChatClient {
    /// Create a client, resolving the API key from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns a config error when the key variable is unset or empty; the
    /// process must refuse to start in that case.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                AvatarError::Config(format!(
                    "API key env var is missing or empty: {}",
                    config.api_key_env
                ))
            })?;
        info!(
            "chat client configured: {} model={}",
            config.api_url, config.api_model
        );
        Ok(Self {
            config: config.clone(),
            api_key,
            agent: ureq::agent(),
        })
    }

    fn completions_url(&self) -> String {
        let base = self
            .config
            .api_url
            .strip_suffix("/v1")
            .unwrap_or(&self.config.api_url);
        format!("{}/v1/chat/completions", base.trim_end_matches('/'))
    }
}

impl ResponseStreamer for ChatClient {
    fn stream_turn(&self, turns: &[Turn]) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_SIZE);

        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| serde_json::json!({"role": t.role, "content": t.content}))
            .collect();
        let body = serde_json::json!({
            "model": self.config.api_model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "max_tokens": self.config.max_tokens,
        });

        let url = self.completions_url();
        let agent = self.agent.clone();
        let api_key = self.api_key.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = read_sse(&agent, &url, &api_key, &body, &tx) {
                let _ = tx.blocking_send(StreamEvent::Error(e));
            }
        });

        rx
    }
}

/// Run the blocking SSE request, forwarding deltas until the stream ends or
/// the receiver goes away.
fn read_sse(
    agent: &ureq::Agent,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    tx: &mpsc::Sender<StreamEvent>,
) -> std::result::Result<(), String> {
    let body_str = serde_json::to_string(body).map_err(|e| format!("serialize request: {e}"))?;

    let response = agent
        .post(url)
        .set("Content-Type", "application/json")
        .set("Authorization", &format!("Bearer {api_key}"))
        .send_string(&body_str)
        .map_err(|e| format!("API request failed: {e}"))?;

    let reader = std::io::BufReader::new(response.into_reader());
    for line in std::io::BufRead::lines(reader) {
        let line = line.map_err(|e| format!("read error: {e}"))?;
        if line.is_empty() {
            continue;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            break;
        }

        let chunk: serde_json::Value =
            serde_json::from_str(data).map_err(|e| format!("JSON parse error: {e}"))?;

        if let Some(content) = chunk["choices"][0]["delta"]["content"].as_str()
            && !content.is_empty()
            && tx.blocking_send(StreamEvent::Delta(content.to_owned())).is_err()
        {
            break;
        }

        if chunk["choices"][0]["finish_reason"].as_str() == Some("stop") {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::history::Role;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_url: String) -> LlmConfig {
        LlmConfig {
            api_url,
            api_key_env: "HIKARI_TEST_LLM_KEY".to_owned(),
            ..LlmConfig::default()
        }
    }

    fn client(api_url: String) -> ChatClient {
        // Safety: test-only env mutation, name unique to this module.
        unsafe { std::env::set_var("HIKARI_TEST_LLM_KEY", "test-key") };
        ChatClient::new(&config(api_url)).unwrap()
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let chunk = serde_json::json!({
                "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
            });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn missing_api_key_refuses_to_construct() {
        let cfg = LlmConfig {
            api_key_env: "HIKARI_TEST_LLM_KEY_UNSET".to_owned(),
            ..LlmConfig::default()
        };
        assert!(matches!(ChatClient::new(&cfg), Err(AvatarError::Config(_))));
    }

    #[test]
    fn completions_url_handles_v1_suffix() {
        unsafe { std::env::set_var("HIKARI_TEST_LLM_KEY", "test-key") };
        let with = ChatClient::new(&config("http://host:1234/v1".to_owned())).unwrap();
        let without = ChatClient::new(&config("http://host:1234".to_owned())).unwrap();
        assert_eq!(with.completions_url(), "http://host:1234/v1/chat/completions");
        assert_eq!(
            without.completions_url(),
            "http://host:1234/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn streams_deltas_in_order_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hello", " there", "."])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(server.uri());
        let turns = vec![
            Turn::new(Role::System, "You are Riko."),
            Turn::new(Role::User, "hi"),
        ];

        let mut rx = client.stream_turn(&turns);
        let mut deltas = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta(d) => deltas.push(d),
                StreamEvent::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        assert_eq!(deltas, vec!["Hello", " there", "."]);
    }

    #[tokio::test]
    async fn http_failure_surfaces_as_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let mut rx = client.stream_turn(&[Turn::new(Role::User, "hi")]);

        match rx.recv().await {
            Some(StreamEvent::Error(e)) => assert!(e.contains("API request failed")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
