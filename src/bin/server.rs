//! Avatar server binary: control surface plus the conversation turn loop.
//!
//! Usage: `hikari-server [config.toml]`. The config file must exist; the
//! LLM API key must be present in the configured environment variable.
//! Utterances are read line-by-line from stdin (push-to-talk style) so the
//! server runs without any audio capture stack.

use anyhow::{Context, bail};
use async_trait::async_trait;
use hikari::config::AvatarConfig;
use hikari::history::ConversationStore;
use hikari::hub::BroadcastHub;
use hikari::llm::ChatClient;
use hikari::pipeline::coordinator::{TurnLoop, UserInputSource};
use hikari::pipeline::playback::PlaybackQueue;
use hikari::server::{self, AppState};
use hikari::state::StateController;
use hikari::tts::SovitsSynthesizer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Line-buffered stdin utterance source.
struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl UserInputSource for StdinInput {
    async fn next_utterance(&mut self) -> hikari::Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AvatarConfig::default_config_path);
    if !config_path.exists() {
        bail!("config not found at {}", config_path.display());
    }
    let config = AvatarConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let hub = Arc::new(BroadcastHub::new());
    let controller = Arc::new(StateController::new(Arc::clone(&hub)));
    let queue = Arc::new(PlaybackQueue::spawn(
        Arc::clone(&hub),
        Arc::clone(&controller),
        config.animation.clone(),
    ));
    let store = ConversationStore::new(
        config.history.history_file.clone(),
        config.history.system_prompt.clone(),
    );
    let llm = ChatClient::new(&config.llm).context("LLM client")?;
    let synthesizer = SovitsSynthesizer::new(config.tts.clone()).context("TTS client")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, shutting down");
            cancel.cancel();
        });
    }

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    let app = AppState {
        hub: Arc::clone(&hub),
        controller: Arc::clone(&controller),
    };
    let server_task = tokio::spawn(server::serve(app, listener));

    let turn_loop = TurnLoop::new(
        config,
        hub,
        controller,
        queue,
        store,
        llm,
        synthesizer,
        StdinInput::new(),
        cancel,
    );
    turn_loop.run().await?;

    server_task.abort();
    Ok(())
}
