//! HTTP control surface and websocket push channels.
//!
//! Endpoints:
//! - `GET /` — minimal status page showing the live display-client count
//! - `POST /talk` — broadcast an audio cue to display clients
//! - `POST /animate` — broadcast an animation clip command
//! - `POST /set_state` — validate and broadcast an avatar state change
//! - `GET /ws` — display-client push channel
//! - `GET /ws_status` — status-observer push channel (count updates)

use crate::hub::BroadcastHub;
use crate::pipeline::messages::{AnimationClip, DisplayCommand};
use crate::state::{AvatarState, StateController};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and fan-out.
    pub hub: Arc<BroadcastHub>,
    /// Avatar state owner.
    pub controller: Arc<StateController>,
}

/// Build the router for the control surface and push channels.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/talk", post(talk))
        .route("/animate", post(animate))
        .route("/set_state", post(set_state))
        .route("/ws", any(ws_display))
        .route("/ws_status", any(ws_status))
        .with_state(state)
}

/// Serve the control surface on the given listener until the process exits.
///
/// # Errors
///
/// Returns an error if the server fails to run.
pub async fn serve(state: AppState, listener: TcpListener) -> crate::error::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("avatar server listening on {addr}");
    }
    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::AvatarError::Io(std::io::Error::other(e)))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of `POST /talk`.
#[derive(Debug, Deserialize)]
pub struct TalkRequest {
    /// Audio artifact path, as display clients resolve it.
    pub audio_path: String,
    /// Expression tag.
    #[serde(default = "default_expression")]
    pub expression: String,
    /// Subtitle text.
    pub audio_text: String,
    /// Declared duration in whole seconds.
    pub audio_duration: u64,
}

fn default_expression() -> String {
    "neutral".to_owned()
}

/// Body of `POST /animate`.
#[derive(Debug, Deserialize)]
pub struct AnimateRequest {
    /// `start_vrma`, `start_mixamo`, or `auto` (resolve from extension).
    pub animate_type: String,
    /// Clip parameters.
    #[serde(flatten)]
    pub clip: AnimationClip,
}

/// Body of `POST /set_state`.
#[derive(Debug, Deserialize)]
pub struct SetStateRequest {
    /// Requested state name.
    pub state: String,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

/// Status page: subscribes to `/ws_status` and renders the live count.
const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>Avatar Trigger Server</title></head>
  <body>
    <h1>Avatar Trigger Server</h1>
    <p>WebSocket clients: <span id="count">0</span></p>
    <script>
      const ws = new WebSocket(`ws://${location.host}/ws_status`);
      ws.onmessage = e => {
        const msg = JSON.parse(e.data);
        if (msg.type === 'count_update') {
          document.getElementById('count').textContent = msg.count;
        }
      };
    </script>
  </body>
</html>
"#;

async fn status_page() -> Html<&'static str> {
    Html(STATUS_PAGE)
}

async fn talk(State(state): State<AppState>, Json(req): Json<TalkRequest>) -> Json<serde_json::Value> {
    let command = DisplayCommand::StartAnimation {
        audio_path: req.audio_path,
        expression: req.expression,
        audio_text: req.audio_text,
        audio_duration: req.audio_duration,
    };
    state.hub.broadcast_display(&command).await;
    Json(serde_json::json!({"status": "sent", "payload": command}))
}

async fn animate(State(state): State<AppState>, Json(req): Json<AnimateRequest>) -> Response {
    let command = match resolve_animate(&req.animate_type, req.clip) {
        Ok(command) => command,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"status": "error", "message": message})),
            )
                .into_response();
        }
    };
    state.hub.broadcast_display(&command).await;
    Json(serde_json::json!({"status": "sent", "payload": command})).into_response()
}

async fn set_state(State(state): State<AppState>, Json(req): Json<SetStateRequest>) -> Response {
    let Some(new_state) = AvatarState::from_name(&req.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": format!("Invalid state: {}", req.state),
                "valid_states": AvatarState::valid_names(),
            })),
        )
            .into_response();
    };
    state.controller.set_state(new_state).await;
    Json(serde_json::json!({"status": "state_set", "state": new_state})).into_response()
}

/// Resolve an `/animate` request into a concrete clip command.
///
/// `auto` picks the command from the URL's extension: `.vrma` starts a VRMA
/// clip, anything else (including unknown extensions) starts a Mixamo clip.
fn resolve_animate(animate_type: &str, clip: AnimationClip) -> Result<DisplayCommand, String> {
    match animate_type {
        "start_vrma" => Ok(DisplayCommand::StartVrma { clip }),
        "start_mixamo" => Ok(DisplayCommand::StartMixamo { clip }),
        "auto" => {
            let url = clip.animation_url.to_lowercase();
            if url.ends_with(".vrma") {
                debug!("auto-detected start_vrma for {}", clip.animation_url);
                Ok(DisplayCommand::StartVrma { clip })
            } else {
                debug!("auto-detected start_mixamo for {}", clip.animation_url);
                Ok(DisplayCommand::StartMixamo { clip })
            }
        }
        other => Err(format!("Invalid animate_type: {other}")),
    }
}

// ---------------------------------------------------------------------------
// WebSocket handlers
// ---------------------------------------------------------------------------

async fn ws_display(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_display_socket(socket, state))
}

async fn ws_status(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_status_socket(socket, state))
}

async fn handle_display_socket(socket: WebSocket, state: AppState) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    // Late joiners converge immediately: snapshot the current state into the
    // connection's queue before it enters the broadcast pool.
    let snapshot = DisplayCommand::SetState {
        state: state.controller.current(),
    };
    let _ = tx.send(serde_json::to_string(&snapshot).unwrap_or_default());

    let id = state.hub.register_display(tx).await;
    run_socket(socket, rx, None).await;
    state.hub.unregister_display(id).await;
}

async fn handle_status_socket(socket: WebSocket, state: AppState) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let id = state.hub.register_status(tx.clone()).await;
    run_socket(socket, rx, Some(tx)).await;
    state.hub.unregister_status(id);
}

/// Drive one connection: a writer task drains the outbound queue onto the
/// socket while this task reads until the peer closes. When `pong_tx` is
/// set, a literal `ping` text frame is answered with `pong`.
async fn run_socket(
    socket: WebSocket,
    mut rx: mpsc::UnboundedReceiver<String>,
    pong_tx: Option<mpsc::UnboundedSender<String>>,
) {
    let (mut sender, mut receiver) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                warn!("websocket send failed: {e}");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(ref tx) = pong_tx
                    && text.as_str() == "ping"
                {
                    let _ = tx.send("pong".to_owned());
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    write_task.abort();
}
