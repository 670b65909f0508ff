//! Shared application state for the UI server.

use std::path::PathBuf;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use toolchat::coordinator::SubmitOutcome;
use toolchat::core::types::{ChatUpdate, MessageKind, TurnId};

/// Requests handled by the coordinator actor. Each carries a reply channel
/// where the caller needs a result.
#[derive(Debug)]
pub enum ActorCommand {
    Submit {
        text: String,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<bool>,
    },
    ShowHistory,
    Select {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Recall {
        direction: RecallDirection,
        reply: oneshot::Sender<RecallReply>,
    },
    Snapshot {
        reply: oneshot::Sender<ChatSnapshot>,
    },
    /// Re-read the registry file (sent by the watcher).
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallDirection {
    Older,
    Newer,
}

/// Owned form of a recall step, safe to send across tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RecallReply {
    Entry { text: String },
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub seq: u64,
    pub kind: MessageKind,
    pub content: String,
    /// Rendered markup for bot messages when markdown rendering is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolView {
    pub name: String,
    pub label: String,
}

/// Everything a freshly connected client needs to draw the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSnapshot {
    pub messages: Vec<MessageView>,
    pub live_response: String,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_turn: Option<TurnId>,
    pub tools: Vec<ToolView>,
    pub selected: Option<String>,
    pub config_error: Option<String>,
    pub history_size: String,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Command channel into the coordinator actor.
    pub commands: mpsc::Sender<ActorCommand>,
    /// Coordinator update feed, relayed to SSE clients.
    pub event_tx: broadcast::Sender<ChatUpdate>,
    /// Registry file watched for changes.
    pub registry_path: PathBuf,
}

impl AppState {
    pub fn new(
        commands: mpsc::Sender<ActorCommand>,
        event_tx: broadcast::Sender<ChatUpdate>,
        registry_path: PathBuf,
    ) -> Self {
        Self {
            commands,
            event_tx,
            registry_path,
        }
    }

    /// Send a command and wait for its reply.
    pub async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> Result<T, StatusCode> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(make(reply)).await.is_err() {
            warn!("coordinator actor is gone");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Send a command without a reply.
    pub async fn notify(&self, command: ActorCommand) -> Result<(), StatusCode> {
        self.commands.send(command).await.map_err(|_| {
            warn!("coordinator actor is gone");
            StatusCode::SERVICE_UNAVAILABLE
        })
    }
}
