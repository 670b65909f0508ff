//! Server-Sent Events stream and registry file watcher.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use toolchat::core::types::{ChatUpdate, Message, TurnId, TurnState};

use crate::state::{ActorCommand, AppState};

#[derive(Debug, Serialize)]
struct SsePayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    turn: Option<TurnId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<TurnState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl SsePayload<'_> {
    fn bare(event_type: &'static str) -> Self {
        SsePayload {
            event_type,
            message: None,
            turn: None,
            chunk: None,
            state: None,
            name: None,
        }
    }
}

impl<'a> From<&'a ChatUpdate> for SsePayload<'a> {
    fn from(update: &'a ChatUpdate) -> Self {
        match update {
            ChatUpdate::MessageAppended(message) => SsePayload {
                message: Some(message),
                ..SsePayload::bare("message")
            },
            ChatUpdate::ResponseChunk { turn, chunk } => SsePayload {
                turn: Some(*turn),
                chunk: Some(chunk),
                ..SsePayload::bare("chunk")
            },
            ChatUpdate::StateChanged(state) => SsePayload {
                state: Some(*state),
                ..SsePayload::bare("state")
            },
            ChatUpdate::Cleared => SsePayload::bare("cleared"),
            ChatUpdate::ToolsReplaced => SsePayload::bare("tools_replaced"),
            ChatUpdate::ToolSelected { name } => SsePayload {
                name: Some(name),
                ..SsePayload::bare("tool_selected")
            },
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        // Clients fetch /api/state after this, then apply updates.
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(update) => {
                    let payload = SsePayload::from(&update);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("update").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some updates dropped");
                    yield Ok(Event::default().event("resync").data("{}"));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the registry watcher in a background task.
pub fn start_registry_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_registry_watcher(state).await {
            warn!(error = %e, "registry watcher failed");
        }
    });
}

async fn run_registry_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(500)),
    )?;

    let Some(mut watched) = watch_target(&state.registry_path) else {
        warn!(path = %state.registry_path.display(), "registry directory missing, not watching");
        return Ok(());
    };
    watcher.watch(&watched, RecursiveMode::NonRecursive)?;
    info!(path = %state.registry_path.display(), watched = %watched.display(), "watching tool registry");

    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(250));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                if registry_touched(&state.registry_path, &pending_events) {
                    debug!("registry changed, requesting reload");
                    if state.notify(ActorCommand::Reload).await.is_err() {
                        return Ok(());
                    }
                    if let Some(next) = watch_target(&state.registry_path).filter(|next| *next != watched) {
                        watcher.unwatch(&watched)?;
                        watcher.watch(&next, RecursiveMode::NonRecursive)?;
                        debug!(watched = %next.display(), "registry watch moved");
                        watched = next;
                    }
                }
                pending_events.clear();
            }
        }
    }
}

/// Path to poll for registry changes: the file itself, or its directory
/// while the file does not exist yet.
fn watch_target(registry_path: &Path) -> Option<PathBuf> {
    if registry_path.is_file() {
        return Some(registry_path.to_path_buf());
    }
    registry_path
        .parent()
        .filter(|dir| dir.is_dir())
        .map(Path::to_path_buf)
}

/// Whether any event in the batch created, modified, or removed the registry.
fn registry_touched(registry_path: &Path, events: &[NotifyEvent]) -> bool {
    events.iter().any(|event| {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) && event.paths.iter().any(|path| path == registry_path)
    })
}
