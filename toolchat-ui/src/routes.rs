//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use toolchat::coordinator::SubmitOutcome;
use toolchat::core::types::TurnId;

use crate::state::{ActorCommand, AppState, ChatSnapshot, RecallDirection, RecallReply, ToolView};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/tools", get(list_tools))
        .route("/submit", post(submit))
        .route("/stop", post(stop))
        .route("/clear", post(clear))
        .route("/history", post(show_history))
        .route("/select", post(select_tool))
        .route("/recall", post(recall))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/state - full chat snapshot.
async fn get_state(State(state): State<AppState>) -> Result<Json<ChatSnapshot>, StatusCode> {
    let snapshot = state
        .request(|reply| ActorCommand::Snapshot { reply })
        .await?;
    Ok(Json(snapshot))
}

#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<ToolView>,
    selected: Option<String>,
    config_error: Option<String>,
}

/// GET /api/tools - registry contents and current selection.
async fn list_tools(State(state): State<AppState>) -> Result<Json<ToolsResponse>, StatusCode> {
    let snapshot = state
        .request(|reply| ActorCommand::Snapshot { reply })
        .await?;
    Ok(Json(ToolsResponse {
        tools: snapshot.tools,
        selected: snapshot.selected,
        config_error: snapshot.config_error,
    }))
}

#[derive(Deserialize)]
struct SubmitRequest {
    text: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct SubmitResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    turn: Option<TurnId>,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Ignored => SubmitResponse {
                outcome: "ignored",
                turn: None,
            },
            SubmitOutcome::Started(turn) => SubmitResponse {
                outcome: "started",
                turn: Some(turn),
            },
            SubmitOutcome::SpawnFailed => SubmitResponse {
                outcome: "spawn_failed",
                turn: None,
            },
        }
    }
}

/// POST /api/submit - start a turn. Ignored while busy or for blank input.
async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let outcome = state
        .request(|reply| ActorCommand::Submit {
            text: body.text,
            reply,
        })
        .await?;
    Ok(Json(SubmitResponse::from(outcome)))
}

#[derive(Serialize)]
struct StopResponse {
    stopped: bool,
}

/// POST /api/stop - cancel the running turn, if any.
async fn stop(State(state): State<AppState>) -> Result<Json<StopResponse>, StatusCode> {
    let stopped = state.request(|reply| ActorCommand::Stop { reply }).await?;
    Ok(Json(StopResponse { stopped }))
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

/// POST /api/clear - reset transcript and messages. Refused while busy.
async fn clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, StatusCode> {
    let cleared = state.request(|reply| ActorCommand::Clear { reply }).await?;
    Ok(Json(ClearResponse { cleared }))
}

/// POST /api/history - append the transcript dump as a system message.
async fn show_history(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    state.notify(ActorCommand::ShowHistory).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SelectRequest {
    name: String,
}

/// POST /api/select - choose a tool by name; 404 for unknown names.
async fn select_tool(
    State(state): State<AppState>,
    Json(body): Json<SelectRequest>,
) -> Result<StatusCode, StatusCode> {
    let selected = state
        .request(|reply| ActorCommand::Select {
            name: body.name,
            reply,
        })
        .await?;
    if selected {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[derive(Deserialize)]
struct RecallRequest {
    direction: RecallDirection,
}

/// POST /api/recall - step through earlier inputs.
async fn recall(
    State(state): State<AppState>,
    Json(body): Json<RecallRequest>,
) -> Result<Json<RecallReply>, StatusCode> {
    let reply = state
        .request(|reply| ActorCommand::Recall {
            direction: body.direction,
            reply,
        })
        .await?;
    Ok(Json(reply))
}
