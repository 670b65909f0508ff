//! Shared deterministic types for the chat core.
//!
//! These types define stable contracts between the coordinator, process
//! sessions, and display layers. They must not depend on external state.

use serde::{Deserialize, Serialize};

/// Kind of a visible-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Bot,
    Error,
    System,
}

/// One entry in the visible message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the log; strictly increasing for the lifetime of a coordinator,
    /// so it survives `clear()` without reuse.
    pub seq: u64,
    pub kind: MessageKind,
    pub content: String,
}

/// Coordinator state. Exactly one process session may be active while `Busy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    Idle,
    Busy,
}

/// Identifier of one turn (and of the process session serving it).
pub type TurnId = u64;

/// How a process session ended. Exactly one is delivered per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process exited successfully; `output` is everything it wrote to stdout.
    Completed { output: String },
    /// The process could not run to completion or exited with a failure status.
    Failed { detail: String },
    /// No output arrived within the liveness window; the process was killed.
    TimedOut,
    /// The session was cancelled; the process was killed.
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::Failed { .. } => "failed",
            Outcome::TimedOut => "timeout",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Event delivered by a process session, in production order.
///
/// Any number of `Output` events precede exactly one `Finished`; nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output(String),
    Finished(Outcome),
}

/// Notification published by the coordinator for display layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    /// A message was appended to the visible log.
    MessageAppended(Message),
    /// A chunk of streamed output was appended to the live (unfinished) response.
    ResponseChunk { turn: TurnId, chunk: String },
    /// The coordinator moved between `Idle` and `Busy`.
    StateChanged(TurnState),
    /// The transcript and message log were reset.
    Cleared,
    /// The tool registry was replaced (or failed to load).
    ToolsReplaced,
    /// The selected tool changed.
    ToolSelected { name: String },
}
