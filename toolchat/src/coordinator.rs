//! Turn coordinator: the `Idle`/`Busy` state machine behind every front-end.
//!
//! The coordinator owns the transcript, the visible message log, the input
//! recall buffer, and the at-most-one active session. All transitions run on
//! the caller's task; session events are pulled with [`Coordinator::next_event`]
//! (async) or [`Coordinator::pump_ready`] (sync) and applied with
//! [`Coordinator::handle_event`].

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::recall::{InputRecall, Recall};
use crate::core::registry::{ConfigError, Registry, ToolDefinition};
use crate::core::transcript::{Transcript, format_size};
use crate::core::types::{ChatUpdate, Message, MessageKind, Outcome, SessionEvent, TurnId, TurnState};
use crate::io::launcher::Launcher;
use crate::io::process::{LaunchRequest, SessionHandle, TryRecvError};
use crate::io::settings::Settings;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub const NO_OUTPUT_MESSAGE: &str = "No output from command";
pub const STOPPED_MESSAGE: &str = "Process stopped";

/// Coordinator tuning that does not belong to the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Used for the timeout message; enforcement lives in the process session.
    pub liveness_timeout: Duration,
    pub recall_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(30),
            recall_capacity: 100,
        }
    }
}

impl From<&Settings> for CoordinatorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            liveness_timeout: settings.liveness_timeout(),
            recall_capacity: settings.recall_capacity,
        }
    }
}

/// What `submit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty input, a turn already running, or no tool selected. Nothing changed.
    Ignored,
    /// A session was started for this turn.
    Started(TurnId),
    /// The process could not be spawned; an error message was appended and the
    /// coordinator is `Idle` again.
    SpawnFailed,
}

struct ActiveTurn {
    id: TurnId,
    session: SessionHandle,
    user: String,
    response: String,
    has_output: bool,
}

pub struct Coordinator<L: Launcher> {
    launcher: L,
    options: CoordinatorOptions,
    tools: Vec<ToolDefinition>,
    selected: Option<usize>,
    config_error: Option<String>,
    transcript: Transcript,
    messages: Vec<Message>,
    next_seq: u64,
    recall: InputRecall,
    active: Option<ActiveTurn>,
    next_turn: TurnId,
    updates: broadcast::Sender<ChatUpdate>,
}

impl<L: Launcher> Coordinator<L> {
    /// A coordinator with no tools; load a registry with [`Coordinator::load_registry`].
    pub fn new(launcher: L, options: CoordinatorOptions) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            launcher,
            options,
            tools: Vec::new(),
            selected: None,
            config_error: None,
            transcript: Transcript::new(),
            messages: Vec::new(),
            next_seq: 0,
            recall: InputRecall::new(options.recall_capacity),
            active: None,
            next_turn: 1,
            updates,
        }
    }

    /// Apply the result of loading the registry. An error becomes the banner and
    /// leaves no tool selected, so submissions are no-ops until a reload succeeds.
    pub fn load_registry(&mut self, registry: Result<Registry, ConfigError>) {
        match registry {
            Ok(registry) => {
                self.config_error = None;
                self.replace_tools(registry.into_tools());
            }
            Err(err) => {
                warn!(err = %err, "tool registry unavailable");
                self.config_error = Some(err.to_string());
                self.tools.clear();
                self.selected = None;
                self.publish(ChatUpdate::ToolsReplaced);
            }
        }
    }

    /// Swap the registry wholesale. The selection follows the tool name when it
    /// still exists, else falls back to the first tool. An in-flight turn is
    /// unaffected: its launch request was captured at submit time.
    pub fn replace_tools(&mut self, tools: Vec<ToolDefinition>) {
        let previous = self.selected_tool().map(|tool| tool.name.clone());
        self.tools = tools;
        self.selected = previous
            .and_then(|name| self.tools.iter().position(|tool| tool.name == name))
            .or_else(|| (!self.tools.is_empty()).then_some(0));
        info!(tools = self.tools.len(), selected = ?self.selected_tool().map(|t| &t.name), "tool registry replaced");
        self.publish(ChatUpdate::ToolsReplaced);
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn selected_tool(&self) -> Option<&ToolDefinition> {
        self.selected.map(|index| &self.tools[index])
    }

    /// Select a tool by name. Unknown names leave the selection unchanged.
    pub fn select_tool(&mut self, name: &str) -> bool {
        let Some(index) = self.tools.iter().position(|tool| tool.name == name) else {
            debug!(name, "ignoring selection of unknown tool");
            return false;
        };
        self.selected = Some(index);
        self.publish(ChatUpdate::ToolSelected {
            name: name.to_string(),
        });
        true
    }

    /// Banner text when the registry failed to load.
    pub fn config_error(&self) -> Option<&str> {
        self.config_error.as_deref()
    }

    pub fn state(&self) -> TurnState {
        if self.active.is_some() {
            TurnState::Busy
        } else {
            TurnState::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the turn in flight, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        self.active.as_ref().map(|turn| turn.id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Output streamed so far for the turn in flight; empty when idle.
    pub fn live_response(&self) -> &str {
        self.active
            .as_ref()
            .map(|turn| turn.response.as_str())
            .unwrap_or("")
    }

    /// Serialized transcript size, e.g. `1.2 KB`.
    pub fn history_size_label(&self) -> String {
        format_size(self.transcript.size_bytes())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.updates.subscribe()
    }

    /// Sender side of the update feed, for front-ends that subscribe late.
    pub fn update_sender(&self) -> broadcast::Sender<ChatUpdate> {
        self.updates.clone()
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Start a turn for `text`.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() || self.active.is_some() {
            return SubmitOutcome::Ignored;
        }
        let Some(tool) = self.selected_tool() else {
            return SubmitOutcome::Ignored;
        };
        let prompt = self.transcript.prompt_for(text);
        let request = LaunchRequest::for_tool(tool, prompt);
        let tool_name = tool.name.clone();

        self.push_message(MessageKind::User, text.to_string());
        self.recall.push(text);

        let session = match self.launcher.launch(&request) {
            Ok(session) => session,
            Err(err) => {
                self.push_message(MessageKind::Error, format!("Spawn Error: {err}"));
                return SubmitOutcome::SpawnFailed;
            }
        };

        let id = self.next_turn;
        self.next_turn += 1;
        info!(turn = id, tool = %tool_name, "turn started");
        self.active = Some(ActiveTurn {
            id,
            session,
            user: text.to_string(),
            response: String::new(),
            has_output: false,
        });
        self.publish(ChatUpdate::StateChanged(TurnState::Busy));
        SubmitOutcome::Started(id)
    }

    /// Wait for the next event of the active session.
    ///
    /// Returns `None` immediately when idle, which disables the branch in a
    /// `tokio::select!` loop. A session that disappears without a terminal event
    /// is reported as a failure.
    pub async fn next_event(&mut self) -> Option<(TurnId, SessionEvent)> {
        let turn = self.active.as_mut()?;
        let event = turn.session.recv().await.unwrap_or_else(lost_session);
        Some((turn.id, event))
    }

    /// Apply every event already delivered by the active session. Returns how
    /// many were applied.
    pub fn pump_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(turn) = self.active.as_mut() {
            let id = turn.id;
            let event = match turn.session.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => lost_session(),
            };
            self.handle_event(id, event);
            applied += 1;
        }
        applied
    }

    /// Apply one session event. Events for a turn that is not the active one
    /// (already finalized, cancelled, or unknown) are discarded.
    pub fn handle_event(&mut self, turn: TurnId, event: SessionEvent) -> bool {
        let Some(active) = self.active.as_mut().filter(|active| active.id == turn) else {
            warn!(turn, "discarding event for inactive turn");
            return false;
        };
        match event {
            SessionEvent::Output(chunk) => {
                active.has_output = true;
                active.response.push_str(&chunk);
                debug!(turn, bytes = chunk.len(), "streamed output");
                self.publish(ChatUpdate::ResponseChunk { turn, chunk });
            }
            SessionEvent::Finished(outcome) => self.finish_turn(outcome),
        }
        true
    }

    /// Stop the turn in flight. Returns `false` when idle.
    pub fn cancel(&mut self) -> bool {
        let Some(turn) = self.active.take() else {
            return false;
        };
        info!(turn = turn.id, "turn cancelled by user");
        turn.session.cancel();
        self.push_message(MessageKind::Error, STOPPED_MESSAGE.to_string());
        self.publish(ChatUpdate::StateChanged(TurnState::Idle));
        true
    }

    /// Reset the transcript and the message log. Only honored while idle.
    pub fn clear(&mut self) -> bool {
        if self.active.is_some() {
            debug!("ignoring clear while a turn is running");
            return false;
        }
        self.transcript.clear();
        self.messages.clear();
        self.publish(ChatUpdate::Cleared);
        true
    }

    /// Append a system message with the serialized transcript.
    pub fn show_history(&mut self) {
        let dump = format!(
            "=== HISTORY ===\n{}=== END HISTORY ===",
            self.transcript.serialized()
        );
        self.push_message(MessageKind::System, dump);
    }

    pub fn recall_older(&mut self) -> Recall<'_> {
        self.recall.older()
    }

    pub fn recall_newer(&mut self) -> Recall<'_> {
        self.recall.newer()
    }

    fn finish_turn(&mut self, outcome: Outcome) {
        let Some(turn) = self.active.take() else {
            return;
        };
        info!(turn = turn.id, outcome = outcome.label(), "turn finished");
        match outcome {
            Outcome::Completed { .. } => {
                if !turn.has_output && turn.response.is_empty() {
                    self.push_message(MessageKind::Error, NO_OUTPUT_MESSAGE.to_string());
                } else {
                    self.push_message(MessageKind::Bot, turn.response.clone());
                }
                self.transcript.record(turn.user, turn.response);
            }
            Outcome::Failed { detail } => {
                self.push_message(MessageKind::Error, format!("Error: {detail}"));
            }
            Outcome::TimedOut => {
                let message = format!(
                    "Timeout - no response after {} seconds",
                    self.options.liveness_timeout.as_secs()
                );
                self.push_message(MessageKind::Error, message);
            }
            Outcome::Cancelled => {
                self.push_message(MessageKind::Error, STOPPED_MESSAGE.to_string());
            }
        }
        self.publish(ChatUpdate::StateChanged(TurnState::Idle));
    }

    fn push_message(&mut self, kind: MessageKind, content: String) {
        let message = Message {
            seq: self.next_seq,
            kind,
            content,
        };
        self.next_seq += 1;
        self.messages.push(message.clone());
        self.publish(ChatUpdate::MessageAppended(message));
    }

    fn publish(&self, update: ChatUpdate) {
        // No subscribers is fine; the log itself is the source of truth.
        let _ = self.updates.send(update);
    }
}

fn lost_session() -> SessionEvent {
    SessionEvent::Finished(Outcome::Failed {
        detail: "process session ended without an outcome".to_string(),
    })
}
