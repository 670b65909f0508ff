//! Coordinator actor: the single task that owns the chat state.
//!
//! HTTP handlers and the registry watcher talk to it through
//! [`ActorCommand`]s; session events are applied on the same task, so the
//! coordinator never needs a lock.

use tokio::sync::mpsc;
use tracing::{debug, info};

use toolchat::coordinator::Coordinator;
use toolchat::core::markdown;
use toolchat::core::recall::Recall;
use toolchat::core::types::MessageKind;
use toolchat::io::config_source::{ConfigSource, load_registry};
use toolchat::io::launcher::Launcher;

use crate::state::{
    ActorCommand, ChatSnapshot, MessageView, RecallDirection, RecallReply, ToolView,
};

/// Run until every command sender is dropped.
pub async fn run<L, S>(
    mut coordinator: Coordinator<L>,
    source: S,
    mut commands: mpsc::Receiver<ActorCommand>,
    render_markdown: bool,
) where
    L: Launcher,
    S: ConfigSource,
{
    info!("coordinator actor started");
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                apply(&mut coordinator, &source, command, render_markdown);
            }
            Some((turn, event)) = coordinator.next_event() => {
                coordinator.handle_event(turn, event);
            }
        }
    }
    coordinator.cancel();
    info!("coordinator actor stopped");
}

fn apply<L: Launcher>(
    coordinator: &mut Coordinator<L>,
    source: &dyn ConfigSource,
    command: ActorCommand,
    render_markdown: bool,
) {
    // A dropped reply receiver means the HTTP client went away; the command
    // still takes effect.
    match command {
        ActorCommand::Submit { text, reply } => {
            let _ = reply.send(coordinator.submit(&text));
        }
        ActorCommand::Stop { reply } => {
            let _ = reply.send(coordinator.cancel());
        }
        ActorCommand::Clear { reply } => {
            let _ = reply.send(coordinator.clear());
        }
        ActorCommand::ShowHistory => coordinator.show_history(),
        ActorCommand::Select { name, reply } => {
            let _ = reply.send(coordinator.select_tool(&name));
        }
        ActorCommand::Recall { direction, reply } => {
            let step = match direction {
                RecallDirection::Older => coordinator.recall_older(),
                RecallDirection::Newer => coordinator.recall_newer(),
            };
            let _ = reply.send(owned_recall(step));
        }
        ActorCommand::Snapshot { reply } => {
            let _ = reply.send(snapshot(coordinator, render_markdown));
        }
        ActorCommand::Reload => {
            debug!("reloading tool registry");
            coordinator.load_registry(load_registry(source));
        }
    }
}

fn owned_recall(step: Recall<'_>) -> RecallReply {
    match step {
        Recall::Entry(text) => RecallReply::Entry {
            text: text.to_string(),
        },
        Recall::Cleared => RecallReply::Cleared,
        Recall::Unchanged => RecallReply::Unchanged,
    }
}

pub fn snapshot<L: Launcher>(coordinator: &Coordinator<L>, render_markdown: bool) -> ChatSnapshot {
    let messages = coordinator
        .messages()
        .iter()
        .map(|message| MessageView {
            seq: message.seq,
            kind: message.kind,
            content: message.content.clone(),
            html: (render_markdown && message.kind == MessageKind::Bot)
                .then(|| markdown::render(&message.content)),
        })
        .collect();
    ChatSnapshot {
        messages,
        live_response: coordinator.live_response().to_string(),
        busy: coordinator.is_busy(),
        active_turn: coordinator.active_turn(),
        tools: coordinator
            .tools()
            .iter()
            .map(|tool| ToolView {
                name: tool.name.clone(),
                label: tool.label.clone(),
            })
            .collect(),
        selected: coordinator.selected_tool().map(|tool| tool.name.clone()),
        config_error: coordinator.config_error().map(str::to_string),
        history_size: coordinator.history_size_label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolchat::coordinator::{CoordinatorOptions, SubmitOutcome};
    use toolchat::core::registry::parse_registry;
    use toolchat::test_support::{ScriptedLauncher, StaticConfigSource};
    use tokio::sync::oneshot;

    fn coordinator() -> (Coordinator<ScriptedLauncher>, ScriptedLauncher) {
        let launcher = ScriptedLauncher::new();
        let mut coordinator = Coordinator::new(launcher.clone(), CoordinatorOptions::default());
        coordinator.load_registry(parse_registry("t|Tool|echo"));
        (coordinator, launcher)
    }

    #[test]
    fn snapshot_renders_bot_messages_only_when_enabled() {
        let (mut coordinator, launcher) = coordinator();
        coordinator.submit("**hi**");
        launcher.session(0).complete("**ok**");
        coordinator.pump_ready();

        let plain = snapshot(&coordinator, false);
        assert!(plain.messages.iter().all(|m| m.html.is_none()));

        let rendered = snapshot(&coordinator, true);
        assert_eq!(rendered.messages[0].html, None);
        assert_eq!(
            rendered.messages[1].html.as_deref(),
            Some("<strong>ok</strong>")
        );
        assert_eq!(rendered.selected.as_deref(), Some("t"));
        assert!(!rendered.busy);
    }

    #[test]
    fn reload_command_swaps_registry() {
        let (mut coordinator, _) = coordinator();
        let source = StaticConfigSource::new("x|X|true\ny|Y|false\n");
        apply(&mut coordinator, &source, ActorCommand::Reload, false);

        let names: Vec<&str> = coordinator.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn recall_reply_is_owned() {
        let (mut coordinator, launcher) = coordinator();
        coordinator.submit("first");
        launcher.session(0).complete("ok");
        coordinator.pump_ready();

        let (reply, mut rx) = oneshot::channel();
        let source = StaticConfigSource::new("");
        apply(
            &mut coordinator,
            &source,
            ActorCommand::Recall {
                direction: RecallDirection::Older,
                reply,
            },
            false,
        );
        assert_eq!(
            rx.try_recv().expect("reply"),
            RecallReply::Entry {
                text: "first".to_string()
            }
        );
    }

    #[tokio::test]
    async fn actor_applies_session_events() {
        let (coordinator, launcher) = coordinator();
        let (tx, rx) = mpsc::channel(8);
        let actor = tokio::spawn(run(coordinator, StaticConfigSource::new("t|Tool|echo"), rx, false));

        let (reply, outcome) = oneshot::channel();
        tx.send(ActorCommand::Submit {
            text: "hi".to_string(),
            reply,
        })
        .await
        .expect("send");
        assert!(matches!(outcome.await.expect("reply"), SubmitOutcome::Started(_)));

        launcher.session(0).complete("done");
        let mut state = None;
        for _ in 0..50 {
            let (reply, rx) = oneshot::channel();
            tx.send(ActorCommand::Snapshot { reply }).await.expect("send");
            let snap = rx.await.expect("snapshot");
            if !snap.busy {
                state = Some(snap);
                break;
            }
            tokio::task::yield_now().await;
        }
        let state = state.expect("turn should finish");
        assert_eq!(state.messages.last().map(|m| m.content.as_str()), Some("done"));

        drop(tx);
        actor.await.expect("actor task");
    }
}
