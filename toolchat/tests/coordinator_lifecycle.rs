//! Multi-turn coordinator scenarios driven by a scripted launcher.
//!
//! Each test submits turns, feeds session events by hand, and checks the
//! message log, the transcript, and what the launcher was asked to run.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use toolchat::coordinator::{Coordinator, CoordinatorOptions, SubmitOutcome};
use toolchat::core::recall::Recall;
use toolchat::core::registry::parse_registry;
use toolchat::core::types::{MessageKind, Outcome, TurnState};
use toolchat::io::config_source::{FileConfigSource, load_registry};
use toolchat::test_support::{ScriptedLauncher, registry_file};

fn coordinator(config: &str) -> (Coordinator<ScriptedLauncher>, ScriptedLauncher) {
    let launcher = ScriptedLauncher::new();
    let mut coordinator = Coordinator::new(launcher.clone(), CoordinatorOptions::default());
    coordinator.load_registry(parse_registry(config));
    (coordinator, launcher)
}

fn kinds(coordinator: &Coordinator<ScriptedLauncher>) -> Vec<MessageKind> {
    coordinator.messages().iter().map(|m| m.kind).collect()
}

#[test]
fn first_turn_passes_args_then_prompt() {
    let (mut coordinator, launcher) = coordinator("echo|Echo|echo|hello");

    assert!(matches!(coordinator.submit("hi"), SubmitOutcome::Started(_)));
    assert_eq!(coordinator.state(), TurnState::Busy);

    let request = launcher.request(0);
    assert_eq!(request.command, "echo");
    assert_eq!(request.argv(), vec!["hello", "USER: hi\n"]);

    launcher.session(0).complete("ok");
    coordinator.pump_ready();

    assert_eq!(coordinator.state(), TurnState::Idle);
    assert_eq!(kinds(&coordinator), vec![MessageKind::User, MessageKind::Bot]);
    assert_eq!(coordinator.messages()[1].content, "ok");
    assert_eq!(coordinator.transcript().serialized(), "USER: hi\nBOT: ok\n\n");
}

#[test]
fn second_turn_sees_full_history() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    coordinator.submit("one");
    launcher.session(0).complete("first");
    coordinator.pump_ready();

    coordinator.submit("two");
    assert_eq!(
        launcher.request(1).input,
        "USER: one\nBOT: first\n\nUSER: two\n"
    );
    launcher.session(1).complete("second");
    coordinator.pump_ready();

    assert_eq!(coordinator.transcript().turns().len(), 2);
    assert_eq!(coordinator.transcript().turns()[1].bot, "second");
}

#[test]
fn env_overlay_is_forwarded() {
    let (mut coordinator, launcher) = coordinator("t|T|tool|a|ENV:K=v=w,X=1");
    coordinator.submit("hi");

    let request = launcher.request(0);
    let expected: BTreeMap<String, String> = [("K", "v=w"), ("X", "1")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(request.env, expected);
    assert_eq!(request.args, vec!["a".to_string()]);
}

#[test]
fn submit_while_busy_is_a_no_op() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    coordinator.submit("first");

    assert_eq!(coordinator.submit("second"), SubmitOutcome::Ignored);
    assert_eq!(launcher.launch_count(), 1);
    assert_eq!(coordinator.messages().len(), 1);
}

#[test]
fn streamed_chunks_accumulate_into_one_bot_message() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    coordinator.submit("hi");
    let session = launcher.session(0);
    session.output("hel");
    coordinator.pump_ready();
    assert_eq!(coordinator.live_response(), "hel");

    session.output("lo\n");
    session.finish(Outcome::Completed {
        output: "hello\n".to_string(),
    });
    coordinator.pump_ready();

    assert_eq!(coordinator.live_response(), "");
    assert_eq!(coordinator.messages()[1].content, "hello\n");
    assert_eq!(coordinator.transcript().serialized(), "USER: hi\nBOT: hello\n\n\n");
}

#[test]
fn empty_output_reports_error_but_records_turn() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    coordinator.submit("hi");
    launcher.session(0).complete("");
    coordinator.pump_ready();

    assert_eq!(kinds(&coordinator), vec![MessageKind::User, MessageKind::Error]);
    assert_eq!(coordinator.messages()[1].content, "No output from command");
    assert_eq!(coordinator.transcript().serialized(), "USER: hi\nBOT: \n\n");
}

const FIRST_TURN: &str = "USER: first\nBOT: ok\n\n";

/// Complete one turn so later failures have a transcript to leave alone.
fn with_recorded_turn(
    mut coordinator: Coordinator<ScriptedLauncher>,
    launcher: &ScriptedLauncher,
) -> Coordinator<ScriptedLauncher> {
    coordinator.submit("first");
    launcher.session(0).complete("ok");
    coordinator.pump_ready();
    assert_eq!(coordinator.transcript().serialized(), FIRST_TURN);
    coordinator
}

#[test]
fn failure_appends_one_error_and_leaves_transcript() {
    let (coordinator, launcher) = coordinator("t|T|tool");
    let mut coordinator = with_recorded_turn(coordinator, &launcher);

    coordinator.submit("second");
    assert!(launcher.request(1).input.starts_with(FIRST_TURN));
    let session = launcher.session(1);
    session.output("partial");
    session.fail("boom");
    coordinator.pump_ready();

    assert_eq!(
        kinds(&coordinator),
        vec![
            MessageKind::User,
            MessageKind::Bot,
            MessageKind::User,
            MessageKind::Error
        ]
    );
    assert_eq!(coordinator.messages()[3].content, "Error: boom");
    assert_eq!(coordinator.transcript().serialized(), FIRST_TURN);
    assert_eq!(coordinator.state(), TurnState::Idle);
}

#[test]
fn timeout_reports_configured_seconds() {
    let launcher = ScriptedLauncher::new();
    let options = CoordinatorOptions {
        liveness_timeout: std::time::Duration::from_secs(30),
        ..CoordinatorOptions::default()
    };
    let mut coordinator = Coordinator::new(launcher.clone(), options);
    coordinator.load_registry(parse_registry("t|T|tool"));
    let mut coordinator = with_recorded_turn(coordinator, &launcher);

    coordinator.submit("second");
    launcher.session(1).output("half an answer");
    launcher.session(1).finish(Outcome::TimedOut);
    coordinator.pump_ready();

    assert_eq!(
        coordinator.messages().last().map(|m| m.content.as_str()),
        Some("Timeout - no response after 30 seconds")
    );
    assert_eq!(coordinator.transcript().serialized(), FIRST_TURN);
}

#[test]
fn cancel_stops_session_and_ignores_late_events() {
    let (coordinator, launcher) = coordinator("t|T|tool");
    let mut coordinator = with_recorded_turn(coordinator, &launcher);
    coordinator.submit("second");
    let session = launcher.session(1);
    session.output("early");
    coordinator.pump_ready();

    assert!(coordinator.cancel());
    assert!(session.is_cancelled());
    assert_eq!(coordinator.state(), TurnState::Idle);

    session.output("late");
    session.finish(Outcome::Cancelled);
    assert_eq!(coordinator.pump_ready(), 0);

    assert_eq!(kinds(&coordinator)[2..], [MessageKind::User, MessageKind::Error]);
    assert_eq!(coordinator.messages()[3].content, "Process stopped");
    assert_eq!(coordinator.transcript().serialized(), FIRST_TURN);
    assert!(!coordinator.cancel());
}

#[test]
fn spawn_failure_reports_error_and_returns_idle() {
    let (mut coordinator, launcher) = coordinator("t|T|missing-binary");
    launcher.fail_next_spawn(ErrorKind::NotFound);

    assert_eq!(coordinator.submit("hi"), SubmitOutcome::SpawnFailed);
    assert_eq!(coordinator.state(), TurnState::Idle);
    let error = &coordinator.messages()[1];
    assert_eq!(error.kind, MessageKind::Error);
    assert!(error.content.starts_with("Spawn Error: "));
    assert!(coordinator.transcript().is_empty());

    // The next submission launches normally.
    assert!(matches!(coordinator.submit("again"), SubmitOutcome::Started(_)));
}

#[test]
fn clear_resets_log_and_history_between_turns() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    coordinator.submit("hi");
    launcher.session(0).complete("ok");
    coordinator.pump_ready();

    assert!(coordinator.clear());
    assert!(coordinator.messages().is_empty());
    assert!(coordinator.transcript().is_empty());

    coordinator.submit("fresh");
    assert_eq!(launcher.request(1).input, "USER: fresh\n");
}

#[test]
fn recall_walks_back_and_forward() {
    let (mut coordinator, launcher) = coordinator("t|T|tool");
    for (index, text) in ["a", "b", "c"].into_iter().enumerate() {
        coordinator.submit(text);
        launcher.session(index).complete("ok");
        coordinator.pump_ready();
    }

    assert_eq!(coordinator.recall_older(), Recall::Entry("c"));
    assert_eq!(coordinator.recall_older(), Recall::Entry("b"));
    assert_eq!(coordinator.recall_older(), Recall::Entry("a"));
    assert_eq!(coordinator.recall_older(), Recall::Entry("a"));
    assert_eq!(coordinator.recall_newer(), Recall::Entry("b"));
    assert_eq!(coordinator.recall_newer(), Recall::Entry("c"));
    assert_eq!(coordinator.recall_newer(), Recall::Cleared);
}

#[test]
fn registry_file_reload_replaces_tools() {
    let (_dir, path) = registry_file("a|A|echo\nb|B|cat\n").expect("registry");
    let source = FileConfigSource::new(&path);
    let launcher = ScriptedLauncher::new();
    let mut coordinator = Coordinator::new(launcher, CoordinatorOptions::default());
    coordinator.load_registry(load_registry(&source));
    assert_eq!(coordinator.tools().len(), 2);

    std::fs::write(&path, "# nothing usable\nbad|line\n").expect("rewrite");
    coordinator.load_registry(load_registry(&source));
    assert!(coordinator.tools().is_empty());
    assert!(coordinator.config_error().is_some());

    std::fs::write(&path, "c|C|true\n").expect("rewrite");
    coordinator.load_registry(load_registry(&source));
    assert_eq!(coordinator.config_error(), None);
    assert_eq!(coordinator.selected_tool().map(|t| t.name.as_str()), Some("c"));
}
