//! Line-oriented terminal front-end.
//!
//! Plain lines are submitted as turns; lines starting with `/` are commands.
//! Streamed output is written to stdout as it arrives. Ctrl-C stops a running
//! turn, or exits when idle.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, SubmitOutcome};
use crate::core::recall::Recall;
use crate::core::types::{ChatUpdate, Message, MessageKind};
use crate::io::launcher::Launcher;

const HELP: &str = "\
commands:
  /tools          list tools (* marks the selected one)
  /tool NAME      select a tool
  /history        show the transcript
  /clear          clear transcript and messages
  /stop           stop the running turn (also Ctrl-C)
  /prev, /next    recall earlier inputs; an empty line sends the recalled input
  /quit           exit";

/// One parsed line of user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplInput<'a> {
    Submit(&'a str),
    SendStaged,
    Tools,
    Select(&'a str),
    History,
    Clear,
    Stop,
    Older,
    Newer,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ReplInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplInput::SendStaged;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ReplInput::Submit(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "tools" => ReplInput::Tools,
        "tool" if !arg.is_empty() => ReplInput::Select(arg),
        "history" => ReplInput::History,
        "clear" => ReplInput::Clear,
        "stop" => ReplInput::Stop,
        "prev" => ReplInput::Older,
        "next" => ReplInput::Newer,
        "help" => ReplInput::Help,
        "quit" | "exit" => ReplInput::Quit,
        _ => ReplInput::Unknown(trimmed),
    }
}

/// Run the interactive loop until `/quit`, Ctrl-C while idle, or end of input.
///
/// At end of input a running turn is allowed to finish, so piped input works.
pub async fn run<L: Launcher>(coordinator: &mut Coordinator<L>) -> Result<()> {
    let mut updates = coordinator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = io::stdout();
    let mut staged: Option<String> = None;

    write_banner(coordinator, &mut out)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    debug!("end of input");
                    break;
                };
                match parse_input(&line) {
                    ReplInput::Quit => break,
                    input => apply_input(coordinator, input, &mut staged, &mut out)?,
                }
            }
            Some((turn, event)) = coordinator.next_event() => {
                coordinator.handle_event(turn, event);
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                if !coordinator.cancel() {
                    break;
                }
            }
        }
        drain_updates(&mut updates, &mut out)?;
    }

    while let Some((turn, event)) = coordinator.next_event().await {
        coordinator.handle_event(turn, event);
        drain_updates(&mut updates, &mut out)?;
    }
    Ok(())
}

/// Run a single turn to completion, streaming output to `out`.
///
/// Returns the message that finalized the turn (bot or error), or `None` when
/// the submission was ignored.
pub async fn ask<L: Launcher, W: Write>(
    coordinator: &mut Coordinator<L>,
    text: &str,
    out: &mut W,
) -> Result<Option<Message>> {
    let mut updates = coordinator.subscribe();
    match coordinator.submit(text) {
        SubmitOutcome::Ignored => return Ok(None),
        SubmitOutcome::SpawnFailed => return Ok(coordinator.messages().last().cloned()),
        SubmitOutcome::Started(_) => {}
    }
    while let Some((turn, event)) = coordinator.next_event().await {
        coordinator.handle_event(turn, event);
        while let Ok(update) = updates.try_recv() {
            if let ChatUpdate::ResponseChunk { chunk, .. } = update {
                out.write_all(chunk.as_bytes()).context("write output")?;
                out.flush().context("flush output")?;
            }
        }
    }
    Ok(coordinator.messages().last().cloned())
}

fn apply_input<L: Launcher, W: Write>(
    coordinator: &mut Coordinator<L>,
    input: ReplInput<'_>,
    staged: &mut Option<String>,
    out: &mut W,
) -> Result<()> {
    match input {
        ReplInput::Submit(text) => {
            staged.take();
            if coordinator.is_busy() {
                debug!("input ignored while a turn is running");
            }
            coordinator.submit(text);
        }
        ReplInput::SendStaged => {
            if let Some(text) = staged.take() {
                writeln!(out, "> {text}")?;
                coordinator.submit(&text);
            }
        }
        ReplInput::Tools => write_tools(coordinator, out)?,
        ReplInput::Select(name) => {
            if !coordinator.select_tool(name) {
                writeln!(out, "unknown tool: {name}")?;
            }
        }
        ReplInput::History => coordinator.show_history(),
        ReplInput::Clear => {
            if !coordinator.clear() {
                writeln!(out, "cannot clear while a turn is running")?;
            }
        }
        ReplInput::Stop => {
            coordinator.cancel();
        }
        ReplInput::Older => stage_recall(coordinator.recall_older(), staged, out)?,
        ReplInput::Newer => stage_recall(coordinator.recall_newer(), staged, out)?,
        ReplInput::Help => writeln!(out, "{HELP}")?,
        ReplInput::Unknown(command) => writeln!(out, "unknown command: {command} (try /help)")?,
        ReplInput::Quit => {}
    }
    Ok(())
}

fn stage_recall<W: Write>(recall: Recall<'_>, staged: &mut Option<String>, out: &mut W) -> Result<()> {
    match recall {
        Recall::Entry(text) => {
            writeln!(out, "recalled: {text}")?;
            *staged = Some(text.to_string());
        }
        Recall::Cleared => {
            writeln!(out, "recall cleared")?;
            *staged = None;
        }
        Recall::Unchanged => {}
    }
    Ok(())
}

fn write_banner<L: Launcher, W: Write>(coordinator: &Coordinator<L>, out: &mut W) -> Result<()> {
    if let Some(banner) = coordinator.config_error() {
        writeln!(out, "{banner}")?;
    } else {
        write_tools(coordinator, out)?;
    }
    writeln!(out, "type /help for commands")?;
    Ok(())
}

fn write_tools<L: Launcher, W: Write>(coordinator: &Coordinator<L>, out: &mut W) -> Result<()> {
    let selected = coordinator.selected_tool().map(|tool| tool.name.as_str());
    for tool in coordinator.tools() {
        let marker = if Some(tool.name.as_str()) == selected { '*' } else { ' ' };
        writeln!(out, "{marker} {} ({})", tool.name, tool.label)?;
    }
    Ok(())
}

fn drain_updates<W: Write>(updates: &mut broadcast::Receiver<ChatUpdate>, out: &mut W) -> Result<()> {
    loop {
        match updates.try_recv() {
            Ok(update) => render_update(&update, out).context("write update")?,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "terminal fell behind, some updates were dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    out.flush().context("flush stdout")?;
    Ok(())
}

/// Terminal rendering of one update. Bot content has already been streamed
/// chunk by chunk, so its final message only closes the line.
fn render_update<W: Write>(update: &ChatUpdate, out: &mut W) -> io::Result<()> {
    match update {
        ChatUpdate::ResponseChunk { chunk, .. } => out.write_all(chunk.as_bytes()),
        ChatUpdate::MessageAppended(message) => match message.kind {
            MessageKind::User => Ok(()),
            MessageKind::Bot => {
                if message.content.ends_with('\n') {
                    Ok(())
                } else {
                    writeln!(out)
                }
            }
            MessageKind::Error => writeln!(out, "! {}", message.content),
            MessageKind::System => writeln!(out, "{}", message.content),
        },
        ChatUpdate::Cleared => writeln!(out, "(cleared)"),
        ChatUpdate::ToolSelected { name } => writeln!(out, "using {name}"),
        ChatUpdate::StateChanged(_) | ChatUpdate::ToolsReplaced => Ok(()),
    }
}
