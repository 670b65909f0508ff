//! Chat with external command-line tools.
//!
//! Tools are declared one per line in `~/.cockpit-chat-tools.conf`; each turn
//! runs the selected tool with the conversation so far as its last argument.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use toolchat::coordinator::{Coordinator, CoordinatorOptions};
use toolchat::core::registry::ConfigError;
use toolchat::core::types::MessageKind;
use toolchat::exit_codes;
use toolchat::io::config_source::{FileConfigSource, load_registry};
use toolchat::io::launcher::ProcessLauncher;
use toolchat::io::settings::{Settings, default_settings_path, load_settings, write_settings};
use toolchat::{logging, repl};

#[derive(Parser)]
#[command(
    name = "toolchat",
    version,
    about = "Converse with external command-line tools, one process per turn"
)]
struct Cli {
    /// Tool registry file (default: ~/.cockpit-chat-tools.conf).
    #[arg(long, global = true)]
    tools: Option<PathBuf>,

    /// Settings file (default: ~/.config/toolchat/settings.toml).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (the default).
    Repl,
    /// List the tools parsed from the registry.
    Tools,
    /// Run a single turn and print the tool's output.
    Ask {
        /// Tool name (default: the first tool in the registry).
        #[arg(short, long)]
        tool: Option<String>,
        /// Message to send.
        text: String,
    },
    /// Write a settings file with default values if missing.
    Init {
        /// Overwrite an existing settings file.
        #[arg(short, long)]
        force: bool,
    },
}

/// Failure that maps to a specific exit code.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ExitError {
    code: i32,
    message: String,
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(()) => std::process::exit(exit_codes::OK),
        Err(err) => {
            eprintln!("{:#}", err);
            let code = err
                .downcast_ref::<ExitError>()
                .map(|exit| exit.code)
                .unwrap_or(exit_codes::INVALID);
            std::process::exit(code);
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path().context("cannot determine settings directory")?,
    };

    match cli.command.unwrap_or(Command::Repl) {
        Command::Init { force } => cmd_init(&settings_path, force),
        Command::Tools => cmd_tools(cli.tools),
        Command::Repl => {
            let mut coordinator = build_coordinator(&settings_path, cli.tools)?;
            repl::run(&mut coordinator).await
        }
        Command::Ask { tool, text } => cmd_ask(&settings_path, cli.tools, tool, &text).await,
    }
}

fn cmd_init(settings_path: &Path, force: bool) -> Result<()> {
    if !force && settings_path.exists() {
        debug!(path = %settings_path.display(), "settings already present");
        return Ok(());
    }
    write_settings(settings_path, &Settings::default())?;
    println!("{}", settings_path.display());
    Ok(())
}

fn cmd_tools(tools_path: Option<PathBuf>) -> Result<()> {
    let registry = load_registry(&registry_source(tools_path)?).map_err(config_exit)?;
    for tool in registry.tools() {
        let mut line = format!("{}\t{}\t{}", tool.name, tool.label, tool.command);
        for arg in &tool.args {
            line.push(' ');
            line.push_str(arg);
        }
        println!("{line}");
    }
    Ok(())
}

async fn cmd_ask(
    settings_path: &Path,
    tools_path: Option<PathBuf>,
    tool: Option<String>,
    text: &str,
) -> Result<()> {
    let mut coordinator = build_coordinator(settings_path, tools_path)?;
    if let Some(banner) = coordinator.config_error() {
        return Err(exit_error(exit_codes::CONFIG, banner.to_string()));
    }
    if let Some(name) = tool {
        if !coordinator.select_tool(&name) {
            bail!("unknown tool: {name}");
        }
    }
    if text.trim().is_empty() {
        bail!("message must not be empty");
    }

    let mut stdout = std::io::stdout();
    let last = repl::ask(&mut coordinator, text, &mut stdout)
        .await?
        .ok_or_else(|| anyhow!("message was not submitted"))?;
    match last.kind {
        MessageKind::Bot => {
            if !last.content.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        _ => Err(exit_error(exit_codes::TURN_FAILED, last.content)),
    }
}

fn build_coordinator(
    settings_path: &Path,
    tools_path: Option<PathBuf>,
) -> Result<Coordinator<ProcessLauncher>> {
    let settings = load_settings(settings_path)?;
    let launcher = ProcessLauncher::new(settings.session_limits());
    let mut coordinator = Coordinator::new(launcher, CoordinatorOptions::from(&settings));
    coordinator.load_registry(load_registry(&registry_source(tools_path)?));
    Ok(coordinator)
}

fn registry_source(tools_path: Option<PathBuf>) -> Result<FileConfigSource> {
    match tools_path {
        Some(path) => Ok(FileConfigSource::new(path)),
        None => FileConfigSource::for_current_user().context("cannot determine home directory"),
    }
}

fn config_exit(err: ConfigError) -> anyhow::Error {
    exit_error(exit_codes::CONFIG, err.to_string())
}

fn exit_error(code: i32, message: String) -> anyhow::Error {
    anyhow::Error::new(ExitError { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_carry_config_exit_code() {
        let err = config_exit(ConfigError::NoValidTools);
        let exit = err.downcast_ref::<ExitError>().expect("exit error");
        assert_eq!(exit.code, exit_codes::CONFIG);
        assert_eq!(
            format!("{err:#}"),
            "No valid tools parsed. Check ~/.cockpit-chat-tools.conf format"
        );
    }

    #[test]
    fn defaults_to_repl() {
        let cli = Cli::parse_from(["toolchat"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parse_ask_with_tool() {
        let cli = Cli::parse_from(["toolchat", "ask", "--tool", "t", "hi there"]);
        assert!(matches!(
            cli.command,
            Some(Command::Ask { tool: Some(ref t), ref text }) if t == "t" && text == "hi there"
        ));
    }

    #[test]
    fn global_paths_accepted_after_subcommand() {
        let cli = Cli::parse_from(["toolchat", "tools", "--tools", "/tmp/x.conf"]);
        assert_eq!(cli.tools, Some(PathBuf::from("/tmp/x.conf")));
        assert!(matches!(cli.command, Some(Command::Tools)));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["toolchat", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }
}
