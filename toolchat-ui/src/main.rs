//! Toolchat UI server - web front-end for chatting with command-line tools.

mod actor;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use toolchat::coordinator::{Coordinator, CoordinatorOptions};
use toolchat::io::config_source::{FileConfigSource, load_registry};
use toolchat::io::launcher::ProcessLauncher;
use toolchat::io::settings::{default_settings_path, load_settings};

use crate::state::AppState;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "toolchat-ui")]
#[command(about = "Web UI for chatting with command-line tools")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Tool registry file (default: ~/.cockpit-chat-tools.conf)
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Settings file (default: ~/.config/toolchat/settings.toml)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("toolchat_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let settings_path = match args.settings {
        Some(path) => path,
        None => default_settings_path().context("cannot determine settings directory")?,
    };
    let settings = load_settings(&settings_path)?;
    let source = match args.tools {
        Some(path) => FileConfigSource::new(path),
        None => FileConfigSource::for_current_user().context("cannot determine home directory")?,
    };
    let registry_path =
        std::path::absolute(source.path()).unwrap_or_else(|_| source.path().to_path_buf());
    info!(registry = %registry_path.display(), "starting toolchat-ui");

    let launcher = ProcessLauncher::new(settings.session_limits());
    let mut coordinator = Coordinator::new(launcher, CoordinatorOptions::from(&settings));
    coordinator.load_registry(load_registry(&source));

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let state = AppState::new(command_tx, coordinator.update_sender(), registry_path);
    tokio::spawn(actor::run(
        coordinator,
        source,
        command_rx,
        settings.render_markdown,
    ));

    sse::start_registry_watcher(state.clone());

    let api_router = routes::api_router();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", api_router)
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| PathBuf::from("ui").join("dist"));

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
