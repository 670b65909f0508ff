//! Test-only helpers: a scripted launcher and fixture files.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::registry::ConfigError;
use crate::core::types::{Outcome, SessionEvent};
use crate::io::config_source::ConfigSource;
use crate::io::launcher::Launcher;
use crate::io::process::{LaunchRequest, SessionError, SessionHandle};

#[derive(Default)]
struct ScriptState {
    launches: Vec<LaunchRequest>,
    sessions: Vec<ScriptedSession>,
    fail_next_spawn: Option<io::ErrorKind>,
}

/// Launcher that records every request and returns sessions driven by the test.
///
/// Cloning shares the underlying script, so a test can keep one clone while the
/// coordinator owns another.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state poisoned")
    }

    /// Make the next `launch` fail as if spawning returned `kind`.
    pub fn fail_next_spawn(&self, kind: io::ErrorKind) {
        self.lock().fail_next_spawn = Some(kind);
    }

    pub fn launch_count(&self) -> usize {
        self.lock().launches.len()
    }

    /// Request passed to the `index`-th launch (0-based).
    pub fn request(&self, index: usize) -> LaunchRequest {
        self.lock().launches[index].clone()
    }

    /// Controller for the `index`-th successfully started session (0-based).
    pub fn session(&self, index: usize) -> ScriptedSession {
        self.lock().sessions[index].clone()
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<SessionHandle, SessionError> {
        let mut state = self.lock();
        state.launches.push(request.clone());
        if let Some(kind) = state.fail_next_spawn.take() {
            return Err(SessionError::Spawn {
                command: request.command.clone(),
                source: io::Error::from(kind),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        state.sessions.push(ScriptedSession {
            tx,
            cancel: cancel.clone(),
        });
        Ok(SessionHandle::new(rx, cancel))
    }
}

/// Producer side of a scripted session.
#[derive(Clone)]
pub struct ScriptedSession {
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl ScriptedSession {
    pub fn output(&self, chunk: &str) {
        let _ = self.tx.send(SessionEvent::Output(chunk.to_string()));
    }

    pub fn finish(&self, outcome: Outcome) {
        let _ = self.tx.send(SessionEvent::Finished(outcome));
    }

    /// Stream `output` as one chunk (if non-empty), then complete.
    pub fn complete(&self, output: &str) {
        if !output.is_empty() {
            self.output(output);
        }
        self.finish(Outcome::Completed {
            output: output.to_string(),
        });
    }

    pub fn fail(&self, detail: &str) {
        self.finish(Outcome::Failed {
            detail: detail.to_string(),
        });
    }

    /// Whether the consumer cancelled (or dropped) the session.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// In-memory registry text.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(pub String);

impl StaticConfigSource {
    pub fn new(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl ConfigSource for StaticConfigSource {
    fn read(&self) -> Result<String, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Write a registry file into a fresh temp dir. Keep the dir alive for the test.
pub fn registry_file(contents: &str) -> io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tools.conf");
    fs::write(&path, contents)?;
    Ok((dir, path))
}
