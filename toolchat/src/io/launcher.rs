//! Launcher abstraction for tool invocation.
//!
//! The [`Launcher`] trait decouples the turn coordinator from real process
//! spawning. Tests use a scripted launcher that hands back sessions whose
//! events are fed by the test itself.

use tracing::{info, instrument};

use crate::io::process::{LaunchRequest, SessionError, SessionHandle, SessionLimits, spawn_session};

/// Starts one session per turn.
pub trait Launcher {
    /// Start a session for `request`. Spawn failures are returned synchronously.
    fn launch(&self, request: &LaunchRequest) -> Result<SessionHandle, SessionError>;
}

/// Launcher that spawns real OS processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    limits: SessionLimits,
}

impl ProcessLauncher {
    pub fn new(limits: SessionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }
}

impl Launcher for ProcessLauncher {
    #[instrument(skip_all, fields(command = %request.command))]
    fn launch(&self, request: &LaunchRequest) -> Result<SessionHandle, SessionError> {
        info!(input_bytes = request.input.len(), "starting tool session");
        spawn_session(request, self.limits)
    }
}
