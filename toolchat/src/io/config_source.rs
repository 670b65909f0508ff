//! Where the tool registry text comes from.
//!
//! The coordinator never touches the filesystem itself; front-ends hand it the
//! result of [`load_registry`] against a [`ConfigSource`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::registry::{ConfigError, Registry, parse_registry};

/// Registry file name, resolved against the user's home directory.
pub const REGISTRY_FILE_NAME: &str = ".cockpit-chat-tools.conf";

/// Capability to read the raw registry text.
pub trait ConfigSource {
    /// Returns the text, or `ConfigError::NotFound` when there is nothing to read.
    fn read(&self) -> Result<String, ConfigError>;
}

/// Registry stored in a plain file.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.cockpit-chat-tools.conf` for the current user, if a home directory exists.
    pub fn for_current_user() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(REGISTRY_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn read(&self) -> Result<String, ConfigError> {
        fs::read_to_string(&self.path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ConfigError::NotFound {
                path: self.path.clone(),
            },
            _ => ConfigError::Read {
                path: self.path.clone(),
                source,
            },
        })
    }
}

/// Read and parse the registry in one step.
#[instrument(skip_all)]
pub fn load_registry(source: &dyn ConfigSource) -> Result<Registry, ConfigError> {
    let text = source.read()?;
    let registry = parse_registry(&text)?;
    debug!(tools = registry.tools().len(), "loaded tool registry");
    Ok(registry)
}
