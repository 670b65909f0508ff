//! Application settings stored as TOML (default `~/.config/toolchat/settings.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::SessionLimits;

/// Toolchat settings (TOML).
///
/// This file is intended to be edited by humans. Missing fields take their
/// default values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Seconds without output before a running tool is killed.
    pub liveness_timeout_secs: u64,

    /// Number of submitted inputs kept for recall.
    pub recall_capacity: usize,

    /// Truncate a single response beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Render finished bot messages through the markdown-lite renderer.
    pub render_markdown: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: 30,
            recall_capacity: 100,
            output_limit_bytes: 1024 * 1024,
            render_markdown: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.liveness_timeout_secs == 0 {
            return Err(anyhow!("liveness_timeout_secs must be > 0"));
        }
        if self.recall_capacity == 0 {
            return Err(anyhow!("recall_capacity must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            liveness_timeout: self.liveness_timeout(),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

/// `$XDG_CONFIG_HOME/toolchat/settings.toml` (or the platform equivalent).
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolchat").join("settings.toml"))
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.liveness_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(&path, "liveness_timeout_secs = 5\n").expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.liveness_timeout_secs, 5);
        assert_eq!(settings.recall_capacity, Settings::default().recall_capacity);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        fs::write(&path, "liveness_timeout_secs = 0\n").expect("write");
        let err = load_settings(&path).unwrap_err();
        assert!(err.to_string().contains("liveness_timeout_secs"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("settings.toml");
        let settings = Settings {
            render_markdown: true,
            ..Settings::default()
        };
        write_settings(&path, &settings).expect("write");
        assert_eq!(load_settings(&path).expect("load"), settings);
    }
}
