//! I/O collaborators for the turn coordinator.

pub mod config_source;
pub mod launcher;
pub mod process;
pub mod settings;
