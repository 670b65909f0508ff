//! Conversational front-end over external command-line tools.
//!
//! Each user submission becomes one turn: the selected tool is launched with the
//! accumulated transcript as its final argument, its output is streamed back into
//! the visible message log, and the finished exchange is folded into the
//! transcript for the next turn. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (registry parsing, transcript,
//!   input recall, markdown-lite rendering). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config files, settings, external
//!   processes). Isolated behind traits so tests can script them.
//!
//! The [`coordinator`] ties both together as the turn state machine, and
//! [`repl`] drives it from a terminal.

pub mod coordinator;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod repl;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
