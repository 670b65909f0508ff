//! Stable exit codes for toolchat CLI commands.

/// Command succeeded (for `ask`: the turn completed with bot output).
pub const OK: i32 = 0;
/// Command failed due to invalid arguments, settings, or other errors.
pub const INVALID: i32 = 1;
/// The tool registry could not be loaded (missing, empty, or no valid tools).
pub const CONFIG: i32 = 2;
/// `toolchat ask` ended with an error outcome (spawn failure, process failure,
/// timeout, cancellation, or no output).
pub const TURN_FAILED: i32 = 3;
