//! Stable exit codes for warden CLI commands.
//!
//! Scripts and CI hooks branch on these, so the values are contractual.

/// Session completed, or a check passed.
pub const OK: i32 = 0;
/// Invalid usage, an unloadable policy, or any other operational error.
pub const INVALID: i32 = 1;
/// The branch gate rejected the active branch.
pub const BRANCH_REJECTED: i32 = 2;
/// Session aborted on denials, or `check-action` denied the action.
pub const DENIED: i32 = 3;
/// A wall-clock or inactivity budget expired.
pub const TIMEOUT: i32 = 4;
/// The agent crashed: nonzero exit or death by signal.
pub const CRASHED: i32 = 5;
/// The session was cancelled from outside.
pub const CANCELLED: i32 = 6;
