//! Side-effecting adapters: processes, git, and the filesystem.
//!
//! Decisions stay in [`crate::core`]; everything here either feeds those
//! decisions real-world inputs or persists their consequences.

pub mod git;
pub mod init;
pub mod policy_store;
pub mod process;
pub mod report;
