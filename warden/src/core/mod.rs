//! Pure decision logic for governed sessions.
//!
//! Nothing here touches the filesystem, spawns a process, or reads a
//! clock. Given the same policy and the same inputs, every function in
//! this tree returns the same answer, which is what makes decisions
//! auditable after the fact.

pub mod action;
pub mod branch;
pub mod interceptor;
pub mod policy;
