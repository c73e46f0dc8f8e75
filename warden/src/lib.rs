//! Governed execution core for semi-autonomous coding agents.
//!
//! An agent runs as a supervised subprocess under a team's permission
//! policy. Every operation it surfaces is intercepted and answered
//! before it proceeds, its branch is checked before anything starts and
//! again before history-writing actions, its output is captured line by
//! line, and the run ends in exactly one terminal outcome with a sealed
//! transcript.
//!
//! The crate splits into [`core`] (pure decisions: policies, branch
//! gate, interception) and [`io`] (side effects: the process driver,
//! git queries, artifact persistence). [`session`] orchestrates one run
//! across that boundary.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
