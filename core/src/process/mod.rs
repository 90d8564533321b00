//! Process control for the forktask core library
//!
//! This module wraps the process primitives the task engine is built on:
//! detaching from child-termination signals, forking workers, assigning
//! process titles, non-blocking waits, and signal-based kills.
//!
//! ## Platform Support
//!
//! - **Unix**: full support; forking is the concurrency primitive
//! - Other platforms would need a spawn-based re-implementation of the
//!   double-launch protocol and are not provided here
//!
//! ## Safety
//!
//! The implementations keep process teardown reliable by:
//! - Ignoring `SIGCHLD` before forking so detached children never linger
//!   as zombies the caller must reap
//! - Tolerating already-exited targets on every signal path
//! - Removing PID registry markers before killing their processes

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
