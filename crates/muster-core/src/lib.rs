//! Shared types for the muster workspace-status system.
//!
//! This crate holds everything the daemon and its consumers agree on: the
//! schema of published records, the coordination-store key layout, and
//! configuration loading. It deliberately contains no I/O beyond reading the
//! config file, so display surfaces can depend on it without pulling in the
//! daemon's probe stack.

pub mod config;
pub mod keys;
pub mod logging;
pub mod schema;
