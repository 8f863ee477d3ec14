//! The instance state synchronization engine.
//!
//! One long-running process owns the instance registry: it discovers open
//! workspaces, enriches them through external probes, reconciles the
//! registry, and republishes snapshots to the coordination store. See
//! `daemon::run` for the composition of the loops.

pub mod assistant;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod governor;
pub mod lock;
pub mod probes;
pub mod publisher;
pub mod registry;
pub mod review_monitor;
pub mod scheduler;
pub mod store;
pub mod worktree;
