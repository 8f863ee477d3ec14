//! Daemon composition: event dispatch plus the main select loop.

pub mod event_loop;
pub mod events;

pub use event_loop::run;
