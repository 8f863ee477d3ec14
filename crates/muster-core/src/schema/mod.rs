//! Published record schema.
//!
//! Field names serialize in camelCase because records are read by
//! TypeScript/plugin consumers straight out of the coordination store.

mod assistant;
mod events;
mod instance;
mod job;
mod review;

pub use assistant::{
    AssistantStatus, AssistantSession, SessionStatus, TerminalIdentity,
};
pub use events::{EventDecodeError, StoreEvent, decode_event};
pub use instance::{ExtensionState, GitInfo, Instance, MultiplexerStatus, TelemetryStatus};
pub use job::{JobStatus, WorktreeJob};
pub use review::{
    CheckConclusion, CheckRun, Checks, Mergeability, ReviewState, ReviewStatus,
};
