//! Reconciliation, execution and orchestration

pub mod artifacts;
pub mod classify;
pub mod events;
pub mod preflight;
pub mod runner;
pub mod syncer;

pub use events::{Event, EventName, EventSink, JsonSink, Level, TracingSink};
pub use preflight::{Preflight, PreflightMode};
pub use runner::{Echo, StdinMode, SubprocessRunner};
pub use syncer::{Prompter, SyncError, SyncOptions, SyncSummary, Syncer};
