//! Observability: logging and the structured event stream.

pub mod events;
pub mod logging;

pub use events::{Event, EventEmitter, RunSummary, StopReason};
pub use logging::{LogFormat, init_logging};
