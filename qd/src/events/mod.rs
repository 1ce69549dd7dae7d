//! Thinking-event emission
//!
//! A write-only stream of progress records for UI consumption. The engine
//! emits and forgets; nothing in the pipeline ever reads these back.

mod sink;
mod types;

pub use sink::{EventSink, JsonlSink, NullSink};
pub use types::ThinkingEvent;
