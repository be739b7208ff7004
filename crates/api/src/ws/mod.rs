//! Websocket event streams for jobs and runs.
//!
//! A stream replays the stored history, then forwards live events with a
//! heartbeat every [`HEARTBEAT_INTERVAL_SECS`] seconds, and closes after
//! the terminal event.

mod heartbeat;
mod stream;

pub use heartbeat::{heartbeat_event, HEARTBEAT_INTERVAL_SECS};
pub use stream::{stream_events, EventStream};
