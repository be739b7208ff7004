//! Reelforge event streams.
//!
//! - [`StreamEvent`]: the `{event, jobId, timestamp, ...}` envelope carried
//!   on job and run streams.
//! - [`EventHistory`]: bounded per-stream ring buffer with synchronous
//!   listeners, so late subscribers can replay before going live.
//! - [`EventBus`]: process-wide fan-out, with lossy broadcast subscribers
//!   and lossless journal feeds.
//! - [`EventPersistence`]: background service appending every bus event
//!   to its stream's on-disk journal.

pub mod bus;
pub mod history;
pub mod persistence;

pub use bus::{EventBus, EventScope, EventSink, StreamEvent};
pub use history::{channel_listener, EventHistory, Listener, ListenerId, DEFAULT_HISTORY_CAPACITY};
pub use persistence::{read_journal, EventPersistence};
