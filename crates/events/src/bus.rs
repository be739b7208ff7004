//! Event envelope and the in-process broadcast bus.
//!
//! [`EventBus`] fans every [`StreamEvent`] out to process-wide consumers.
//! Broadcast subscribers may lag and lose events; journal feeds from
//! [`EventBus::journal`] are unbounded and see every event. Per-stream
//! replay lives in [`crate::history`].

use reelforge_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// Which kind of stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Job,
    Run,
}

impl EventScope {
    /// Directory under the data dir holding this scope's journals.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Job => "jobs",
            Self::Run => "runs",
        }
    }
}

/// One record on a job or run event stream.
///
/// Serializes flat: `{"event": "...", "jobId": "...", "timestamp": "...",
/// "scope": "job", "seq": 3, ...payload}`. Runs reuse `jobId` for the run
/// id so every consumer parses one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub event: String,
    pub job_id: Uuid,
    pub timestamp: Timestamp,
    pub scope: EventScope,
    /// Position within the stream, assigned by [`crate::EventHistory`].
    #[serde(default)]
    pub seq: u64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl StreamEvent {
    /// Create an event with an empty payload, timestamped now.
    pub fn new(event: impl Into<String>, scope: EventScope, id: Uuid) -> Self {
        Self {
            event: event.into(),
            job_id: id,
            timestamp: chrono::Utc::now(),
            scope,
            seq: 0,
            payload: serde_json::Map::new(),
        }
    }

    /// Set the payload. Objects are flattened into the envelope; any other
    /// value is carried under `data`.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        match payload {
            serde_json::Value::Object(map) => self.payload = map,
            serde_json::Value::Null => self.payload.clear(),
            other => {
                self.payload.clear();
                self.payload.insert("data".into(), other);
            }
        }
        self
    }

    /// Terminal events close a stream: nothing follows them.
    pub fn is_terminal(&self) -> bool {
        use reelforge_core::job_events::*;
        matches!(
            self.event.as_str(),
            JOB_COMPLETED | JOB_FAILED | JOB_CANCELED | RUN_COMPLETED | RUN_FAILED | RUN_CANCELED
        )
    }
}

/// Something that accepts events for one stream.
///
/// The executor and coordinator report progress through this seam without
/// knowing which manager owns the stream.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value);
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
    journals: Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            journals: Mutex::new(Vec::new()),
        }
    }

    /// Publish to every journal feed and all current subscribers.
    pub fn publish(&self, event: StreamEvent) {
        {
            let mut journals = self.journals.lock().unwrap_or_else(|e| e.into_inner());
            journals.retain(|tx| tx.send(event.clone()).is_ok());
        }
        let _ = self.sender.send(event);
    }

    /// Lossy live feed. Receivers that fall more than `capacity` events
    /// behind observe `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// Lossless feed of every event published from now on.
    ///
    /// The channel closes when the bus is dropped; dropping the receiver
    /// detaches it.
    pub fn journal(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.journals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
