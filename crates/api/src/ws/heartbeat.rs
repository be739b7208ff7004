use reelforge_core::job_events::HEARTBEAT;
use reelforge_events::{EventScope, StreamEvent};
use uuid::Uuid;

/// Interval between heartbeat frames on event streams (in seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Keep-alive record. Not stored in history and carries no `seq`.
pub fn heartbeat_event(scope: EventScope, id: Uuid) -> StreamEvent {
    StreamEvent::new(HEARTBEAT, scope, id)
}
