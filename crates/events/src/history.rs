//! Bounded per-stream event history with synchronous listeners.
//!
//! Each job or run owns one [`EventHistory`]. Recording an event assigns
//! its sequence number, appends it to the ring buffer (evicting the oldest
//! entry at capacity) and invokes every listener inline. Owners keep the
//! history behind their table mutex, so a replay taken together with a
//! subscription under that mutex observes no gap and no duplicate.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bus::StreamEvent;

/// Default number of events retained per stream.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Callback invoked for every recorded event.
///
/// Runs while the owner's lock is held; it must not call back into the
/// owner.
pub type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Handle returned by [`EventHistory::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventHistory {
    events: VecDeque<StreamEvent>,
    capacity: usize,
    next_seq: u64,
    next_listener: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            next_seq: 1,
            next_listener: 1,
            listeners: Vec::new(),
        }
    }

    /// Record an event and notify listeners. Returns the stored copy.
    pub fn record(&mut self, mut event: StreamEvent) -> StreamEvent {
        event.seq = self.next_seq;
        self.next_seq += 1;

        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());

        for (_, listener) in &self.listeners {
            listener(&event);
        }
        event
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Retained events, oldest first.
    pub fn replay(&self) -> Vec<StreamEvent> {
        self.events.iter().cloned().collect()
    }

    /// Snapshot the retained events and attach a channel listener in one
    /// step. Every event recorded afterwards arrives on the receiver.
    pub fn replay_and_subscribe(
        &mut self,
    ) -> (Vec<StreamEvent>, ListenerId, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let history = self.replay();
        let id = self.subscribe(channel_listener(tx));
        (history, id, rx)
    }

    /// Remove every listener. Called by owners once a stream is closed.
    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Sequence number the next recorded event will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Listener that forwards events into an unbounded channel.
///
/// Send errors are ignored: a closed receiver just stops receiving.
pub fn channel_listener(tx: mpsc::UnboundedSender<StreamEvent>) -> Listener {
    Arc::new(move |event: &StreamEvent| {
        let _ = tx.send(event.clone());
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use super::*;
    use crate::bus::EventScope;

    fn event(name: &str) -> StreamEvent {
        StreamEvent::new(name, EventScope::Job, Uuid::nil())
    }

    #[test]
    fn assigns_increasing_sequence_numbers() {
        let mut history = EventHistory::new(10);
        let a = history.record(event("a"));
        let b = history.record(event("b"));
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(history.next_seq(), 3);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut history = EventHistory::new(2);
        history.record(event("a"));
        history.record(event("b"));
        history.record(event("c"));
        let names: Vec<_> = history.replay().into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn listeners_run_synchronously_until_unsubscribed() {
        let mut history = EventHistory::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = history.subscribe(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        history.record(event("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(history.unsubscribe(id));
        assert!(!history.unsubscribe(id));
        history.record(event("b"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replay_then_live_has_no_gap_or_duplicate() {
        let mut history = EventHistory::default();
        history.record(event("a"));
        history.record(event("b"));

        let (replayed, _id, mut rx) = history.replay_and_subscribe();
        history.record(event("c"));

        assert_eq!(replayed.len(), 2);
        let live = rx.try_recv().unwrap();
        assert_eq!(live.event, "c");
        assert_eq!(live.seq, replayed.last().unwrap().seq + 1);
        assert!(rx.try_recv().is_err());
    }
}
