use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use reelforge_events::{EventScope, StreamEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::heartbeat::{heartbeat_event, HEARTBEAT_INTERVAL_SECS};

/// Everything needed to serve one subscription, taken before the upgrade so
/// unknown ids fail with a normal HTTP error.
pub struct EventStream {
    pub scope: EventScope,
    pub id: Uuid,
    pub history: Vec<StreamEvent>,
    pub live: mpsc::UnboundedReceiver<StreamEvent>,
    /// Runs after the socket closes. Drops the listener if it is still
    /// registered.
    pub on_close: Box<dyn FnOnce() + Send>,
}

type Sink = SplitSink<WebSocket, Message>;

/// Serve `stream` over `socket` until the terminal event, the client
/// closes, or the source drops its listeners.
pub async fn stream_events(socket: WebSocket, stream: EventStream) {
    let EventStream {
        scope,
        id,
        history,
        mut live,
        on_close,
    } = stream;
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, stream_id = %id, replay = history.len(), "Event stream connected");

    let (mut sink, mut inbound) = socket.split();

    let mut open = true;
    for event in &history {
        if !send_event(&mut sink, event).await {
            open = false;
            break;
        }
    }

    let period = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    while open {
        tokio::select! {
            next = live.recv() => match next {
                Some(event) => {
                    let terminal = event.is_terminal();
                    open = send_event(&mut sink, &event).await && !terminal;
                }
                None => open = false,
            },
            _ = heartbeat.tick() => {
                open = send_event(&mut sink, &heartbeat_event(scope, id)).await;
            }
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => open = false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Websocket receive error");
                    open = false;
                }
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    on_close();
    tracing::info!(conn_id = %conn_id, stream_id = %id, "Event stream closed");
}

async fn send_event(sink: &mut Sink, event: &StreamEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, event = %event.event, "Failed to encode stream event");
            return true;
        }
    };
    if sink.send(Message::Text(text.into())).await.is_err() {
        tracing::debug!(event = %event.event, "Websocket sink closed");
        return false;
    }
    true
}
