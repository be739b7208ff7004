//! Append-only on-disk event journal.
//!
//! [`EventPersistence`] drains a lossless
//! [`EventBus::journal`](crate::bus::EventBus::journal) feed and appends
//! every [`StreamEvent`] as one JSON line to
//! `<data_dir>/<jobs|runs>/<id>/events.jsonl`. It runs as a long-lived
//! background task and stops when the bus is dropped or the shutdown
//! token fires, writing out whatever is still queued first.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventScope, StreamEvent};

/// File name of the journal inside a job or run directory.
pub const JOURNAL_FILE: &str = "events.jsonl";

/// Background service that journals stream events to disk.
pub struct EventPersistence;

impl EventPersistence {
    /// Run the persistence loop until the feed closes or `shutdown` fires.
    pub async fn run(
        data_dir: PathBuf,
        mut receiver: mpsc::UnboundedReceiver<StreamEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                received = receiver.recv() => match received {
                    Some(event) => Self::persist_logged(&data_dir, &event).await,
                    None => {
                        tracing::info!("Event bus closed, journal shutting down");
                        return;
                    }
                },
                _ = shutdown.cancelled() => break,
            }
        }

        receiver.close();
        let mut drained = 0usize;
        while let Some(event) = receiver.recv().await {
            Self::persist_logged(&data_dir, &event).await;
            drained += 1;
        }
        tracing::info!(drained, "Event journal shut down");
    }

    async fn persist_logged(data_dir: &Path, event: &StreamEvent) {
        if let Err(e) = Self::persist(data_dir, event).await {
            tracing::error!(
                error = %e,
                event = %event.event,
                stream_id = %event.job_id,
                "Failed to journal event"
            );
        }
    }

    /// Path of the journal for one stream.
    pub fn journal_path(data_dir: &Path, scope: EventScope, id: uuid::Uuid) -> PathBuf {
        data_dir
            .join(scope.dir_name())
            .join(id.to_string())
            .join(JOURNAL_FILE)
    }

    /// Append a single event as one JSON line.
    pub async fn persist(data_dir: &Path, event: &StreamEvent) -> std::io::Result<()> {
        let path = Self::journal_path(data_dir, event.scope, event.job_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

/// Read a journal back. Lines that fail to parse are skipped with a warning.
pub async fn read_journal(path: &Path) -> std::io::Result<Vec<StreamEvent>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut events = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping malformed journal line"
            ),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use reelforge_core::job_events::{JOB_COMPLETED, JOB_QUEUED};
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn persist_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        EventPersistence::persist(dir.path(), &StreamEvent::new(JOB_QUEUED, EventScope::Job, id))
            .await
            .unwrap();
        EventPersistence::persist(
            dir.path(),
            &StreamEvent::new(JOB_COMPLETED, EventScope::Job, id)
                .with_payload(json!({ "status": "completed" })),
        )
        .await
        .unwrap();

        let path = EventPersistence::journal_path(dir.path(), EventScope::Job, id);
        assert!(path.starts_with(dir.path().join("jobs")));
        let events = read_journal(&path).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload["status"], "completed");
    }

    #[tokio::test]
    async fn missing_journal_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_journal(&dir.path().join("nope.jsonl")).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn run_loop_stops_when_bus_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(16);
        let id = Uuid::new_v4();
        let handle = tokio::spawn(EventPersistence::run(
            dir.path().to_path_buf(),
            bus.journal(),
            CancellationToken::new(),
        ));

        bus.publish(StreamEvent::new("run_started", EventScope::Run, id));
        drop(bus);
        handle.await.unwrap();

        let path = EventPersistence::journal_path(dir.path(), EventScope::Run, id);
        assert_eq!(read_journal(&path).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn burst_larger_than_bus_capacity_is_fully_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(8);
        let id = Uuid::new_v4();
        let feed = bus.journal();

        for n in 0..200 {
            bus.publish(
                StreamEvent::new("file_written", EventScope::Run, id).with_payload(json!({ "n": n })),
            );
        }
        drop(bus);
        EventPersistence::run(dir.path().to_path_buf(), feed, CancellationToken::new()).await;

        let path = EventPersistence::journal_path(dir.path(), EventScope::Run, id);
        let events = read_journal(&path).await.unwrap();
        assert_eq!(events.len(), 200);
        assert!(events.iter().enumerate().all(|(n, e)| e.payload["n"] == n));
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events_while_bus_is_alive() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(8);
        let id = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let feed = bus.journal();

        for _ in 0..50 {
            bus.publish(StreamEvent::new("job_progress", EventScope::Job, id));
        }
        // A clone of the bus is still held elsewhere; only the token ends the loop.
        shutdown.cancel();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            EventPersistence::run(dir.path().to_path_buf(), feed, shutdown),
        )
        .await
        .expect("journal must stop on shutdown");

        let path = EventPersistence::journal_path(dir.path(), EventScope::Job, id);
        assert_eq!(read_journal(&path).await.unwrap().len(), 50);

        bus.publish(StreamEvent::new("late", EventScope::Job, id));
        assert_eq!(read_journal(&path).await.unwrap().len(), 50);
    }
}
