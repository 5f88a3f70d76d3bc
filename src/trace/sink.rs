//! Trace sinks
//!
//! Handlers hand events to a [`TraceSink`] and move on; nothing is awaited.
//! [`Tracer`] forwards events over a channel to a writer task that appends
//! one JSON document per line to stdout or a file.

use super::event::TraceEvent;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Fire-and-forget destination for trace events
pub trait TraceSink: Send + Sync {
    /// Accept an event; must not block the caller
    fn trace_event(&self, event: TraceEvent);
}

/// Where the [`Tracer`] writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutput {
    Stdout,
    File(PathBuf),
}

impl TraceOutput {
    /// `"stdout"` (or empty) selects stdout, anything else is a file path
    pub fn from_config(output: &str) -> Self {
        match output.trim() {
            "" | "stdout" | "-" => Self::Stdout,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

/// Channel-backed sink with a JSON-lines writer task
#[derive(Clone)]
pub struct Tracer {
    tx: mpsc::UnboundedSender<TraceEvent>,
}

impl Tracer {
    /// Open the output and spawn the writer task
    ///
    /// The task exits once every clone of the returned tracer is dropped.
    pub async fn start(output: TraceOutput) -> Result<(Self, tokio::task::JoinHandle<()>)> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match &output {
            TraceOutput::Stdout => Box::new(tokio::io::stdout()),
            TraceOutput::File(path) => Box::new(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_events(rx, writer));

        tracing::info!(output = ?output, "Trace writer started");
        Ok((Self { tx }, handle))
    }
}

impl TraceSink for Tracer {
    fn trace_event(&self, event: TraceEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Trace writer stopped, dropping event");
        }
    }
}

async fn write_events(
    mut rx: mpsc::UnboundedReceiver<TraceEvent>,
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
) {
    while let Some(event) = rx.recv().await {
        tracing::debug!(
            id = %event.id,
            source_ip = %event.source_ip,
            command = %event.command,
            "{}",
            event.msg
        );

        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize trace event {}: {}", event.id, e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!("Failed to write trace event {}: {}", event.id, e);
            continue;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!("Failed to flush trace output: {}", e);
        }
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in emission order
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceSink for MemorySink {
    fn trace_event(&self, event: TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Protocol;

    fn event(command: &str) -> TraceEvent {
        TraceEvent::stateless(
            "New TCP attempt",
            Protocol::Tcp,
            "192.168.1.20:5555".parse().unwrap(),
            command,
            "test service",
        )
    }

    #[test]
    fn test_output_from_config() {
        assert_eq!(TraceOutput::from_config("stdout"), TraceOutput::Stdout);
        assert_eq!(TraceOutput::from_config(""), TraceOutput::Stdout);
        assert_eq!(
            TraceOutput::from_config("/var/log/lagoon.jsonl"),
            TraceOutput::File(PathBuf::from("/var/log/lagoon.jsonl"))
        );
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.trace_event(event("a"));
        sink.trace_event(event("b"));

        let commands: Vec<_> = sink.events().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_tracer_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let (tracer, handle) = Tracer::start(TraceOutput::File(path.clone())).await.unwrap();
        tracer.trace_event(event("uname -a"));
        tracer.trace_event(event("id"));
        drop(tracer);
        handle.await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: TraceEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.command, "uname -a");
        assert_eq!(first.source_ip, "192.168.1.20");
    }

    #[tokio::test]
    async fn test_tracer_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("events.jsonl");
        assert!(Tracer::start(TraceOutput::File(path)).await.is_err());
    }
}
