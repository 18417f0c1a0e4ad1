//! Per-evaluation trace recording.
//!
//! Each evaluated scenario produces one [`TraceRecord`]. A trace is opened
//! with its input and metadata, updated once with the output, then ended.
//! Ended traces are queued on the [`TelemetryClient`] and committed by
//! [`TelemetryClient::flush`].

use crate::results::EvaluationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// File name of the trace log inside the project directory.
pub const TRACE_FILE_NAME: &str = "traces.jsonl";

/// Errors from trace recording.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Trace {0} was already updated")]
    AlreadyUpdated(Uuid),

    #[error("Failed to write traces: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize trace: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the agent was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceInput {
    pub user_message: String,
    pub context: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub experiment_id: String,
    pub scenario_index: usize,
    pub evaluation_type: EvaluationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// What the agent answered and how it scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceOutput {
    pub response: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One committed or pending trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub name: String,
    pub project: String,
    pub input: TraceInput,
    pub metadata: TraceMetadata,
    pub output: Option<TraceOutput>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum Sink {
    Memory,
    JsonlFile(PathBuf),
}

/// Shared trace recorder for one project.
///
/// Safe to share across tasks; all state sits behind mutexes.
#[derive(Debug)]
pub struct TelemetryClient {
    project: String,
    sink: Sink,
    pending: Mutex<Vec<TraceRecord>>,
    committed: Mutex<Vec<TraceRecord>>,
}

impl TelemetryClient {
    /// A client that keeps committed traces in memory.
    pub fn in_memory(project: impl Into<String>) -> Self {
        Self::with_sink(project.into(), Sink::Memory)
    }

    /// A client appending to `<dir>/<project>/traces.jsonl`.
    pub fn jsonl(dir: impl AsRef<Path>, project: impl Into<String>) -> Self {
        let project = project.into();
        let path = dir.as_ref().join(&project).join(TRACE_FILE_NAME);
        Self::with_sink(project, Sink::JsonlFile(path))
    }

    fn with_sink(project: String, sink: Sink) -> Self {
        Self {
            project,
            sink,
            pending: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Path of the trace log, for file-backed clients.
    pub fn trace_path(&self) -> Option<&Path> {
        match &self.sink {
            Sink::Memory => None,
            Sink::JsonlFile(path) => Some(path),
        }
    }

    /// Open a trace. Nothing is queued until the handle is ended.
    pub fn trace(
        &self,
        name: impl Into<String>,
        input: TraceInput,
        metadata: TraceMetadata,
    ) -> TraceHandle<'_> {
        TraceHandle {
            client: self,
            record: TraceRecord {
                id: Uuid::new_v4(),
                name: name.into(),
                project: self.project.clone(),
                input,
                metadata,
                output: None,
                started_at: Utc::now(),
                ended_at: None,
            },
        }
    }

    /// Number of ended traces awaiting flush.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Traces committed by in-memory clients.
    pub fn committed(&self) -> Vec<TraceRecord> {
        lock(&self.committed).clone()
    }

    /// Commit all pending traces, returning how many were written.
    ///
    /// On a write failure the traces stay pending so a later flush can retry.
    pub async fn flush(&self) -> Result<usize, TelemetryError> {
        let batch = std::mem::take(&mut *lock(&self.pending));
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let result = match &self.sink {
            Sink::Memory => {
                lock(&self.committed).extend(batch.iter().cloned());
                Ok(())
            }
            Sink::JsonlFile(path) => append_jsonl(path, &batch).await,
        };

        match result {
            Ok(()) => {
                log::debug!("Flushed {} traces for project '{}'", count, self.project);
                Ok(count)
            }
            Err(e) => {
                let mut pending = lock(&self.pending);
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                Err(e)
            }
        }
    }

    fn enqueue(&self, record: TraceRecord) {
        lock(&self.pending).push(record);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn append_jsonl(path: &Path, records: &[TraceRecord]) -> Result<(), TelemetryError> {
    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buffer.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// An open trace.
///
/// Dropping the handle without calling [`end`](Self::end) discards the trace.
#[derive(Debug)]
pub struct TraceHandle<'a> {
    client: &'a TelemetryClient,
    record: TraceRecord,
}

impl TraceHandle<'_> {
    pub fn id(&self) -> Uuid {
        self.record.id
    }

    /// Attach the output. A trace accepts exactly one update.
    pub fn update(&mut self, output: TraceOutput) -> Result<(), TelemetryError> {
        if self.record.output.is_some() {
            return Err(TelemetryError::AlreadyUpdated(self.record.id));
        }
        self.record.metadata.score = Some(output.score);
        self.record.output = Some(output);
        Ok(())
    }

    /// Close the trace and queue it for the next flush.
    pub fn end(mut self) {
        self.record.ended_at = Some(Utc::now());
        self.client.enqueue(self.record);
    }
}
