//! Durable event log.
//!
//! # Design Decisions
//! - One JSON object per line, appended and fsync'd before publish returns
//! - A failed append is truncated away; a torn tail left by a crash is
//!   terminated before the next record so that record stays readable
//! - Compaction rewrites to a sibling file and renames over the original
//! - Malformed lines are skipped on read, never fatal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::EventsConfig;
use crate::events::envelope::Event;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event log unavailable: {0}")]
    Durability(#[from] std::io::Error),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which persisted events survive compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_events: Option<usize>,
}

impl From<&EventsConfig> for RetentionPolicy {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_age: config.retention_secs.map(Duration::from_secs),
            max_events: config.max_events,
        }
    }
}

impl RetentionPolicy {
    /// Keep the events the policy retains, in their original order.
    pub fn apply(&self, mut events: Vec<Event>, now: DateTime<Utc>) -> Vec<Event> {
        if let Some(max_age) = self.max_age.and_then(|a| chrono::Duration::from_std(a).ok()) {
            let cutoff = now - max_age;
            events.retain(|e| e.created_at >= cutoff);
        }
        if let Some(max) = self.max_events {
            let excess = events.len().saturating_sub(max);
            events.drain(..excess);
        }
        events
    }
}

/// Filter for reads.
#[derive(Debug, Clone, Default)]
pub struct LogQuery<'a> {
    pub event_type: Option<&'a str>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl LogQuery<'_> {
    fn matches(&self, event: &Event) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self.since.map_or(true, |s| event.created_at >= s)
    }

    fn select(&self, events: impl Iterator<Item = Event>) -> Vec<Event> {
        let mut out: Vec<Event> = events.filter(|e| self.matches(e)).collect();
        if let Some(limit) = self.limit {
            let excess = out.len().saturating_sub(limit);
            out.drain(..excess);
        }
        out
    }
}

/// Append-only store behind the bus.
#[async_trait]
pub trait EventLog: Send + Sync + fmt::Debug {
    /// Persist one event. Must be durable when it returns `Ok`.
    async fn append(&self, event: &Event) -> Result<(), EventError>;

    /// Matching events, oldest first.
    async fn read(&self, query: LogQuery<'_>) -> Result<Vec<Event>, EventError>;

    /// Drop what the policy does not retain. Returns how many were dropped.
    async fn compact(&self, policy: &RetentionPolicy) -> Result<usize, EventError>;
}

/// In-memory log, for tests and for deployments that accept losing events
/// on restart.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &Event) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn read(&self, query: LogQuery<'_>) -> Result<Vec<Event>, EventError> {
        let events = self.events.lock().clone();
        Ok(query.select(events.into_iter()))
    }

    async fn compact(&self, policy: &RetentionPolicy) -> Result<usize, EventError> {
        let mut events = self.events.lock();
        let before = events.len();
        let kept = policy.apply(std::mem::take(&mut *events), Utc::now());
        *events = kept;
        Ok(before - events.len())
    }
}

/// JSON-lines file log.
pub struct FileEventLog {
    path: PathBuf,
    writer: tokio::sync::Mutex<LogWriter>,
}

struct LogWriter {
    file: File,
    /// The file does not end in a newline.
    torn: bool,
}

impl fmt::Debug for FileEventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEventLog").field("path", &self.path).finish()
    }
}

impl FileEventLog {
    /// Open (or create) the log at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = open_append(&path).await?;
        let torn = ends_mid_record(&path).await?;
        if torn {
            tracing::warn!(path = ?path, "Event log ends with a partial record");
        }
        tracing::info!(path = ?path, "Event log opened");
        Ok(Self {
            path,
            writer: tokio::sync::Mutex::new(LogWriter { file, torn }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Event>, EventError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(path = ?self.path, line = n + 1, error = %e, "Skipping malformed event record"),
            }
        }
        Ok(events)
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn ends_mid_record(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

async fn write_record(file: &mut File, record: &[u8]) -> std::io::Result<()> {
    file.write_all(record).await?;
    file.sync_data().await
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, event: &Event) -> Result<(), EventError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if writer.torn {
            line.insert(0, b'\n');
        }
        let len = writer.file.metadata().await?.len();

        if let Err(e) = write_record(&mut writer.file, &line).await {
            if let Err(rollback) = writer.file.set_len(len).await {
                tracing::error!(path = ?self.path, error = %rollback, "Failed to truncate partial event record");
                writer.torn = true;
            }
            return Err(e.into());
        }
        writer.torn = false;
        Ok(())
    }

    async fn read(&self, query: LogQuery<'_>) -> Result<Vec<Event>, EventError> {
        // Hold the writer lock so a read never sees a half-written line.
        let _writer = self.writer.lock().await;
        let events = self.load().await?;
        Ok(query.select(events.into_iter()))
    }

    async fn compact(&self, policy: &RetentionPolicy) -> Result<usize, EventError> {
        let mut writer = self.writer.lock().await;
        let events = self.load().await?;
        let before = events.len();
        let kept = policy.apply(events, Utc::now());
        let dropped = before - kept.len();
        if dropped == 0 {
            return Ok(0);
        }

        let mut buf = Vec::new();
        for event in &kept {
            serde_json::to_writer(&mut buf, event)?;
            buf.push(b'\n');
        }

        let tmp = self.path.with_extension("compact");
        let mut out = File::create(&tmp).await?;
        out.write_all(&buf).await?;
        out.sync_all().await?;
        drop(out);
        tokio::fs::rename(&tmp, &self.path).await?;

        *writer = LogWriter {
            file: open_append(&self.path).await?,
            torn: false,
        };
        tracing::info!(path = ?self.path, dropped, kept = kept.len(), "Event log compacted");
        Ok(dropped)
    }
}
