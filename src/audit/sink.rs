//! Audit sinks - where loop summaries go.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::summary::LoopSummary;
use crate::error::Result;

/// Destination for loop summaries.
///
/// Implementations must tolerate concurrent calls from independent loops. No
/// ordering is guaranteed across loop ids.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one summary.
    async fn record(&self, summary: &LoopSummary) -> Result<()>;

    /// Short name used in log messages.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Discards every summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _summary: &LoopSummary) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Writes each summary to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, summary: &LoopSummary) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        log::info!("audit: {}", json);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps summaries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    summaries: Mutex<Vec<LoopSummary>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<LoopSummary> {
        self.summaries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.summaries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, summary: &LoopSummary) -> Result<()> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(summary.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Appends one JSON line per summary to a file.
///
/// Writes go through `tokio::fs` and are serialized by an async lock, so a
/// slow disk parks the emitting task instead of a runtime worker.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    /// Create a sink writing to `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every summary in the file.
    pub fn read_all(&self) -> Result<Vec<LoopSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut summaries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                summaries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(summaries)
    }

    async fn append(&self, mut line: String) -> Result<()> {
        line.push('\n');
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, summary: &LoopSummary) -> Result<()> {
        let line = serde_json::to_string(summary)?;
        self.append(line).await
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
