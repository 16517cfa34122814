// ABOUTME: Bounded, persisted log of clone and job events
// ABOUTME: In-memory ring buffer backed by an append-only JSON Lines file

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::utils::write_atomic;

/// Default number of entries kept in memory and on disk.
pub const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "success" => Ok(LogLevel::Success),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => bail!("Unknown log level '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: None,
            job_name: None,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn for_job(mut self, job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filter and page for `LogStore::query`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub job_id: Option<String>,
    pub level: Option<LogLevel>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl LogQuery {
    fn matches(&self, entry: &LogEntry) -> bool {
        self.job_id
            .as_deref()
            .map_or(true, |id| entry.job_id.as_deref() == Some(id))
            && self.level.map_or(true, |level| entry.level == level)
    }
}

/// One page of entries, newest first, plus the number of matches.
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<LogEntry>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub info: usize,
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total: usize,
    pub by_level: LevelCounts,
    pub by_job: BTreeMap<String, usize>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    lines_on_disk: usize,
}

/// Append-only log with a bounded retained window.
///
/// Every append goes to memory and to one line of `logs.jsonl`. When the
/// file holds twice the retention it is rewritten to the retained window.
pub struct LogStore {
    path: Option<PathBuf>,
    retention: usize,
    inner: Mutex<Inner>,
}

impl LogStore {
    /// Memory-only store, used when no data directory is configured.
    pub fn in_memory(retention: usize) -> Self {
        Self {
            path: None,
            retention: retention.max(1),
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                lines_on_disk: 0,
            }),
        }
    }

    /// Open the store at `path`, loading the newest `retention` entries.
    /// Malformed lines are skipped.
    pub async fn open(path: impl Into<PathBuf>, retention: usize) -> Result<Self> {
        let path = path.into();
        let retention = retention.max(1);
        let mut entries = VecDeque::new();
        let mut lines_on_disk = 0;

        if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read log file {:?}", path))?;
            for (n, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                lines_on_disk += 1;
                match serde_json::from_str::<LogEntry>(line) {
                    Ok(entry) => {
                        entries.push_back(entry);
                        if entries.len() > retention {
                            entries.pop_front();
                        }
                    }
                    Err(e) => tracing::warn!("Skipping malformed log line {} in {:?}: {}", n + 1, path, e),
                }
            }
            tracing::debug!("Loaded {} log entries from {:?}", entries.len(), path);
        }

        Ok(Self {
            path: Some(path),
            retention,
            inner: Mutex::new(Inner {
                entries,
                lines_on_disk,
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub async fn append(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.push_back(entry.clone());
        while inner.entries.len() > self.retention {
            inner.entries.pop_front();
        }

        let Some(path) = &self.path else {
            return Ok(());
        };

        if inner.lines_on_disk + 1 >= self.retention * 2 {
            self.rewrite(path, &inner.entries).await?;
            inner.lines_on_disk = inner.entries.len();
            tracing::debug!("Compacted {:?} to {} entries", path, inner.lines_on_disk);
            return Ok(());
        }

        let mut line = serde_json::to_string(&entry).context("Failed to serialize log entry")?;
        line.push('\n');
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to log file {:?}", path))?;
        inner.lines_on_disk += 1;
        Ok(())
    }

    /// Append, logging instead of returning persistence errors. Used on
    /// paths where a failing disk must not abort a clone.
    pub async fn record(&self, entry: LogEntry) {
        if let Err(e) = self.append(entry).await {
            tracing::error!("Failed to persist log entry: {:#}", e);
        }
    }

    /// Matching entries, newest first.
    pub async fn query(&self, query: &LogQuery) -> LogPage {
        let inner = self.inner.lock().await;
        let matching: Vec<&LogEntry> = inner
            .entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .collect();
        let total = matching.len();
        let logs = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        LogPage { logs, total }
    }

    pub async fn stats(&self) -> LogStats {
        let inner = self.inner.lock().await;
        let mut stats = LogStats {
            total: inner.entries.len(),
            ..LogStats::default()
        };
        for entry in &inner.entries {
            match entry.level {
                LogLevel::Info => stats.by_level.info += 1,
                LogLevel::Success => stats.by_level.success += 1,
                LogLevel::Warning => stats.by_level.warning += 1,
                LogLevel::Error => stats.by_level.error += 1,
            }
            if let Some(job_id) = &entry.job_id {
                *stats.by_job.entry(job_id.clone()).or_default() += 1;
            }
        }
        stats
    }

    /// Remove all entries, or only those of one job. Returns how many were
    /// removed.
    pub async fn clear(&self, job_id: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        match job_id {
            Some(id) => inner.entries.retain(|e| e.job_id.as_deref() != Some(id)),
            None => inner.entries.clear(),
        }
        let removed = before - inner.entries.len();

        if let Some(path) = &self.path {
            self.rewrite(path, &inner.entries).await?;
            inner.lines_on_disk = inner.entries.len();
        }
        Ok(removed)
    }

    async fn rewrite(&self, path: &Path, entries: &VecDeque<LogEntry>) -> Result<()> {
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&serde_json::to_string(entry).context("Failed to serialize log entry")?);
            contents.push('\n');
        }
        write_atomic(path, contents.into_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(level: LogLevel, job: Option<&str>, message: &str) -> LogEntry {
        let entry = LogEntry::new(level, message);
        match job {
            Some(id) => entry.for_job(id, format!("job {}", id)),
            None => entry,
        }
    }

    #[tokio::test]
    async fn test_query_newest_first_with_filters() {
        let store = LogStore::in_memory(100);
        store.append(entry(LogLevel::Info, Some("a"), "one")).await.unwrap();
        store.append(entry(LogLevel::Error, Some("b"), "two")).await.unwrap();
        store.append(entry(LogLevel::Info, Some("a"), "three")).await.unwrap();

        let page = store.query(&LogQuery::default()).await;
        let messages: Vec<_> = page.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "two", "one"]);

        let page = store
            .query(&LogQuery {
                job_id: Some("a".into()),
                limit: Some(1),
                offset: 1,
                ..LogQuery::default()
            })
            .await;
        assert_eq!(page.total, 2);
        assert_eq!(page.logs[0].message, "one");

        let page = store
            .query(&LogQuery {
                level: Some(LogLevel::Error),
                ..LogQuery::default()
            })
            .await;
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_retention_bounds_memory() {
        let store = LogStore::in_memory(3);
        for i in 0..5 {
            store
                .append(entry(LogLevel::Info, None, &i.to_string()))
                .await
                .unwrap();
        }
        let page = store.query(&LogQuery::default()).await;
        let messages: Vec<_> = page.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn test_persist_reload_and_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.jsonl");

        let store = LogStore::open(&path, 3).await.unwrap();
        for i in 0..7 {
            store
                .append(entry(LogLevel::Success, Some("j"), &i.to_string()))
                .await
                .unwrap();
        }
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert!(lines < 6, "file should be compacted, has {} lines", lines);

        let reopened = LogStore::open(&path, 3).await.unwrap();
        let page = reopened.query(&LogQuery::default()).await;
        let messages: Vec<_> = page.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["6", "5", "4"]);
    }

    #[tokio::test]
    async fn test_clear_by_job_and_stats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.jsonl");
        let store = LogStore::open(&path, 100).await.unwrap();
        store.append(entry(LogLevel::Info, Some("a"), "x")).await.unwrap();
        store.append(entry(LogLevel::Warning, Some("b"), "y")).await.unwrap();
        store.append(entry(LogLevel::Error, None, "z")).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_level.warning, 1);
        assert_eq!(stats.by_job.get("a"), Some(&1));

        assert_eq!(store.clear(Some("a")).await.unwrap(), 1);
        let reopened = LogStore::open(&path, 100).await.unwrap();
        assert_eq!(reopened.stats().await.total, 2);

        assert_eq!(store.clear(None).await.unwrap(), 2);
        assert_eq!(store.stats().await.total, 0);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let json = serde_json::to_value(entry(LogLevel::Info, Some("id1"), "m")).unwrap();
        assert_eq!(json["jobId"], "id1");
        assert_eq!(json["jobName"], "job id1");
        assert_eq!(json["level"], "info");
        assert!(json.get("metadata").is_none());
    }
}
