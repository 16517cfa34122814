// ABOUTME: Persistent registry of job definitions
// ABOUTME: Whole-file JSON array, replaced atomically on every save

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::job::Job;
use crate::utils::write_atomic;

/// Single writer of `jobs.json`. Saves are serialized so concurrent updates
/// never interleave.
pub struct JobStore {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// Store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the persisted jobs. A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<Job>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read jobs file {:?}", path))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let jobs: Vec<Job> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse jobs file {:?}", path))?;
        tracing::debug!("Loaded {} jobs from {:?}", jobs.len(), path);
        Ok(jobs)
    }

    /// Replace the persisted job list.
    pub async fn save(&self, jobs: &[Job]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let contents = serde_json::to_vec_pretty(jobs).context("Failed to serialize jobs")?;
        write_atomic(path, contents)
            .await
            .with_context(|| format!("Failed to write jobs file {:?}", path))
    }
}
