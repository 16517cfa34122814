// ABOUTME: Application configuration loaded from TOML with CLI/env overrides
// ABOUTME: Resolves the data directory holding jobs.json and logs.jsonl

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logs::DEFAULT_RETENTION;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const JOBS_FILE_NAME: &str = "jobs.json";
pub const LOGS_FILE_NAME: &str = "logs.jsonl";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Runtime settings. Every key is optional in the TOML file.
///
/// ```toml
/// data_dir = "/var/lib/database-cloner"
/// listen_addr = "0.0.0.0:5000"
/// connect_timeout_secs = 30
/// log_retention = 1000
/// history_limit = 50
/// max_failed_rows = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub connect_timeout_secs: u64,
    pub log_retention: usize,
    pub history_limit: usize,
    /// Unset: row failures never fail a run.
    pub max_failed_rows: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            connect_timeout_secs: 30,
            log_retention: DEFAULT_RETENTION,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_failed_rows: None,
        }
    }
}

/// `~/.database-cloner`, or a relative directory when no home is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".database-cloner"))
        .unwrap_or_else(|| PathBuf::from(".database-cloner"))
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub listen_addr: Option<String>,
    pub max_failed_rows: Option<u64>,
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `<data_dir>/config.toml`
    /// is read if present, otherwise defaults are used. Overrides win over
    /// the file.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let implicit;
        let path = match path {
            Some(p) => Some(p),
            None => {
                let dir = overrides.data_dir.clone().unwrap_or_else(default_data_dir);
                implicit = dir.join(CONFIG_FILE_NAME);
                implicit.exists().then_some(implicit.as_path())
            }
        };

        let mut config = match path {
            Some(p) => {
                let contents = fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {:?}", p))?;
                tracing::debug!("Loaded configuration from {:?}", p);
                Self::from_toml_str(&contents)
                    .with_context(|| format!("Invalid config file {:?}", p))?
            }
            None => Self::default(),
        };

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(addr) = overrides.listen_addr {
            self.listen_addr = addr;
        }
        if overrides.max_failed_rows.is_some() {
            self.max_failed_rows = overrides.max_failed_rows;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_retention == 0 {
            bail!("log_retention must be at least 1");
        }
        if self.history_limit == 0 {
            bail!("history_limit must be at least 1");
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.data_dir.join(JOBS_FILE_NAME)
    }

    pub fn logs_path(&self) -> PathBuf {
        self.data_dir.join(LOGS_FILE_NAME)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
