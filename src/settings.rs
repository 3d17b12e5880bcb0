use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Documents per bulk insert.
pub const DB_WRITE_THRESHOLD: usize = 100;

/// Overrides `database_path` when set.
pub const DB_PATH_ENV: &str = "SAILTRACK_DB";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub write_threshold: usize,
    pub max_concurrent_flushes: usize,
    pub flush_timeout_secs: u64,
    pub flush_retries: u32,
    pub retry_backoff_ms: u64,
    /// Minimum gap between two fused rows, anchored on position readings.
    pub min_emit_interval_ms: u64,
    pub cursor_page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sailtrack.sqlite3"),
            write_threshold: DB_WRITE_THRESHOLD,
            max_concurrent_flushes: 4,
            flush_timeout_secs: 30,
            flush_retries: 2,
            retry_backoff_ms: 250,
            min_emit_interval_ms: 1000,
            cursor_page_size: 500,
        }
    }
}

impl Settings {
    /// Reads settings from `path` (if given), then applies the environment override.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings from {}", path.display()))?;
                Self::from_json(&contents)
                    .with_context(|| format!("Failed to parse settings in {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            if !db_path.is_empty() {
                settings.database_path = PathBuf::from(db_path);
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_threshold == 0 {
            bail!("write_threshold must be at least 1");
        }
        if self.max_concurrent_flushes == 0 {
            bail!("max_concurrent_flushes must be at least 1");
        }
        if self.cursor_page_size == 0 {
            bail!("cursor_page_size must be at least 1");
        }
        self.min_emit_interval()?;
        Ok(())
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn min_emit_interval(&self) -> Result<chrono::Duration> {
        i64::try_from(self.min_emit_interval_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .with_context(|| {
                format!(
                    "min_emit_interval_ms of {} is out of range",
                    self.min_emit_interval_ms
                )
            })
    }
}
