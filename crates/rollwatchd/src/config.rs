//! rollwatchd.toml configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Filter used when neither `RUST_LOG` nor `log_filter` is set.
pub const DEFAULT_LOG_FILTER: &str = "info,rollwatchd=debug,rollwatch=debug";

/// Name of the state database inside `data_dir`.
const DB_FILE: &str = "rollwatch.redb";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub pending_interval_secs: u64,
    pub in_progress_interval_secs: u64,
    /// Capacity of the monitor → dispatcher channel.
    pub event_buffer: usize,
    pub max_concurrent_reconciles: usize,
    pub log_filter: Option<String>,
    pub json_logs: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/rollwatch"),
            pending_interval_secs: 10,
            in_progress_interval_secs: 10,
            event_buffer: 64,
            max_concurrent_reconciles: 8,
            log_filter: None,
            json_logs: false,
        }
    }
}

/// Values given on the command line. Each set field wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub pending_interval_secs: Option<u64>,
    pub in_progress_interval_secs: Option<u64>,
    pub json_logs: bool,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the file if one is given, apply CLI overrides, then validate.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(secs) = overrides.pending_interval_secs {
            self.pending_interval_secs = secs;
        }
        if let Some(secs) = overrides.in_progress_interval_secs {
            self.in_progress_interval_secs = secs;
        }
        if overrides.json_logs {
            self.json_logs = true;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pending_interval_secs == 0 {
            bail!("pending_interval_secs must be greater than zero");
        }
        if self.in_progress_interval_secs == 0 {
            bail!("in_progress_interval_secs must be greater than zero");
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be greater than zero");
        }
        if self.max_concurrent_reconciles == 0 {
            bail!("max_concurrent_reconciles must be greater than zero");
        }
        Ok(())
    }

    pub fn pending_interval(&self) -> Duration {
        Duration::from_secs(self.pending_interval_secs)
    }

    pub fn in_progress_interval(&self) -> Duration {
        Duration::from_secs(self.in_progress_interval_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
