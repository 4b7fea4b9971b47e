use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{hlog_debug, Error, Result};

fn default_max_parallel() -> usize {
    3
}

fn default_dispatch_cooldown_ms() -> u64 {
    2_000
}

fn default_turn_depth_limit() -> usize {
    25
}

fn default_repeat_call_window() -> usize {
    8
}

fn default_report_cooldown_secs() -> u64 {
    60
}

fn default_escalation_cooldown_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of workers executing turns at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Minimum gap between two dispatch decisions.
    #[serde(default = "default_dispatch_cooldown_ms")]
    pub dispatch_cooldown_ms: u64,
    /// Chained tool invocations allowed inside one worker turn.
    #[serde(default = "default_turn_depth_limit")]
    pub turn_depth_limit: usize,
    /// Size of the ring buffer used for repeated-call detection.
    #[serde(default = "default_repeat_call_window")]
    pub repeat_call_window: usize,
    /// Minimum gap between two progress reports.
    #[serde(default = "default_report_cooldown_secs")]
    pub report_cooldown_secs: u64,
    /// Minimum gap between two backlog-drained escalations.
    #[serde(default = "default_escalation_cooldown_secs")]
    pub escalation_cooldown_secs: u64,
    /// Override for the durable state directory.
    pub state_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            dispatch_cooldown_ms: default_dispatch_cooldown_ms(),
            turn_depth_limit: default_turn_depth_limit(),
            repeat_call_window: default_repeat_call_window(),
            report_cooldown_secs: default_report_cooldown_secs(),
            escalation_cooldown_secs: default_escalation_cooldown_secs(),
            state_dir: None,
        }
    }
}

impl Config {
    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    /// Directory holding the task-state and ownership snapshots.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Self::hive_dir(),
        }
    }

    pub fn dispatch_cooldown(&self) -> Duration {
        Duration::from_millis(self.dispatch_cooldown_ms)
    }

    pub fn report_cooldown(&self) -> Duration {
        Duration::from_secs(self.report_cooldown_secs)
    }

    pub fn escalation_cooldown(&self) -> Duration {
        Duration::from_secs(self.escalation_cooldown_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        hlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            hlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        hlog_debug!(
            "Config loaded: max_parallel={}, cooldown={}ms",
            config.max_parallel,
            config.dispatch_cooldown_ms
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        if !hive_dir.exists() {
            fs::create_dir_all(&hive_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        hlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        let state_dir = self.state_dir()?;
        if !hive_dir.exists() {
            fs::create_dir_all(&hive_dir)?;
        }
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
