use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{core::engine::ErrorPolicy, error::Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

const DATABASE_FILE_NAME: &str = "runeforge.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub on_projector_error: ErrorPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            data_dir: default_data_dir(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            on_projector_error: ErrorPolicy::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub data_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub on_projector_error: Option<ErrorPolicy>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = env::current_dir()?;
    path.push(".runeforge");
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    } else {
        default_config_path()?
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        cfg.ensure_data_dir()?;
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.ensure_data_dir()?;
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_update(&mut self, update: ConfigUpdate) {
        if let Some(dir) = update.data_dir {
            self.data_dir = dir;
        }
        if let Some(poll_interval_ms) = update.poll_interval_ms {
            self.poll_interval_ms = poll_interval_ms;
        }
        if let Some(policy) = update.on_projector_error {
            self.on_projector_error = policy;
        }
        self.updated_at = Utc::now();
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_data_dir() -> PathBuf {
    let Ok(current_dir) = env::current_dir() else {
        return PathBuf::from(".runeforge");
    };
    current_dir.join(".runeforge")
}
