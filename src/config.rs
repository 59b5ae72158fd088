use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobsConfig {
    #[serde(default = "default_blob_root")]
    pub root: PathBuf,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            root: default_blob_root(),
        }
    }
}

fn default_blob_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    #[serde(default = "default_day_secs")]
    pub progress_ttl_secs: u64,
    #[serde(default = "default_day_secs")]
    pub export_retention_secs: u64,
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            progress_ttl_secs: default_day_secs(),
            export_retention_secs: default_day_secs(),
            unit_timeout_secs: default_unit_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_day_secs() -> u64 {
    24 * 60 * 60
}
fn default_unit_timeout_secs() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl TasksConfig {
    pub fn progress_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_ttl_secs)
    }

    pub fn export_retention(&self) -> Duration {
        Duration::from_secs(self.export_retention_secs)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let tasks = &config.tasks;
    for (name, value) in [
        ("tasks.progress_ttl_secs", tasks.progress_ttl_secs),
        ("tasks.export_retention_secs", tasks.export_retention_secs),
        ("tasks.unit_timeout_secs", tasks.unit_timeout_secs),
        ("tasks.poll_interval_ms", tasks.poll_interval_ms),
    ] {
        if value == 0 {
            anyhow::bail!("{} must be > 0", name);
        }
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    Ok(())
}
