//! Configuration management for Playengine
//!
//! Settings come from, lowest precedence first: built-in defaults,
//! `/etc/playengine/playengine.toml`, `~/.playengine.toml`,
//! `./playengine.toml`, then an explicit file or `PLAYENGINE_CONFIG`, then
//! `PLAYENGINE_*` environment variables. Files may be TOML, YAML or JSON.
//! Keys present in a later file replace earlier values; absent keys keep
//! them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::executor::{GatheringPolicy, QueueConfig};

/// Environment variable naming an extra configuration file.
pub const CONFIG_ENV: &str = "PLAYENGINE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub logging: LoggingConfig,
}

/// Run defaults, overridable from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Number of parallel workers
    pub forks: usize,
    pub gathering: GatheringPolicy,
    /// Connection type used when neither host nor task sets one
    pub transport: String,
    pub remote_user: Option<String>,
    pub port: Option<u16>,
    /// Per-task time limit; zero disables it
    #[serde(with = "humantime_serde")]
    pub task_timeout: Duration,
    /// Default inventory file
    pub inventory: Option<PathBuf>,
    /// Directories searched for module files
    pub module_paths: Vec<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            forks: 5,
            gathering: GatheringPolicy::Implicit,
            transport: "smart".to_string(),
            remote_user: None,
            port: None,
            task_timeout: Duration::from_secs(300),
            inventory: None,
            module_paths: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default()).context("Failed to encode default config")?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                debug!(path = %path.display(), "Loading config file");
                merge_json(&mut merged, Self::read_file(&path)?);
            } else if config_path == Some(path.as_path()) {
                bail!("Config file not found: {}", path.display());
            }
        }

        let mut config: Config = serde_json::from_value(merged).context("Invalid configuration")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load a single file over the defaults, ignoring the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default()).context("Failed to encode default config")?;
        merge_json(&mut merged, Self::read_file(path.as_ref())?);
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Files to read, lowest precedence first.
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/playengine/playengine.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".playengine.toml"));
        }
        paths.push(PathBuf::from("playengine.toml"));

        match explicit_path {
            Some(path) => paths.push(path.to_path_buf()),
            None => {
                if let Ok(env_config) = std::env::var(CONFIG_ENV) {
                    paths.push(PathBuf::from(env_config));
                }
            }
        }
        paths
    }

    /// Parse a file into a JSON tree, choosing the format by extension.
    fn read_file(path: &Path) -> Result<JsonValue> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value: JsonValue = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(value)
    }

    /// Apply `PLAYENGINE_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(forks) = std::env::var("PLAYENGINE_FORKS") {
            self.defaults.forks = forks
                .trim()
                .parse()
                .with_context(|| format!("PLAYENGINE_FORKS is not a number: {}", forks))?;
        }
        if let Ok(timeout) = std::env::var("PLAYENGINE_TIMEOUT") {
            self.defaults.task_timeout = parse_timeout(&timeout)?;
        }
        if let Ok(gathering) = std::env::var("PLAYENGINE_GATHERING") {
            self.defaults.gathering = gathering.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(transport) = std::env::var("PLAYENGINE_TRANSPORT") {
            self.defaults.transport = transport;
        }
        if let Ok(user) = std::env::var("PLAYENGINE_REMOTE_USER") {
            self.defaults.remote_user = Some(user);
        }
        if let Ok(paths) = std::env::var("PLAYENGINE_MODULE_PATH") {
            self.defaults.module_paths = std::env::split_paths(&paths).collect();
        }
        Ok(())
    }

    /// Worker pool settings for the task queue manager.
    pub fn queue_config(&self) -> QueueConfig {
        let timeout = self.defaults.task_timeout;
        QueueConfig::default()
            .with_forks(self.defaults.forks)
            .with_task_timeout((!timeout.is_zero()).then_some(timeout))
            .with_gathering(self.defaults.gathering)
    }

    /// The connection to force on every play, if any.
    pub fn forced_transport(&self) -> Option<String> {
        match self.defaults.transport.as_str() {
            "" | "smart" => None,
            other => Some(other.to_string()),
        }
    }
}

/// Seconds, or a duration such as `5m`.
fn parse_timeout(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime_serde::re::humantime::parse_duration(value)
        .with_context(|| format!("Invalid timeout: {}", value))
}

/// Overlay `src` onto `dst`, recursing into objects.
fn merge_json(dst: &mut JsonValue, src: JsonValue) {
    match (dst, src) {
        (JsonValue::Object(dst), JsonValue::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}
