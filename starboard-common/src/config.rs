//! Configuration loading and path resolution
//!
//! Settings come from a TOML file; individual values can be overridden from the
//! command line or the environment. Resolution order for every overridable value:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "STARBOARD_CONFIG";
/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "STARBOARD_DB";
/// Environment variable holding the Discord bot token
pub const TOKEN_ENV_VAR: &str = "DISCORD_TOKEN";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file
    pub database_path: Option<PathBuf>,
    /// HTTP listen address for the trigger surface
    pub listen: Option<String>,
    pub logging: LoggingConfig,
    pub discord: DiscordConfig,
    pub defaults: MirrorDefaults,
    pub recovery: RecoveryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when RUST_LOG is unset (e.g. "info", "debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Discord connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: Option<String>,
    /// REST base URL; only changed for testing against a proxy
    pub api_base: Option<String>,
    /// The bot's own user id; its reactions never count
    pub self_user_id: Option<u64>,
}

/// Per-guild defaults used when a guild has no explicit setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorDefaults {
    pub signal_kind: String,
    pub threshold: u32,
}

impl Default for MirrorDefaults {
    fn default() -> Self {
        Self {
            signal_kind: "⭐".to_string(),
            threshold: 3,
        }
    }
}

/// Throttling and progress settings for bulk recovery jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pause after each successful throttled call
    pub call_delay_ms: u64,
    /// Total attempts for a transiently failing call
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Interval between job progress notifications
    pub progress_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            call_delay_ms: 600,
            max_attempts: 4,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            progress_interval_secs: 30,
        }
    }
}

impl RecoveryConfig {
    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("recovery.max_attempts must be at least 1".to_string()));
        }
        if self.progress_interval_secs == 0 {
            return Err(Error::Config(
                "recovery.progress_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        if config.defaults.threshold == 0 {
            return Err(Error::Config("defaults.threshold must be positive".to_string()));
        }
        config.recovery.validate()?;
        Ok(config)
    }

    /// Resolve the Discord token: environment first, then TOML
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.discord.token.clone().filter(|t| !t.trim().is_empty()))
    }
}

/// Load configuration from an explicit path, `STARBOARD_CONFIG`, or the platform config dir.
///
/// A missing file at the platform location is not an error: defaults are returned.
/// A missing file that was named explicitly is.
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!("Config file not found: {:?}", path)));
            }
            path
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("No config file found, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {:?} failed: {}", path, e)))?;
    tracing::info!("Loaded configuration from {}", path.display());
    TomlConfig::from_toml_str(&content)
}

/// Database path following the CLI → ENV → TOML → default order
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_data_dir().join("starboard.db")
}

/// ~/.config/starboard/config.toml (or the platform equivalent)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("starboard").join("config.toml"))
}

/// OS-dependent data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("starboard"))
        .unwrap_or_else(|| PathBuf::from("./starboard_data"))
}
