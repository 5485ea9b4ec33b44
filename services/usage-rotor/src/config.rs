//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from the ADMIN_TOKEN env var or token_file and
//! never stored in the TOML directly.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_profiles::{DEFAULT_ACTIVE_SESSION_FILE, DEFAULT_PROFILES_FILE, FULL_PERCENTAGE};
use common::Secret;
use profile_rotation::{AutoStartConfig, RotationConfig};
use serde::Deserialize;

/// Env var carrying the admin API bearer token.
pub const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Absent: push-only, usage arrives through the admin API
    #[serde(default)]
    pub usage: Option<UsageConfig>,
    #[serde(default)]
    pub rotation: RotationSection,
    #[serde(default)]
    pub auto_start: AutoStartSection,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Where profiles and the active session live on disk
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_profiles_path")]
    pub profiles_path: PathBuf,
    #[serde(default = "default_active_credentials_path")]
    pub active_credentials_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            profiles_path: default_profiles_path(),
            active_credentials_path: default_active_credentials_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
        }
    }
}

/// Usage adapter endpoint
#[derive(Debug, Deserialize)]
pub struct UsageConfig {
    pub endpoint: String,
    #[serde(default = "default_usage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RotationSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_session_threshold")]
    pub session_threshold: f64,
    #[serde(default = "default_weekly_exhaustion_point")]
    pub weekly_exhaustion_point: f64,
    #[serde(default = "default_rotation_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_hysteresis_multiplier")]
    pub hysteresis_multiplier: f64,
}

impl Default for RotationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            session_threshold: default_session_threshold(),
            weekly_exhaustion_point: default_weekly_exhaustion_point(),
            cooldown_secs: default_rotation_cooldown(),
            hysteresis_multiplier: default_hysteresis_multiplier(),
        }
    }
}

impl RotationSection {
    pub fn to_rotation_config(&self) -> RotationConfig {
        RotationConfig {
            session_threshold: self.session_threshold,
            weekly_exhaustion_point: self.weekly_exhaustion_point,
            cooldown: Duration::from_secs(self.cooldown_secs),
            hysteresis_multiplier: self.hysteresis_multiplier,
        }
    }
}

/// Session priming command
#[derive(Debug, Deserialize)]
pub struct AutoStartSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_prime_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_prime_timeout")]
    pub timeout_secs: u64,
}

impl Default for AutoStartSection {
    fn default() -> Self {
        Self {
            enabled: false,
            command: String::new(),
            args: Vec::new(),
            cooldown_secs: default_prime_cooldown(),
            timeout_secs: default_prime_timeout(),
        }
    }
}

impl AutoStartSection {
    pub fn to_auto_start_config(&self) -> AutoStartConfig {
        AutoStartConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// Admin API listener
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub listen_addr: SocketAddr,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the admin token (alternative to ADMIN_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_addr(),
            token: None,
            token_file: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_profiles_path() -> PathBuf {
    PathBuf::from(DEFAULT_PROFILES_FILE)
}

fn default_active_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_ACTIVE_SESSION_FILE)
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_usage_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_session_threshold() -> f64 {
    90.0
}

fn default_weekly_exhaustion_point() -> f64 {
    99.0
}

fn default_rotation_cooldown() -> u64 {
    30 * 60
}

fn default_hysteresis_multiplier() -> f64 {
    1.5
}

fn default_prime_cooldown() -> u64 {
    10 * 60
}

fn default_prime_timeout() -> u64 {
    120
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9477))
}

fn default_max_connections() -> usize {
    64
}

/// Serializes tests that read or mutate environment variables.
#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn validate_percentage(field: &'static str, value: f64) -> common::Result<()> {
    if !value.is_finite() || value <= 0.0 || value > FULL_PERCENTAGE {
        return Err(common::Error::invalid(
            field,
            format!("must be within (0, 100], got {value}"),
        ));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay
    /// environment variables.
    ///
    /// Admin token resolution order:
    /// 1. ADMIN_TOKEN env var, if set and not blank
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        let env_token = std::env::var(ADMIN_TOKEN_ENV)
            .ok()
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty());
        if let Some(token) = env_token {
            config.admin.token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.admin.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.admin.token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if let Some(ref usage) = self.usage {
            if !usage.endpoint.starts_with("http://") && !usage.endpoint.starts_with("https://") {
                return Err(common::Error::invalid(
                    "usage.endpoint",
                    format!("must start with http:// or https://, got: {}", usage.endpoint),
                ));
            }
            if usage.timeout_secs == 0 {
                return Err(common::Error::invalid("usage.timeout_secs", "must be greater than 0"));
            }
        }
        if self.refresh.interval_secs == 0 {
            return Err(common::Error::invalid("refresh.interval_secs", "must be greater than 0"));
        }

        validate_percentage("rotation.session_threshold", self.rotation.session_threshold)?;
        validate_percentage(
            "rotation.weekly_exhaustion_point",
            self.rotation.weekly_exhaustion_point,
        )?;
        if !self.rotation.hysteresis_multiplier.is_finite()
            || self.rotation.hysteresis_multiplier < 1.0
        {
            return Err(common::Error::invalid(
                "rotation.hysteresis_multiplier",
                format!("must be at least 1.0, got {}", self.rotation.hysteresis_multiplier),
            ));
        }

        if self.auto_start.enabled && self.auto_start.command.trim().is_empty() {
            return Err(common::Error::invalid(
                "auto_start.command",
                "required when auto_start is enabled",
            ));
        }
        if self.auto_start.timeout_secs == 0 {
            return Err(common::Error::invalid("auto_start.timeout_secs", "must be greater than 0"));
        }

        if self.admin.max_connections == 0 {
            return Err(common::Error::invalid("admin.max_connections", "must be greater than 0"));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("claude-usage-rotor.toml")
    }
}
