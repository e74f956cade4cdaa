//! Settings for the grant controller
//!
//! Settings are optional: every field has a default, and a missing settings
//! file simply yields [`Settings::default`].

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable pointing directly at a settings file
pub const CONFIG_PATH_ENV: &str = "GRANTFLOW_CONFIG_PATH";

/// Largest page KMS ListGrants accepts
pub const MAX_PAGE_SIZE: u32 = 100;

const SETTINGS_FILE: &str = "grantflow.yaml";
const PROJECT_DIR: &str = ".grantflow";

/// Controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retry: RetrySettings,

    /// Listing page size
    pub page_size: u32,

    /// Principals without this prefix are never written over recorded ones
    pub canonical_principal_prefix: String,

    pub aws: AwsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            page_size: 100,
            canonical_principal_prefix: "arn:aws".to_string(),
            aws: AwsSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "page_size",
                message: format!("{} is outside 1..={}", self.page_size, MAX_PAGE_SIZE),
            });
        }
        if self.retry.deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.deadline_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                message: format!("{} is below 1.0", self.retry.multiplier),
            });
        }
        Ok(())
    }
}

/// Wait strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Wall-clock budget of one retried operation
    pub deadline_secs: u64,
    pub backoff: BackoffKind,
    /// Fixed interval, or the first exponential delay
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            deadline_secs: 180,
            backoff: BackoffKind::Exponential,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Global config directory (`~/.config/grantflow`)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("grantflow"))
}

/// Locate the settings file
///
/// Search order:
/// 1. `GRANTFLOW_CONFIG_PATH`
/// 2. `./grantflow.yaml`
/// 3. `./.grantflow/grantflow.yaml`
/// 4. `~/.config/grantflow/config.yaml`
pub fn find_settings_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let current_dir = std::env::current_dir()?;
    for path in [
        current_dir.join(SETTINGS_FILE),
        current_dir.join(PROJECT_DIR).join(SETTINGS_FILE),
    ] {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("grantflow").join("config.yaml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// Load settings from the discovered file, or defaults when there is none
pub fn load_settings() -> Result<Settings> {
    match find_settings_file()? {
        Some(path) => load_settings_from(&path),
        None => Ok(Settings::default()),
    }
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.validate()?;
    Ok(settings)
}
