//! TOML-based configuration.
//!
//! Holds the engine tunables:
//! - Verification window lengths
//! - Reward rates and the start-timeout penalty
//! - Keyword matching strictness
//! - Event channel capacity
//!
//! Stored at `~/.config/taskgate/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::machine::EngineConfig;
use crate::reward::{
    RewardPolicy, DEFAULT_GOLD_PER_MINUTE, DEFAULT_STANDING_GOLD_PER_MINUTE, DEFAULT_START_TIMEOUT_PENALTY_PCT,
};

/// Verification window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSection {
    #[serde(default = "default_start_window_secs")]
    pub start_window_secs: u32,
    #[serde(default = "default_min_finish_window_secs")]
    pub min_finish_window_secs: u32,
}

/// Reward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSection {
    #[serde(default = "default_gold_per_minute")]
    pub gold_per_minute: u32,
    #[serde(default = "default_standing_gold_per_minute")]
    pub standing_gold_per_minute: u32,
    #[serde(default = "default_start_timeout_penalty_pct")]
    pub start_timeout_penalty_pct: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordsSection {
    /// Required keywords that must match for evidence to pass.
    #[serde(default = "default_min_matches")]
    pub min_matches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: u32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/taskgate/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub reward: RewardSection,
    #[serde(default)]
    pub keywords: KeywordsSection,
    #[serde(default)]
    pub events: EventsSection,
}

// Default functions
fn default_start_window_secs() -> u32 {
    120
}
fn default_min_finish_window_secs() -> u32 {
    60
}
fn default_gold_per_minute() -> u32 {
    DEFAULT_GOLD_PER_MINUTE
}
fn default_standing_gold_per_minute() -> u32 {
    DEFAULT_STANDING_GOLD_PER_MINUTE
}
fn default_start_timeout_penalty_pct() -> u8 {
    DEFAULT_START_TIMEOUT_PENALTY_PCT
}
fn default_min_matches() -> u32 {
    1
}
fn default_channel_capacity() -> u32 {
    256
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            start_window_secs: default_start_window_secs(),
            min_finish_window_secs: default_min_finish_window_secs(),
        }
    }
}

impl Default for RewardSection {
    fn default() -> Self {
        Self {
            gold_per_minute: default_gold_per_minute(),
            standing_gold_per_minute: default_standing_gold_per_minute(),
            start_timeout_penalty_pct: default_start_timeout_penalty_pct(),
        }
    }
}

impl Default for KeywordsSection {
    fn default() -> Self {
        Self {
            min_matches: default_min_matches(),
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Returns `~/.config/taskgate[-dev]/` based on TASKGATE_ENV.
///
/// Set TASKGATE_ENV=dev to use the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("TASKGATE_ENV").unwrap_or_else(|_| "production".to_string());
    let dir = if env == "dev" {
        base_dir.join("taskgate-dev")
    } else {
        base_dir.join("taskgate")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}

impl Config {
    fn get_json_value_by_path<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(root: &mut serde_json::Value, key: &str, value: &str) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        if key.is_empty() {
            return Err(unknown());
        }

        let mut parts = key.split('.').peekable();
        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => {
                    serde_json::Value::Bool(value.parse::<bool>().map_err(|e| invalid(e.to_string()))?)
                }
                serde_json::Value::Number(_) => {
                    let n = value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as a non-negative integer")))?;
                    serde_json::Value::Number(n.into())
                }
                // Whole sections cannot be replaced from a single value.
                serde_json::Value::Object(_) => return Err(unknown()),
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Parse a config file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Write the config as pretty TOML.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from the data directory, writing the defaults on first use.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// defaults cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            return Self::load_from(&path);
        }
        let cfg = Self::default();
        cfg.save_to(&path)?;
        Ok(cfg)
    }

    /// Persist to the data directory.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        match Self::get_json_value_by_path(&json, key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key, keeping the field's type.
    ///
    /// Only updates memory; call [`Config::save`] to persist.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the value does not parse
    /// as the field's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    pub fn reward_policy(&self) -> RewardPolicy {
        RewardPolicy {
            gold_per_minute: self.reward.gold_per_minute,
            standing_gold_per_minute: self.reward.standing_gold_per_minute,
            start_timeout_penalty_pct: self.reward.start_timeout_penalty_pct.min(100),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            start_window: chrono::Duration::seconds(i64::from(self.verification.start_window_secs)),
            min_finish_window: chrono::Duration::seconds(i64::from(self.verification.min_finish_window_secs)),
            reward: self.reward_policy(),
            keyword_min_matches: self.keywords.min_matches as usize,
            event_capacity: self.events.channel_capacity as usize,
        }
    }
}
