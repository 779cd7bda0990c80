//! Application-level configuration loading, including the competition rule knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CODE_ARENA_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Participants required before the creator may start.
    pub min_start_participants: usize,
    /// Upper bound accepted for `maxParticipants` on create.
    pub max_participants_cap: u32,
    /// Buffer size of each room's broadcast channel.
    pub room_capacity: usize,
    /// Bound on persisting a transition; `None` waits forever.
    pub transition_timeout: Option<Duration>,
    /// How long after the deadline the server ends a competition by itself.
    pub deadline_grace: Duration,
    /// Let the default scorer take `reportedScore` from the request. Demo only.
    pub trust_reported_scores: bool,
    /// End the competition as soon as every seated participant submitted.
    pub end_when_all_submitted: bool,
    /// Longest accepted chat message, in characters.
    pub max_chat_length: usize,
    /// Period of the server-side deadline sweep.
    pub sweep_interval: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        min_start_participants = app_config.min_start_participants,
                        end_when_all_submitted = app_config.end_when_all_submitted,
                        "loaded competition rules from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    min_start_participants: usize,
    max_participants_cap: u32,
    room_capacity: usize,
    /// `0` disables the timeout.
    transition_timeout_ms: u64,
    deadline_grace_secs: u64,
    trust_reported_scores: bool,
    end_when_all_submitted: bool,
    max_chat_length: usize,
    sweep_interval_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            min_start_participants: 1,
            max_participants_cap: 100,
            room_capacity: 64,
            transition_timeout_ms: 5_000,
            deadline_grace_secs: 30,
            trust_reported_scores: false,
            end_when_all_submitted: false,
            max_chat_length: 500,
            sweep_interval_secs: 5,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            min_start_participants: value.min_start_participants,
            max_participants_cap: value.max_participants_cap.max(2),
            room_capacity: value.room_capacity.max(1),
            transition_timeout: (value.transition_timeout_ms > 0)
                .then(|| Duration::from_millis(value.transition_timeout_ms)),
            deadline_grace: Duration::from_secs(value.deadline_grace_secs),
            trust_reported_scores: value.trust_reported_scores,
            end_when_all_submitted: value.end_when_all_submitted,
            max_chat_length: value.max_chat_length,
            sweep_interval: Duration::from_secs(value.sweep_interval_secs.max(1)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = AppConfig::from_json(r#"{"end_when_all_submitted": true}"#).unwrap();
        assert!(config.end_when_all_submitted);
        assert_eq!(config.min_start_participants, 1);
        assert_eq!(config.transition_timeout, Some(Duration::from_secs(5)));
        assert!(!config.trust_reported_scores);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = AppConfig::from_json(r#"{"transition_timeout_ms": 0}"#).unwrap();
        assert_eq!(config.transition_timeout, None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(AppConfig::from_json("{not json").is_err());
    }
}
