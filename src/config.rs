//! Runtime configuration.
//!
//! Built-in defaults, optionally overlaid by a JSON file (camelCase keys, every key
//! optional), then by command-line flags. Durations in the file are whole seconds.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::api::ApiRoutes;
use crate::game::StepDelay;
use crate::network_client::RetryPolicy;
use crate::pipeline::PipelineSettings;
use crate::scheduler::ScheduleTiming;

pub const DEFAULT_BASE_URL: &str = "https://tonclayton.fun";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Could not read config file: {}", e),
            ConfigError::Json(e) => write!(f, "Config file is not valid JSON: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

/// `{"fixed": 10}` or `{"range": [3, 7]}`, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepDelaySetting {
    Fixed(u64),
    Range([u64; 2]),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotConfig {
    pub base_url: String,
    pub referer_path: String,
    pub route_id: Option<String>,
    pub task_id_in_path: bool,
    pub base_interval: u64,
    pub jitter_bound: u64,
    pub inter_account_delay: u64,
    pub tile_sequence: Vec<u32>,
    pub multiplier: u32,
    pub step_delay: StepDelaySetting,
    pub excluded_task_ids: Vec<i64>,
    pub max_attempts: u32,
    pub server_error_backoff: u64,
    pub rate_limit_backoff: u64,
    pub max_rate_limit_waits: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            referer_path: "/games/game-512".to_string(),
            route_id: None,
            task_id_in_path: false,
            base_interval: 6 * 60 * 60,
            jitter_bound: 30 * 60,
            inter_account_delay: 20,
            tile_sequence: vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 1024],
            multiplier: 1,
            step_delay: StepDelaySetting::Fixed(10),
            excluded_task_ids: vec![2],
            max_attempts: 5,
            server_error_backoff: 5,
            rate_limit_backoff: 60,
            max_rate_limit_waits: 10,
        }
    }
}

impl BotConfig {
    /// Defaults, overlaid by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_sequence.is_empty() {
            return Err(ConfigError::Invalid("tileSequence must not be empty".to_string()));
        }
        if self.tile_sequence.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(format!(
                "tileSequence must be strictly increasing, got {:?}",
                self.tile_sequence
            )));
        }
        if self.base_interval == 0 {
            return Err(ConfigError::Invalid("baseInterval must be at least 1 second".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("maxAttempts must be at least 1".to_string()));
        }
        if let StepDelaySetting::Range([min, max]) = self.step_delay {
            if min > max {
                return Err(ConfigError::Invalid(format!("stepDelay range [{}, {}] is inverted", min, max)));
            }
        }
        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| ConfigError::Invalid(format!("baseUrl '{}': {}", self.base_url, e)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            server_error_backoff: Duration::from_secs(self.server_error_backoff),
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff),
            max_rate_limit_waits: self.max_rate_limit_waits,
        }
    }

    pub fn step_delay(&self) -> StepDelay {
        match self.step_delay {
            StepDelaySetting::Fixed(secs) => StepDelay::Fixed(Duration::from_secs(secs)),
            StepDelaySetting::Range([min, max]) => StepDelay::Range {
                min: Duration::from_secs(min),
                max: Duration::from_secs(max),
            },
        }
    }

    pub fn schedule_timing(&self) -> ScheduleTiming {
        ScheduleTiming {
            base_interval: Duration::from_secs(self.base_interval),
            jitter_bound: Duration::from_secs(self.jitter_bound),
            inter_account_delay: Duration::from_secs(self.inter_account_delay),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            tiles: self.tile_sequence.clone(),
            multiplier: self.multiplier,
            step_delay: self.step_delay(),
            excluded_task_ids: self.excluded_task_ids.clone(),
        }
    }

    pub fn routes(&self) -> ApiRoutes {
        ApiRoutes::new(self.route_id.clone(), self.task_id_in_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = BotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.step_delay(), StepDelay::Fixed(Duration::from_secs(10)));
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"multiplier": 3, "routeId": "abc", "tileSequence": [2, 4, 8], "stepDelay": {{"range": [3, 7]}}}}"#
        )
        .unwrap();

        let config = BotConfig::load(Some(file.path())).unwrap();
        config.validate().unwrap();
        assert_eq!(config.multiplier, 3);
        assert_eq!(config.tile_sequence, vec![2, 4, 8]);
        assert_eq!(config.base_interval, BotConfig::default().base_interval);
        assert_eq!(
            config.step_delay(),
            StepDelay::Range { min: Duration::from_secs(3), max: Duration::from_secs(7) }
        );
        assert_eq!(config.routes().login().path, "/api/abc/user/auth");
    }

    #[test]
    fn non_increasing_tiles_are_rejected() {
        let config = BotConfig { tile_sequence: vec![2, 8, 4], ..BotConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = BotConfig { tile_sequence: vec![], ..BotConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_and_bad_url_are_rejected() {
        assert!(BotConfig { base_interval: 0, ..BotConfig::default() }.validate().is_err());
        assert!(BotConfig { max_attempts: 0, ..BotConfig::default() }.validate().is_err());
        assert!(BotConfig { base_url: "not a url".to_string(), ..BotConfig::default() }.validate().is_err());
        let inverted = BotConfig { step_delay: StepDelaySetting::Range([7, 3]), ..BotConfig::default() };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(BotConfig::load(Some(file.path())), Err(ConfigError::Json(_))));
    }
}
