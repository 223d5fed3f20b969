//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! timeout_ms = 5000
//! echo_inputs = true
//!
//! [remote]
//! base_url = "https://judge0.example.com"
//! ```

use std::{fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceLimits};

/// Errors from loading or validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read.
    Io { path: String, message: String },
    /// The text is not valid TOML for this schema.
    Parse(String),
    /// A value is out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read config {path}: {message}"),
            Self::Parse(message) => write!(f, "invalid config: {message}"),
            Self::Invalid(message) => write!(f, "invalid config value: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for the Judge0-compatible remote fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the Judge0 API, e.g. `https://ce.judge0.com`.
    pub base_url: String,
    /// Judge0 language id; 71 is Python 3.
    pub language_id: u32,
    /// Sent as `X-Auth-Token` when set.
    pub auth_token: Option<String>,
    pub poll_interval_ms: u64,
    /// Give up polling after this long.
    pub max_wait_ms: u64,
    pub cpu_time_limit_s: Option<f64>,
    pub memory_limit_kb: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            language_id: 71,
            auth_token: None,
            poll_interval_ms: 500,
            max_wait_ms: 20_000,
            cpu_time_limit_s: None,
            memory_limit_kb: None,
        }
    }
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = millis(wait);
        self
    }
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Wall-clock limit per execution attempt.
    pub timeout_ms: u64,
    /// Statement and loop-iteration budget per attempt.
    pub max_operations: Option<usize>,
    pub max_recursion_depth: usize,
    /// Write each consumed input value after its prompt, like a terminal transcript.
    pub echo_inputs: bool,
    /// Use this seed for every run instead of drawing one from OS entropy.
    pub fixed_seed: Option<u64>,
    /// File name shown in tracebacks.
    pub script_name: String,
    pub remote: Option<RemoteConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_operations: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            echo_inputs: false,
            fixed_seed: None,
            script_name: "main.py".to_owned(),
            remote: None,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = millis(timeout);
        self
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    #[must_use]
    pub fn echo_inputs(mut self, echo: bool) -> Self {
        self.echo_inputs = echo;
        self
    }

    #[must_use]
    pub fn fixed_seed(mut self, seed: u64) -> Self {
        self.fixed_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Resource limits for one attempt.
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        let limits = ResourceLimits::new()
            .max_duration(Duration::from_millis(self.timeout_ms))
            .max_recursion_depth(Some(self.max_recursion_depth));
        match self.max_operations {
            Some(limit) => limits.max_operations(limit),
            None => limits,
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_edit::de::from_str(text).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml_edit::ser::to_string_pretty(self).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be greater than 0".to_owned()));
        }
        if self.max_recursion_depth == 0 {
            return Err(ConfigError::Invalid("max_recursion_depth must be greater than 0".to_owned()));
        }
        if self.script_name.is_empty() {
            return Err(ConfigError::Invalid("script_name must not be empty".to_owned()));
        }
        if let Some(remote) = &self.remote {
            url::Url::parse(&remote.base_url)
                .map_err(|error| ConfigError::Invalid(format!("remote.base_url {:?}: {error}", remote.base_url)))?;
            if remote.max_wait_ms == 0 {
                return Err(ConfigError::Invalid("remote.max_wait_ms must be greater than 0".to_owned()));
            }
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.limits().max_duration, Some(Duration::from_secs(10)));
        assert_eq!(config.limits().max_operations, None);
    }

    #[test]
    fn remote_section_fills_missing_fields() {
        let config = EngineConfig::from_toml_str(
            "fixed_seed = 9\n[remote]\nbase_url = \"http://localhost:2358\"\npoll_interval_ms = 50\n",
        )
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(config.fixed_seed, Some(9));
        assert_eq!(remote.language_id, 71);
        assert_eq!(remote.poll_interval_ms, 50);
        assert_eq!(remote.max_wait_ms, 20_000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("timeout_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("[remote]\nbase_url = \"not a url\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("timeout = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
