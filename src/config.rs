//! Configuration for durable HTTP calls.
//!
//! Values come from an optional TOML file and are then overridden by
//! `DURABLE_HTTP_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::token::TokenSourceConfig;

/// Identifying `User-Agent` attached to every physical call.
pub const DEFAULT_USER_AGENT: &str = concat!("durable-http/", env!("CARGO_PKG_VERSION"));

const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 100_000;
const DEFAULT_MAX_WAIT_MS: u64 = 3 * 24 * 60 * 60 * 1000;

/// What to do when the poll loop reaches its wait deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Return the last observed response with `timed_out` set.
    #[default]
    ReturnLastResponse,
    /// Raise `DurableHttpError::TimeoutExceeded`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableHttpConfig {
    /// Poll delay used when a 202 carries no usable `Retry-After`.
    pub default_poll_interval_ms: u64,
    pub user_agent: String,
    /// Per physical call, not per durable call.
    pub request_timeout_ms: u64,
    pub default_max_wait_ms: u64,
    pub timeout_policy: TimeoutPolicy,
    /// Header names never forwarded to a poll request.
    pub poll_header_exclusions: Vec<String>,
    pub token_source: Option<TokenSourceConfig>,
}

impl Default for DurableHttpConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            default_max_wait_ms: DEFAULT_MAX_WAIT_MS,
            timeout_policy: TimeoutPolicy::default(),
            poll_header_exclusions: Vec::new(),
            token_source: None,
        }
    }
}

impl DurableHttpConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `DURABLE_HTTP_USER_AGENT`, `DURABLE_HTTP_POLL_INTERVAL_MS` and
    /// `DURABLE_HTTP_REQUEST_TIMEOUT_MS` overrides.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(user_agent) = lookup("DURABLE_HTTP_USER_AGENT") {
            self.user_agent = user_agent;
        }
        if let Some(raw) = lookup("DURABLE_HTTP_POLL_INTERVAL_MS") {
            self.default_poll_interval_ms = parse_millis("DURABLE_HTTP_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("DURABLE_HTTP_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_millis("DURABLE_HTTP_REQUEST_TIMEOUT_MS", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "default_poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn default_poll_interval(&self) -> Duration {
        Duration::from_millis(self.default_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_max_wait(&self) -> Duration {
        Duration::from_millis(self.default_max_wait_ms)
    }
}

fn parse_millis(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("`{raw}` is not a millisecond count: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DurableHttpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_poll_interval(), Duration::from_secs(30));
        assert!(config.user_agent.starts_with("durable-http/"));
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = DurableHttpConfig::from_toml_str(
            r#"
            default_poll_interval_ms = 5000
            timeout_policy = "fail"
            poll_header_exclusions = ["x-functions-key"]

            [token_source]
            kind = "static"
            token = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.timeout_policy, TimeoutPolicy::Fail);
        assert_eq!(config.poll_header_exclusions, ["x-functions-key"]);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(matches!(config.token_source, Some(TokenSourceConfig::Static { .. })));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = DurableHttpConfig::from_toml_str("default_poll_interval_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "default_poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let config = DurableHttpConfig::default()
            .apply_overrides(|name| match name {
                "DURABLE_HTTP_USER_AGENT" => Some("billing-worker/2".to_string()),
                "DURABLE_HTTP_POLL_INTERVAL_MS" => Some("250".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.user_agent, "billing-worker/2");
        assert_eq!(config.default_poll_interval_ms, 250);
    }

    #[test]
    fn malformed_env_override_is_reported() {
        let err = DurableHttpConfig::default()
            .apply_overrides(|name| {
                (name == "DURABLE_HTTP_REQUEST_TIMEOUT_MS").then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("DURABLE_HTTP_REQUEST_TIMEOUT_MS"));
    }
}
