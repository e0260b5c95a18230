//! Pipeline configuration.
//!
//! Loaded from a TOML document; every field has a default matching the
//! reference behavior, so an empty document is a valid configuration.
//!
//! ```toml
//! model = "gpt-4o-mini"
//! temperature = 0.2
//! max_chars = 15000
//! cache_capacity = 256
//!
//! [retry]
//! max_retries = 5
//! wait_secs = 20
//! retry_malformed = true
//!
//! [tutorial]
//! max_abstraction_num = 10
//! chapter_concurrency = 1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::retry::RetryPolicy;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Provider base URL (without `/v1/...`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used by every stage.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature used by every stage.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Character budget for one request (system + user prompt).
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// HTTP timeout for one provider call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Most replies the gateway's response cache keeps (0 disables it).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// `[retry]` section.
    #[serde(default)]
    pub retry: RetryConfig,

    /// `[tutorial]` section.
    #[serde(default)]
    pub tutorial: TutorialConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_chars: default_max_chars(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            retry: RetryConfig::default(),
            tutorial: TutorialConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_chars() -> usize {
    15_000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_cache_capacity() -> usize {
    crate::gateway::DEFAULT_CACHE_CAPACITY
}

/// `[retry]` section: execute-phase retry for LLM-backed nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total execute attempts per node (at least 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed wait between attempts.
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Whether unparseable LLM output is worth another attempt.
    #[serde(default = "default_true")]
    pub retry_malformed: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            wait_secs: default_wait_secs(),
            retry_malformed: true,
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_wait_secs() -> u64 {
    20
}
fn default_true() -> bool {
    true
}

/// `[tutorial]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorialConfig {
    /// Upper bound on identified abstractions when the store does not set one.
    #[serde(default = "default_max_abstraction_num")]
    pub max_abstraction_num: usize,

    /// Chapters written at once.
    #[serde(default = "default_chapter_concurrency")]
    pub chapter_concurrency: usize,
}

impl Default for TutorialConfig {
    fn default() -> Self {
        Self {
            max_abstraction_num: default_max_abstraction_num(),
            chapter_concurrency: default_chapter_concurrency(),
        }
    }
}

fn default_max_abstraction_num() -> usize {
    10
}
fn default_chapter_concurrency() -> usize {
    1
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| FlowError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlowError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FlowError::InvalidConfig(format!("failed to serialize config: {}", e)))
    }

    /// Reject values no run could honor.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(FlowError::InvalidConfig(format!(
                "temperature must be in [0, 1], got {}",
                self.temperature
            )));
        }
        if self.max_chars == 0 {
            return Err(FlowError::InvalidConfig("max_chars must be positive".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(FlowError::InvalidConfig(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(FlowError::InvalidConfig("model must not be empty".into()));
        }
        Ok(())
    }

    /// The API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for LLM-backed nodes.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_secs(self.retry.wait_secs),
        );
        if self.retry.retry_malformed {
            policy
        } else {
            policy.no_malformed_retry()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_chars, 15_000);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.wait_secs, 20);
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.cache_capacity, 256);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_toml_str(
            r#"
            model = "gpt-4o"
            cache_capacity = 8
            [retry]
            wait_secs = 0
            retry_malformed = false
            "#,
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.wait_secs, 0);

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert!(!policy.retry_on.malformed);
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let err = PipelineConfig::from_toml_str("temperature = 1.5").unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = PipelineConfig::from_toml_str("[retry]\nmax_retries = 0").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = PipelineConfig::from_toml_str("model = ").unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_api_key_reads_named_env_var() {
        let config = PipelineConfig {
            api_key_env: "MANUAL_FLOW_TEST_KEY_UNSET".into(),
            ..PipelineConfig::default()
        };
        assert_eq!(config.api_key(), None);
    }
}
