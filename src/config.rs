//! Pipeline configuration.
//!
//! `PipelineConfig::from_env()` is the only function in this crate permitted
//! to call `std::env::var`, matching the template's single-entry-point
//! convention. A `ProviderConfig` trait describes the Gemini endpoint in the
//! same shape the template used for its four vendor configs, even though
//! there is only one implementor here.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::{PipelineError, PipelineResult};

/// Default Gemini generative-language API base URL.
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default model used before any planner selection runs.
const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite-001";
/// Default fallback model once the daily token budget is mostly spent.
const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.0-flash-lite-001";
/// Default daily output-token budget before the client switches to the fallback model.
const DEFAULT_DAILY_TOKEN_LIMIT: u64 = 1_000_000;
/// Default continuous-scheduler poll interval, in seconds.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
/// Default on-disk storage directory for the hash registry, usage ledger, and JSONL logs.
const DEFAULT_STORAGE_DIR: &str = "storage";

/// Behavior every LLM provider configuration must expose, mirroring the
/// template's per-provider config trait even though this crate only ever
/// has one implementor ([`GeminiConfig`]).
pub trait ProviderConfig: Send + Sync {
    /// Check the configuration is complete enough to make requests.
    fn validate(&self) -> PipelineResult<()>;
    /// The API base URL.
    fn base_url(&self) -> &str;
    /// The API key used to authenticate requests.
    fn api_key(&self) -> &str;
    /// The model id used when nothing more specific has been selected.
    fn default_model(&self) -> &str;
}

/// Gemini endpoint configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Base URL for the generative-language API.
    pub base_url: String,
    /// API key, read from `GEMINI_API_KEY`.
    pub api_key: String,
    /// Model id to use before the planner has made its first selection.
    pub default_model: String,
}

impl ProviderConfig for GeminiConfig {
    fn validate(&self) -> PipelineResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::configuration_error(
                "GEMINI_API_KEY must not be empty",
            ));
        }
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

/// Local-time windows for the three sequential tiers, per spec §4.6.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowConfig {
    /// Tier 1 window start (inclusive).
    pub tier1_start: NaiveTime,
    /// Tier 1 window end (exclusive).
    pub tier1_end: NaiveTime,
    /// Tier 2 window start (inclusive).
    pub tier2_start: NaiveTime,
    /// Tier 2 window end (exclusive).
    pub tier2_end: NaiveTime,
    /// Tier 3 window start (inclusive).
    pub tier3_start: NaiveTime,
    /// Tier 3 window end (exclusive).
    pub tier3_end: NaiveTime,
}

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self {
            tier1_start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            tier1_end: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            tier2_start: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            tier2_end: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
            tier3_start: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
            tier3_end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        }
    }
}

/// Top-level pipeline configuration, assembled once at process start.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Gemini endpoint configuration.
    pub gemini: GeminiConfig,
    /// API key required on every non-health control-API route, via `WEBHOOK_API_KEY`.
    pub webhook_api_key: Option<String>,
    /// Alternate API key for tracking ingest, via `STEVE_GLEN_TRACKING_API_KEY`.
    pub tracking_api_key: Option<String>,
    /// Sequential scheduler tier windows.
    pub time_windows: TimeWindowConfig,
    /// Directory for the hash registry, usage ledger, and JSONL security logs.
    pub storage_dir: PathBuf,
    /// How often `run_continuous_scheduler` wakes to check the active window.
    pub scheduler_poll_interval: Duration,
    /// Daily output-token budget before the client falls back to a cheaper model.
    pub daily_token_limit: u64,
    /// Model id used once the daily token budget is mostly spent.
    pub fallback_model_id: String,
}

impl PipelineConfig {
    /// Build configuration from environment variables. The only function in
    /// this crate permitted to call [`std::env::var`].
    pub fn from_env() -> PipelineResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            PipelineError::configuration_error("GEMINI_API_KEY environment variable is required")
        })?;

        let webhook_api_key = std::env::var("WEBHOOK_API_KEY").ok();
        let tracking_api_key = std::env::var("STEVE_GLEN_TRACKING_API_KEY").ok();

        let base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_GEMINI_BASE_URL.to_string());
        let default_model =
            std::env::var("GEMINI_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let fallback_model_id = std::env::var("GEMINI_FALLBACK_MODEL")
            .unwrap_or_else(|_| DEFAULT_FALLBACK_MODEL.to_string());

        let storage_dir = std::env::var("PIPELINE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_DIR));

        let scheduler_poll_interval = std::env::var("SCHEDULER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));

        let daily_token_limit = std::env::var("GEMINI_DAILY_TOKEN_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DAILY_TOKEN_LIMIT);

        let gemini = GeminiConfig {
            base_url,
            api_key,
            default_model,
        };
        gemini.validate()?;

        Ok(Self {
            gemini,
            webhook_api_key,
            tracking_api_key,
            time_windows: TimeWindowConfig::default(),
            storage_dir,
            scheduler_poll_interval,
            daily_token_limit,
            fallback_model_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "GEMINI_API_KEY",
            "WEBHOOK_API_KEY",
            "STEVE_GLEN_TRACKING_API_KEY",
            "GEMINI_BASE_URL",
            "GEMINI_DEFAULT_MODEL",
            "GEMINI_FALLBACK_MODEL",
            "PIPELINE_STORAGE_DIR",
            "SCHEDULER_POLL_INTERVAL_SECS",
            "GEMINI_DAILY_TOKEN_LIMIT",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_api_key_is_a_configuration_error() {
        clear_env();
        let result = PipelineConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_are_unset() {
        clear_env();
        std::env::set_var("GEMINI_API_KEY", "test-key");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(config.scheduler_poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert!(config.webhook_api_key.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn explicit_overrides_are_honored() {
        clear_env();
        std::env::set_var("GEMINI_API_KEY", "test-key");
        std::env::set_var("SCHEDULER_POLL_INTERVAL_SECS", "60");
        std::env::set_var("WEBHOOK_API_KEY", "hook-key");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.scheduler_poll_interval, Duration::from_secs(60));
        assert_eq!(config.webhook_api_key.as_deref(), Some("hook-key"));
        clear_env();
    }
}
