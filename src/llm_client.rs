//! C3: LLM Client — Gemini-shaped HTTP dispatch with the 503 model-fallback
//! chain, 429 exponential backoff, usage accounting, and model-catalog
//! refresh.
//!
//! The retry/fallback state machine is grounded on `ai_analyzer.py`'s
//! `_make_gemini_request` and reproduced as a tabular match rather than the
//! source's nested try/except, per the "exceptions for control flow"
//! redesign note. `UsageLedger` mutation follows the same file's
//! `_update_usage_stats`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::GeminiConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::internals::retry::RetryPolicy;
use crate::logging::{log_error, log_info, log_warn};
use crate::models::{ModelCatalog, ModelSpec};

/// Wire request body for the Gemini `generateContent` endpoint.
#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: [GeminiContent<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

impl GeminiGenerationConfig {
    fn new(max_output_tokens: u32) -> Self {
        Self {
            temperature: 0.1,
            top_k: 1,
            top_p: 0.8,
            max_output_tokens,
            response_mime_type: "application/json",
        }
    }
}

/// Wire response body for the Gemini `generateContent` endpoint.
#[derive(Debug, Deserialize)]
struct GeminiResponseBody {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

/// Usage metadata from a Gemini response. The source references both the
/// REST field name and the SDK field name for the same count; this crate
/// accepts either via serde aliasing (see DESIGN.md's Open Question ledger).
#[derive(Debug, Clone, Deserialize)]
struct UsageMetadata {
    #[serde(alias = "totalTokens", default)]
    total_token_count: u32,
}

/// The decoded text payload and accounting metadata from one successful LLM call.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The raw text payload (expected to be a JSON string, decoded by the validator).
    pub text: String,
    /// Total tokens reported by the provider for this request.
    pub total_tokens: u32,
    /// The model id that actually served this request (may differ from the
    /// model requested at call time, if a 503 fallback occurred).
    pub model_used: String,
    /// Wall-clock time the request took, in milliseconds.
    pub response_time_ms: u64,
}

/// Running token/request/cost totals, mutated only after a successful
/// response, per spec §3's `UsageLedger` ownership rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLedger {
    /// Requests made today.
    pub daily_requests: u64,
    /// Requests made this calendar month.
    pub monthly_requests: u64,
    /// Output tokens consumed today.
    pub daily_tokens: u64,
    /// Output tokens consumed this calendar month.
    pub monthly_tokens: u64,
    /// Estimated cost accrued today, in USD.
    pub daily_cost: f64,
    /// Estimated cost accrued this calendar month, in USD.
    pub monthly_cost: f64,
    /// Date of the last daily-counter reset.
    pub last_daily_reset: DateTime<Utc>,
    /// Date of the last monthly-counter reset.
    pub last_monthly_reset: DateTime<Utc>,
}

impl Default for UsageLedger {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            daily_requests: 0,
            monthly_requests: 0,
            daily_tokens: 0,
            monthly_tokens: 0,
            daily_cost: 0.0,
            monthly_cost: 0.0,
            last_daily_reset: now,
            last_monthly_reset: now,
        }
    }
}

impl UsageLedger {
    /// Load a previously persisted ledger from `path`, or a fresh default one
    /// if the file is absent or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!(path = %path.display(), error = %err, "usage ledger file unreadable, starting fresh");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Best-effort persistence. Write failures are logged, never propagated
    /// (spec §3: "a write failure is logged but never blocks the response path").
    pub fn save(&self, path: &Path) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(err) = std::fs::write(path, json) {
                    log_error!(path = %path.display(), error = %err, "failed to persist usage ledger");
                }
            }
            Err(err) => log_error!(error = %err, "failed to serialize usage ledger"),
        }
    }

    fn reset_if_boundary_crossed(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.last_daily_reset.date_naive() {
            self.daily_requests = 0;
            self.daily_tokens = 0;
            self.daily_cost = 0.0;
            self.last_daily_reset = now;
        }
        if now.year() != self.last_monthly_reset.year() || now.month() != self.last_monthly_reset.month() {
            self.monthly_requests = 0;
            self.monthly_tokens = 0;
            self.monthly_cost = 0.0;
            self.last_monthly_reset = now;
        }
    }

    /// Record a successful request: roll reset boundaries forward if needed,
    /// then add tokens/cost for this call.
    pub fn record(&mut self, now: DateTime<Utc>, tokens: u32, model: &ModelSpec) {
        self.reset_if_boundary_crossed(now);
        self.daily_requests += 1;
        self.monthly_requests += 1;
        self.daily_tokens += tokens as u64;
        self.monthly_tokens += tokens as u64;
        let cost = model.estimate_cost(0, tokens);
        self.daily_cost += cost;
        self.monthly_cost += cost;
    }

    /// Ratio of today's token usage to `daily_token_limit`, used to decide
    /// whether to switch to the fallback model.
    pub fn daily_budget_ratio(&self, daily_token_limit: u64) -> f64 {
        if daily_token_limit == 0 {
            return 0.0;
        }
        self.daily_tokens as f64 / daily_token_limit as f64
    }
}

/// Fraction of the daily token budget past which the client switches to the
/// configured fallback model for subsequent calls (spec §4.3).
const FALLBACK_SWITCH_THRESHOLD: f64 = 0.75;
/// Sleep duration when a 503 fallback model is available.
const MODEL_SWITCH_COOLDOWN_SECS: u64 = 30;

/// C3: the LLM client. Owns the model catalog, the currently selected model,
/// and the usage ledger — per the "Planner and LLMClient each own their
/// mutable state" redesign note, nothing here is a global.
pub struct LlmClient {
    http: reqwest::Client,
    config: GeminiConfig,
    catalog: RwLock<ModelCatalog>,
    current_model: RwLock<String>,
    usage: Mutex<UsageLedger>,
    usage_path: PathBuf,
    retry_policy: RetryPolicy,
    daily_token_limit: u64,
    fallback_model_id: String,
    model_switches: AtomicU32,
}

impl LlmClient {
    /// Build a client against `config`, starting from `catalog`'s preferred
    /// model, persisting usage to `storage_dir/gemini_usage.json`.
    pub fn new(
        config: GeminiConfig,
        catalog: ModelCatalog,
        storage_dir: &Path,
        daily_token_limit: u64,
        fallback_model_id: String,
    ) -> PipelineResult<Self> {
        use crate::config::ProviderConfig;
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PipelineError::configuration_error(format!("failed to build HTTP client: {err}")))?;

        let usage_path = storage_dir.join("gemini_usage.json");
        let usage = UsageLedger::load(&usage_path);
        let current_model = catalog
            .preferred()
            .map(|m| m.id.clone())
            .ok_or_else(|| PipelineError::configuration_error("model catalog is empty"))?;

        Ok(Self {
            http,
            config,
            catalog: RwLock::new(catalog),
            current_model: RwLock::new(current_model),
            usage: Mutex::new(usage),
            usage_path,
            retry_policy: RetryPolicy {
                // Spec §4.3: "max_retries defaults to 3; base_delay to 1s" — tighter
                // than the teacher's generic RetryPolicy::default(), which was sized
                // for a different retry shape.
                max_attempts: 3,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                backoff_multiplier: 2.0,
                total_timeout: Duration::from_secs(300),
                request_timeout: Duration::from_secs(30),
            },
            daily_token_limit,
            fallback_model_id,
            model_switches: AtomicU32::new(0),
        })
    }

    /// The model id currently in effect.
    pub async fn current_model_id(&self) -> String {
        self.current_model.read().await.clone()
    }

    /// Force the current model, e.g. from the planner's selection or an
    /// operator-supplied override.
    pub async fn set_current_model(&self, model_id: impl Into<String>) {
        *self.current_model.write().await = model_id.into();
    }

    /// Number of times the 503 fallback chain has switched models so far.
    pub fn model_switches(&self) -> u32 {
        self.model_switches.load(Ordering::Relaxed)
    }

    /// Snapshot of the usage ledger.
    pub async fn usage_snapshot(&self) -> UsageLedger {
        self.usage.lock().await.clone()
    }

    /// Rebuild the model catalog from a provider model-list response,
    /// falling back to the existing catalog on any mismatch (spec §4.3).
    pub async fn refresh_catalog(&self, listed_model_names: &[String], name_prefix: &str) {
        let mut catalog = self.catalog.write().await;
        *catalog = catalog.refreshed_from_listing(listed_model_names, name_prefix);
        log_info!(model_count = catalog.len(), "model catalog refreshed");
    }

    async fn model_spec(&self, id: &str) -> Option<ModelSpec> {
        self.catalog.read().await.get(id).cloned()
    }

    /// C3's single exposed call: dispatch `prompt`, retrying/falling back per
    /// spec §4.3, and return the decoded text payload plus accounting data.
    pub async fn invoke(&self, prompt: &str, max_output_tokens: u32) -> PipelineResult<RawResponse> {
        let mut tried_models_503: HashSet<String> = HashSet::new();
        let mut attempt: u32 = 0;
        let max_attempts = self.retry_policy.max_attempts;

        loop {
            let model_id = self.current_model_id().await;
            let model = self.model_spec(&model_id).await.ok_or_else(|| {
                PipelineError::configuration_error(format!("unknown model in rotation: {model_id}"))
            })?;

            let outcome = self.send_once(&model, prompt, max_output_tokens).await;

            match outcome {
                Ok(raw) => {
                    tried_models_503.clear();
                    self.record_success(&model, raw.total_tokens).await;
                    return Ok(raw);
                }
                Err(RequestOutcome::ServiceUnavailable) => {
                    tried_models_503.insert(model.id.clone());
                    let next = {
                        let catalog = self.catalog.read().await;
                        catalog.next_available(&tried_models_503).cloned()
                    };
                    if let Some(next_model) = next {
                        log_warn!(
                            from_model = %model.id,
                            to_model = %next_model.id,
                            "model overloaded (503); switching to next catalog model"
                        );
                        tokio::time::sleep(Duration::from_secs(MODEL_SWITCH_COOLDOWN_SECS)).await;
                        self.set_current_model(next_model.id.clone()).await;
                        self.model_switches.fetch_add(1, Ordering::Relaxed);
                    } else {
                        let wait = MODEL_SWITCH_COOLDOWN_SECS * (attempt as u64 + 1);
                        log_warn!(
                            model = %model.id,
                            wait_seconds = wait,
                            attempt,
                            "all catalog models overloaded (503); backing off on current model"
                        );
                        if attempt + 1 >= max_attempts {
                            return Err(PipelineError::request_failed(
                                "all models exhausted for 503 after maximum retries",
                                None,
                            ));
                        }
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    }
                }
                Err(RequestOutcome::RateLimited) => {
                    if attempt + 1 >= max_attempts {
                        return Err(PipelineError::rate_limit_exceeded(
                            self.retry_policy.calculate_delay(attempt + 1).as_secs(),
                        ));
                    }
                    let delay = self.retry_policy.calculate_delay(attempt + 1);
                    log_warn!(model = %model.id, attempt, delay_ms = delay.as_millis() as u64, "rate limited (429); backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(RequestOutcome::Timeout) => {
                    if attempt + 1 >= max_attempts {
                        return Err(PipelineError::timeout(self.retry_policy.request_timeout.as_secs()));
                    }
                    log_warn!(model = %model.id, attempt, "request timed out; retrying");
                    tokio::time::sleep(self.retry_policy.initial_delay).await;
                }
                Err(RequestOutcome::Fatal(err)) => {
                    return Err(err);
                }
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(PipelineError::request_failed(
                    "LLM request retries exhausted",
                    None,
                ));
            }
        }
    }

    async fn record_success(&self, model: &ModelSpec, tokens: u32) {
        let mut ledger = self.usage.lock().await;
        ledger.record(Utc::now(), tokens, model);
        let ratio = ledger.daily_budget_ratio(self.daily_token_limit);
        ledger.save(&self.usage_path);
        drop(ledger);

        if ratio > FALLBACK_SWITCH_THRESHOLD {
            log_warn!(
                daily_budget_ratio = ratio,
                fallback_model = %self.fallback_model_id,
                "daily token budget mostly spent; switching to fallback model"
            );
            self.set_current_model(self.fallback_model_id.clone()).await;
        }
    }

    async fn send_once(
        &self,
        model: &ModelSpec,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<RawResponse, RequestOutcome> {
        use crate::config::ProviderConfig;

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url(),
            model.id,
            self.config.api_key()
        );

        let body = GeminiRequest {
            contents: [GeminiContent {
                parts: [GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig::new(max_output_tokens),
        };

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RequestOutcome::Timeout
                } else {
                    RequestOutcome::Fatal(PipelineError::request_failed(
                        format!("HTTP transport error: {err}"),
                        None,
                    ))
                }
            })?;

        let status = response.status();
        let response_time_ms = started.elapsed().as_millis() as u64;

        if status.as_u16() == 503 {
            return Err(RequestOutcome::ServiceUnavailable);
        }
        if status.as_u16() == 429 {
            return Err(RequestOutcome::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RequestOutcome::Fatal(PipelineError::authentication_failed(
                format!("LLM provider rejected credentials (status {status})"),
            )));
        }
        if !status.is_success() {
            return Err(RequestOutcome::Fatal(PipelineError::request_failed(
                format!("unexpected LLM provider status {status}"),
                None,
            )));
        }

        let parsed: GeminiResponseBody = response.json().await.map_err(|err| {
            RequestOutcome::Fatal(PipelineError::response_parsing_error(format!(
                "failed to decode LLM response body: {err}"
            )))
        })?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(RequestOutcome::Fatal(PipelineError::response_parsing_error(
                "LLM response contained no text payload",
            )));
        }

        let total_tokens = parsed.usage_metadata.map(|u| u.total_token_count).unwrap_or(0);

        Ok(RawResponse {
            text,
            total_tokens,
            model_used: model.id.clone(),
            response_time_ms,
        })
    }
}

enum RequestOutcome {
    ServiceUnavailable,
    RateLimited,
    Timeout,
    Fatal(PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_model() -> ModelSpec {
        ModelCatalog::default_gemini_catalog()
            .get("gemini-2.0-flash-lite-001")
            .unwrap()
            .clone()
    }

    #[test]
    fn usage_ledger_accumulates_tokens_monotonically() {
        let mut ledger = UsageLedger::default();
        let model = sample_model();
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 10, 0, 0).unwrap();
        ledger.record(now, 100, &model);
        ledger.record(now, 50, &model);
        assert_eq!(ledger.daily_tokens, 150);
        assert_eq!(ledger.monthly_tokens, 150);
    }

    #[test]
    fn usage_ledger_resets_on_new_day() {
        let mut ledger = UsageLedger::default();
        let model = sample_model();
        let day1 = Utc.with_ymd_and_hms(2026, 7, 29, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 30, 1, 0, 0).unwrap();
        ledger.record(day1, 100, &model);
        ledger.record(day2, 40, &model);
        assert_eq!(ledger.daily_tokens, 40);
        assert_eq!(ledger.monthly_tokens, 140);
    }

    #[test]
    fn usage_ledger_resets_on_new_month() {
        let mut ledger = UsageLedger::default();
        let model = sample_model();
        let month1 = Utc.with_ymd_and_hms(2026, 7, 31, 23, 0, 0).unwrap();
        let month2 = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        ledger.record(month1, 100, &model);
        ledger.record(month2, 10, &model);
        assert_eq!(ledger.monthly_tokens, 10);
    }

    #[test]
    fn usage_ledger_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemini_usage.json");
        let mut ledger = UsageLedger::default();
        let model = sample_model();
        ledger.record(Utc::now(), 321, &model);
        ledger.save(&path);

        let loaded = UsageLedger::load(&path);
        assert_eq!(loaded.daily_tokens, 321);
    }

    #[test]
    fn missing_usage_file_loads_a_fresh_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        let loaded = UsageLedger::load(&path);
        assert_eq!(loaded.daily_tokens, 0);
    }
}
