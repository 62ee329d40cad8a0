//! Control HTTP API, per spec §6: a thin `axum` surface over the scheduler
//! and state store. Every non-health route requires the `X-API-Key` header
//! to equal the configured `webhook_api_key`; a bad or missing key is a 401.
//! Internal failures surface as `500` with `{error, message, timestamp}`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::cancellation::CancellationToken;
use crate::domain::Tier;
use crate::error::PipelineError;
use crate::logging::log_warn;
use crate::scheduler::{AggregateRunStats, Scheduler};
use crate::store::StateStore;

/// Shared application state handed to every route handler.
#[derive(Clone)]
pub struct ApiState {
    scheduler: Arc<Scheduler>,
    store: Arc<dyn StateStore>,
    api_key: Option<String>,
}

impl ApiState {
    /// Build the shared state. `api_key` is the configured `WEBHOOK_API_KEY`;
    /// `None` means every non-health route is open (a development posture,
    /// not recommended past local testing).
    pub fn new(scheduler: Arc<Scheduler>, store: Arc<dyn StateStore>, api_key: Option<String>) -> Self {
        Self {
            scheduler,
            store,
            api_key,
        }
    }
}

/// Build the router: `/api/analyze/{tier1,tier2,tier3,sequential-batch,status,tier-stats,health}`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/analyze/tier1", post(run_tier1))
        .route("/api/analyze/tier2", post(run_tier2))
        .route("/api/analyze/tier3", post(run_tier3))
        .route("/api/analyze/sequential-batch", post(run_sequential_batch))
        .route("/api/analyze/status", get(status))
        .route("/api/analyze/tier-stats", get(tier_stats))
        .route("/api/analyze/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize, Default)]
struct TierRequest {
    max_jobs: Option<usize>,
    #[serde(default)]
    #[allow(dead_code)] // accepted for shape compatibility; model selection stays with the planner (spec §4.2).
    model_override: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    timestamp: String,
}

impl ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            error: format!("{:?}", err.category()),
            message: err.user_message(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::from(&self.0))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

/// 401 marker returned by the auth check; carries no body beyond the status.
struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

fn check_api_key(state: &ApiState, headers: &HeaderMap) -> Result<(), Unauthorized> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };
    let provided = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        log_warn!("rejected control API request: missing or incorrect X-API-Key");
        Err(Unauthorized)
    }
}

#[derive(Debug, Serialize)]
struct BatchStatsBody {
    success: bool,
    results: BatchStatsInner,
}

#[derive(Debug, Serialize)]
struct BatchStatsInner {
    total_jobs: usize,
    successful: usize,
    failed: usize,
    total_tokens: u64,
    batches_run: usize,
    avg_response_time_ms: f64,
    p95_response_time_ms: u64,
    cancelled: bool,
}

impl From<&AggregateRunStats> for BatchStatsInner {
    fn from(stats: &AggregateRunStats) -> Self {
        Self {
            total_jobs: stats.total_jobs,
            successful: stats.successful,
            failed: stats.failed,
            total_tokens: stats.total_tokens,
            batches_run: stats.batches_run,
            avg_response_time_ms: stats.avg_response_time_ms(),
            p95_response_time_ms: stats.p95_response_time_ms(),
            cancelled: stats.cancelled,
        }
    }
}

impl From<AggregateRunStats> for BatchStatsBody {
    fn from(stats: AggregateRunStats) -> Self {
        Self {
            success: true,
            results: BatchStatsInner::from(&stats),
        }
    }
}

const DEFAULT_MAX_JOBS: usize = 50;

async fn run_tier(
    state: &ApiState,
    tier: Tier,
    req: TierRequest,
) -> Result<Json<BatchStatsBody>, ApiError> {
    let cancel = CancellationToken::new();
    let stats = state
        .scheduler
        .run_tier_batch(tier, req.max_jobs.unwrap_or(DEFAULT_MAX_JOBS), &cancel)
        .await?;
    Ok(Json(stats.into()))
}

async fn run_tier1(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<TierRequest>>,
) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    run_tier(&state, Tier::Tier1, body.map(|Json(r)| r).unwrap_or_default())
        .await
        .map(IntoResponse::into_response)
        .map_err(IntoResponse::into_response)
}

async fn run_tier2(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<TierRequest>>,
) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    run_tier(&state, Tier::Tier2, body.map(|Json(r)| r).unwrap_or_default())
        .await
        .map(IntoResponse::into_response)
        .map_err(IntoResponse::into_response)
}

async fn run_tier3(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<TierRequest>>,
) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    run_tier(&state, Tier::Tier3, body.map(|Json(r)| r).unwrap_or_default())
        .await
        .map(IntoResponse::into_response)
        .map_err(IntoResponse::into_response)
}

#[derive(Debug, Serialize)]
struct SequentialBatchBody {
    success: bool,
    results: SequentialBatchInner,
}

#[derive(Debug, Serialize)]
struct SequentialBatchInner {
    tier1: BatchStatsInner,
    tier2: BatchStatsInner,
    tier3: BatchStatsInner,
    total_jobs_processed: usize,
}

async fn run_sequential_batch(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    let cancel = CancellationToken::new();
    let [t1, t2, t3] = state
        .scheduler
        .run_full_sequential_batch(&cancel)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let total_jobs_processed = t1.successful + t2.successful + t3.successful;
    let body = SequentialBatchBody {
        success: true,
        results: SequentialBatchInner {
            tier1: BatchStatsInner::from(&t1),
            tier2: BatchStatsInner::from(&t2),
            tier3: BatchStatsInner::from(&t3),
            total_jobs_processed,
        },
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Serialize)]
struct StatusBody {
    pending_t1: usize,
    pending_t2: usize,
    pending_t3: usize,
    fully_analyzed: usize,
    active_tier: Option<u8>,
    current_time: String,
}

async fn status(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    let processing = state
        .store
        .processing_status()
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let now = Local::now();
    let active_tier = crate::scheduler::active_tier(now.time(), state.scheduler.windows());
    let body = StatusBody {
        pending_t1: processing.pending_t1,
        pending_t2: processing.pending_t2,
        pending_t3: processing.pending_t3,
        fully_analyzed: processing.fully_analyzed,
        active_tier: active_tier.map(|t| t.number()),
        current_time: now.to_rfc3339(),
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Serialize)]
struct TierStatsBody {
    pending_t1: usize,
    pending_t2: usize,
    pending_t3: usize,
    fully_analyzed: usize,
    total_jobs_tracked: usize,
}

async fn tier_stats(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, Response> {
    check_api_key(&state, &headers).map_err(IntoResponse::into_response)?;
    let processing = state
        .store
        .processing_status()
        .await
        .map_err(|e| ApiError::from(e).into_response())?;
    let body = TierStatsBody {
        pending_t1: processing.pending_t1,
        pending_t2: processing.pending_t2,
        pending_t3: processing.pending_t3,
        fully_analyzed: processing.fully_analyzed,
        total_jobs_tracked: processing.pending_t1 + processing.pending_t2 + processing.pending_t3 + processing.fully_analyzed,
    };
    Ok(Json(body).into_response())
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeminiConfig, TimeWindowConfig};
    use crate::llm_client::LlmClient;
    use crate::models::ModelCatalog;
    use crate::security_log::InMemorySink;
    use crate::store::InMemoryStateStore;
    use crate::tiers::{new_tier1_analyzer, new_tier2_analyzer, new_tier3_analyzer};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(api_key: Option<&str>) -> ApiState {
        let dir = tempfile::tempdir().unwrap();
        let config = GeminiConfig {
            base_url: "http://127.0.0.1:0".to_string(),
            api_key: "test-key".to_string(),
            default_model: "gemini-2.0-flash-lite-001".to_string(),
        };
        let client = Arc::new(
            LlmClient::new(
                config,
                ModelCatalog::default_gemini_catalog(),
                dir.path(),
                1_000_000,
                "gemini-2.0-flash-lite-001".to_string(),
            )
            .unwrap(),
        );
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(crate::prompt_registry::PromptRegistry::new());
        let incidents: Arc<dyn crate::security_log::EventSink> = Arc::new(InMemorySink::new());

        let tier1 = new_tier1_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
        let tier2 = new_tier2_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
        let tier3 = new_tier3_analyzer(store.clone(), registry, client.clone(), incidents);

        let scheduler = Arc::new(Scheduler::new(
            tier1,
            tier2,
            tier3,
            client,
            ModelCatalog::default_gemini_catalog(),
            TimeWindowConfig::default(),
            Duration::from_secs(300),
            1_000_000,
        ));

        ApiState::new(scheduler, store, api_key.map(str::to_string))
    }

    #[tokio::test]
    async fn health_is_reachable_without_a_key() {
        let app = router(test_state(Some("secret")));
        let response = app
            .oneshot(Request::builder().uri("/api/analyze/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_without_a_key_is_rejected_when_one_is_configured() {
        let app = router(test_state(Some("secret")));
        let response = app
            .oneshot(Request::builder().uri("/api/analyze/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_with_correct_key_succeeds() {
        let app = router(test_state(Some("secret")));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/analyze/status")
                    .header("X-API-Key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn no_configured_key_leaves_routes_open() {
        let app = router(test_state(None));
        let response = app
            .oneshot(Request::builder().uri("/api/analyze/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tier1_with_no_pending_jobs_returns_zeroed_stats() {
        let app = router(test_state(None));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analyze/tier1")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
