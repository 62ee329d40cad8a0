//! C6: Sequential Scheduler — drives the three tier analyzers through their
//! configured local-time windows (or, for a manual/backfill run, straight
//! through to exhaustion) and aggregates per-batch statistics.
//!
//! Grounded on `sequential_batch_scheduler.py`'s `run_scheduled_analysis` /
//! `run_sequential_batch` loop: pick the active tier for "now", fetch a
//! planner-sized slice of pending jobs, dispatch it, sleep briefly, repeat
//! until either the tier is exhausted or its window closes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime};
use tokio::sync::Mutex;

use crate::cancellation::CancellationToken;
use crate::config::TimeWindowConfig;
use crate::domain::{JobId, Tier};
use crate::error::PipelineResult;
use crate::internals::retry::CircuitBreaker;
use crate::llm_client::LlmClient;
use crate::logging::{log_error, log_info, log_warn};
use crate::models::ModelCatalog;
use crate::planner::{allocate, optimal_batch_size, ModelSelector, QualityPriority, SelectionContext};
use crate::tiers::TierAnalyzer;

/// Minimum pause between consecutive batches within a tier run, so a
/// pathologically fast tier doesn't hammer the provider back-to-back.
const INTER_BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Upper bound on jobs pulled from the store per `run_tier_batch` call when
/// the caller doesn't specify one.
const DEFAULT_MAX_JOBS_PER_RUN: usize = 500;

/// Which local-time window (if any) `now` falls into, per spec §4.6.
pub fn active_tier(now: NaiveTime, windows: &TimeWindowConfig) -> Option<Tier> {
    if now >= windows.tier1_start && now < windows.tier1_end {
        Some(Tier::Tier1)
    } else if now >= windows.tier2_start && now < windows.tier2_end {
        Some(Tier::Tier2)
    } else if now >= windows.tier3_start && now < windows.tier3_end {
        Some(Tier::Tier3)
    } else {
        None
    }
}

/// Aggregate statistics across every batch run for one `run_tier_batch` or
/// `run_full_sequential_batch` call.
#[derive(Debug, Clone, Default)]
pub struct AggregateRunStats {
    /// Total jobs attempted across every batch.
    pub total_jobs: usize,
    /// Jobs that completed and were persisted.
    pub successful: usize,
    /// Jobs that failed validation or persistence.
    pub failed: usize,
    /// Total output tokens billed across every batch.
    pub total_tokens: u64,
    /// Number of LLM batches dispatched.
    pub batches_run: usize,
    /// Per-request response times across every batch, in milliseconds.
    pub response_times_ms: Vec<u64>,
    /// Set if the run was abandoned via cancellation before exhausting its jobs.
    pub cancelled: bool,
}

impl AggregateRunStats {
    fn absorb(&mut self, batch: crate::tiers::TierRunStats) {
        self.total_jobs += batch.total_jobs;
        self.successful += batch.successful;
        self.failed += batch.failed;
        self.total_tokens += batch.total_tokens;
        self.batches_run += 1;
        self.response_times_ms.extend(batch.response_times_ms);
        self.cancelled = self.cancelled || batch.cancelled;
    }

    /// Mean response time across every batch dispatched in this run, in milliseconds.
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<u64>() as f64 / self.response_times_ms.len() as f64
    }

    /// 95th-percentile response time across every batch, in milliseconds.
    pub fn p95_response_time_ms(&self) -> u64 {
        if self.response_times_ms.is_empty() {
            return 0;
        }
        let mut sorted = self.response_times_ms.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * 0.95).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        sorted[idx]
    }

    /// Jobs successfully processed per wall-clock second of this run. `0.0`
    /// if no batches ran or no time elapsed.
    pub fn jobs_per_second(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.successful as f64 / secs
    }
}

/// C6: the sequential scheduler. Owns the per-tier analyzers and the shared
/// planner/model-selection state; one instance per deployment.
pub struct Scheduler {
    tier1: TierAnalyzer,
    tier2: TierAnalyzer,
    tier3: TierAnalyzer,
    client: Arc<LlmClient>,
    catalog: ModelCatalog,
    selector: Mutex<ModelSelector>,
    circuit: Mutex<CircuitBreaker>,
    windows: TimeWindowConfig,
    poll_interval: Duration,
    daily_request_cap: u32,
    daily_token_limit: u64,
    quality_priority: QualityPriority,
}

impl Scheduler {
    /// Build a scheduler from its three tier analyzers and shared state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tier1: TierAnalyzer,
        tier2: TierAnalyzer,
        tier3: TierAnalyzer,
        client: Arc<LlmClient>,
        catalog: ModelCatalog,
        windows: TimeWindowConfig,
        poll_interval: Duration,
        daily_token_limit: u64,
    ) -> Self {
        Self {
            tier1,
            tier2,
            tier3,
            client,
            catalog,
            selector: Mutex::new(ModelSelector::new()),
            circuit: Mutex::new(CircuitBreaker::default()),
            windows,
            poll_interval,
            daily_request_cap: 1500,
            daily_token_limit,
            quality_priority: QualityPriority::Balanced,
        }
    }

    fn analyzer_for(&self, tier: Tier) -> &TierAnalyzer {
        match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
            Tier::Tier3 => &self.tier3,
        }
    }

    /// The configured tier time windows, for callers (the control API's
    /// `status` route) that need to report the currently active tier.
    pub fn windows(&self) -> &TimeWindowConfig {
        &self.windows
    }

    async fn plan_batch(&self, tier: Tier, pending: &[JobId]) -> (String, u32, usize) {
        let usage = self.client.usage_snapshot().await;
        let ctx = SelectionContext {
            tier,
            job_count: pending.len(),
            daily_tokens_used: usage.daily_tokens,
            daily_token_limit: self.daily_token_limit,
            recent_quality_score: None,
            time_sensitive: false,
            peak_hours: false,
        };

        let mut selector = self.selector.lock().await;
        let model = selector
            .select(&self.catalog, &ctx)
            .cloned()
            .unwrap_or_else(|| self.catalog.preferred().cloned().expect("catalog is non-empty"));
        drop(selector);

        let sizing = optimal_batch_size(
            pending.len(),
            tier,
            &model,
            self.daily_request_cap,
            self.quality_priority,
            None,
        );
        let batch_size = sizing.optimal.min(pending.len()).max(1);
        let allocation = allocate(batch_size, tier);
        (model.id, allocation.max_output_tokens, batch_size)
    }

    /// Run one tier to exhaustion (or until `max_jobs` have been attempted,
    /// or `cancel` fires), batching via the planner's sizing recommendation.
    pub async fn run_tier_batch(
        &self,
        tier: Tier,
        max_jobs: usize,
        cancel: &CancellationToken,
    ) -> PipelineResult<AggregateRunStats> {
        let analyzer = self.analyzer_for(tier);
        let mut stats = AggregateRunStats::default();

        loop {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            if stats.total_jobs >= max_jobs {
                break;
            }
            {
                let mut circuit = self.circuit.lock().await;
                if !circuit.should_allow_request() {
                    log_warn!(tier = tier.number(), "circuit breaker open; pausing this tier's run");
                    break;
                }
            }

            let remaining = max_jobs - stats.total_jobs;
            let pending = analyzer.get_pending(remaining).await?;
            if pending.is_empty() {
                break;
            }

            let (model_id, max_output_tokens, batch_size) = self.plan_batch(tier, &pending).await;
            let batch: Vec<JobId> = pending.into_iter().take(batch_size).collect();

            log_info!(
                tier = tier.number(),
                model = %model_id,
                batch_size = batch.len(),
                "dispatching tier batch"
            );

            match analyzer.run_batch(&batch, &model_id, max_output_tokens, cancel).await {
                Ok(batch_stats) => {
                    let cancelled_mid_run = batch_stats.cancelled;
                    self.circuit.lock().await.record_success();
                    stats.absorb(batch_stats);
                    if cancelled_mid_run {
                        break;
                    }
                }
                Err(err) => {
                    log_error!(tier = tier.number(), error = %err, "tier batch failed outright");
                    self.circuit.lock().await.record_failure();
                    stats.failed += batch.len();
                    stats.total_jobs += batch.len();
                    stats.batches_run += 1;
                }
            }

            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        Ok(stats)
    }

    /// Run tier 1 through tier 3 in order, each to exhaustion, for a manual
    /// or backfill invocation outside the normal time windows.
    pub async fn run_full_sequential_batch(
        &self,
        cancel: &CancellationToken,
    ) -> PipelineResult<[AggregateRunStats; 3]> {
        let t1 = self
            .run_tier_batch(Tier::Tier1, DEFAULT_MAX_JOBS_PER_RUN, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Ok([t1, AggregateRunStats::default(), AggregateRunStats::default()]);
        }
        let t2 = self
            .run_tier_batch(Tier::Tier2, DEFAULT_MAX_JOBS_PER_RUN, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Ok([t1, t2, AggregateRunStats::default()]);
        }
        let t3 = self
            .run_tier_batch(Tier::Tier3, DEFAULT_MAX_JOBS_PER_RUN, cancel)
            .await?;
        Ok([t1, t2, t3])
    }

    /// Determine the active tier for the current local time and run it, if any.
    /// Returns `None` if no tier window is currently open.
    pub async fn run_scheduled_tier(
        &self,
        cancel: &CancellationToken,
    ) -> PipelineResult<Option<(Tier, AggregateRunStats)>> {
        let Some(tier) = active_tier(Local::now().time(), &self.windows) else {
            return Ok(None);
        };
        let stats = self.run_tier_batch(tier, DEFAULT_MAX_JOBS_PER_RUN, cancel).await?;
        Ok(Some((tier, stats)))
    }

    /// Run forever, waking every `poll_interval` to check which tier window
    /// (if any) is active and drive it. Never panics on a per-iteration
    /// error; logs and continues. Exits promptly when `cancel` fires.
    pub async fn run_continuous_scheduler(&self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                log_info!("continuous scheduler stopping: cancellation requested");
                return;
            }

            match self.run_scheduled_tier(cancel).await {
                Ok(Some((tier, stats))) => {
                    log_info!(
                        tier = tier.number(),
                        successful = stats.successful,
                        failed = stats.failed,
                        batches = stats.batches_run,
                        "scheduled tier run completed"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    log_error!(error = %err, "scheduled tier run failed; continuing to next poll");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    log_info!("continuous scheduler stopping: cancellation requested during sleep");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows() -> TimeWindowConfig {
        TimeWindowConfig::default()
    }

    #[test]
    fn time_inside_tier1_window_selects_tier1() {
        let t = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert_eq!(active_tier(t, &windows()), Some(Tier::Tier1));
    }

    #[test]
    fn time_inside_tier2_window_selects_tier2() {
        let t = NaiveTime::from_hms_opt(3, 45, 0).unwrap();
        assert_eq!(active_tier(t, &windows()), Some(Tier::Tier2));
    }

    #[test]
    fn time_inside_tier3_window_selects_tier3() {
        let t = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        assert_eq!(active_tier(t, &windows()), Some(Tier::Tier3));
    }

    #[test]
    fn time_outside_every_window_selects_nothing() {
        let t = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert_eq!(active_tier(t, &windows()), None);
    }

    #[test]
    fn window_boundary_is_exclusive_on_the_end() {
        assert_eq!(active_tier(windows().tier1_end, &windows()), Some(Tier::Tier2));
    }

    #[test]
    fn aggregate_p95_matches_tier_run_stats_semantics() {
        let mut agg = AggregateRunStats::default();
        agg.absorb(crate::tiers::TierRunStats {
            total_jobs: 2,
            successful: 2,
            failed: 0,
            total_tokens: 100,
            response_times_ms: vec![100, 200],
            cancelled: false,
        });
        agg.absorb(crate::tiers::TierRunStats {
            total_jobs: 1,
            successful: 1,
            failed: 0,
            total_tokens: 50,
            response_times_ms: vec![9000],
            cancelled: false,
        });
        assert_eq!(agg.batches_run, 2);
        assert_eq!(agg.total_jobs, 3);
        assert_eq!(agg.p95_response_time_ms(), 9000);
    }

    #[test]
    fn jobs_per_second_is_zero_for_zero_elapsed() {
        let agg = AggregateRunStats::default();
        assert_eq!(agg.jobs_per_second(Duration::from_secs(0)), 0.0);
    }
}
