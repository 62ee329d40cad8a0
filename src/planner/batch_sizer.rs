//! Multi-constraint batch sizing.
//!
//! Grounded on `batch_size_optimizer.py`'s `BatchSizeOptimizer.calculate_optimal_batch_size`:
//! four independent constraint calculations, the binding (smallest) one wins.

use crate::domain::Tier;
use crate::models::ModelSpec;

/// How aggressively to trade batch size for per-job quality, mirroring the
/// source's `quality_priority` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPriority {
    /// Favor throughput: larger batches, more jobs per request.
    Speed,
    /// Default middle ground.
    Balanced,
    /// Favor per-job attention: smaller batches.
    Quality,
}

/// Per-batch processing time estimate for the time-constrained calculation, in seconds.
const PER_JOB_PROCESSING_SECONDS: f64 = 2.0;
/// Fixed per-batch API round-trip overhead, in seconds.
const PER_BATCH_API_OVERHEAD_SECONDS: f64 = 3.0;
/// Hard ceiling on the time-constrained batch size regardless of time budget.
const TIME_CONSTRAINED_MAX: usize = 30;

fn prompt_overhead_tokens(tier: Tier) -> u32 {
    match tier {
        Tier::Tier1 => 400,
        Tier::Tier2 => 500,
        Tier::Tier3 => 600,
    }
}

fn tokens_per_job_output(tier: Tier) -> u32 {
    match tier {
        Tier::Tier1 => 800,
        Tier::Tier2 => 600,
        Tier::Tier3 => 600,
    }
}

fn quality_constrained_size(tier: Tier, priority: QualityPriority) -> usize {
    match (tier, priority) {
        (Tier::Tier1, QualityPriority::Quality) => 5,
        (Tier::Tier1, QualityPriority::Balanced) => 10,
        (Tier::Tier1, QualityPriority::Speed) => 20,
        (Tier::Tier2, QualityPriority::Quality) => 8,
        (Tier::Tier2, QualityPriority::Balanced) => 15,
        (Tier::Tier2, QualityPriority::Speed) => 25,
        (Tier::Tier3, QualityPriority::Quality) => 8,
        (Tier::Tier3, QualityPriority::Balanced) => 15,
        (Tier::Tier3, QualityPriority::Speed) => 25,
    }
}

fn token_constrained_size(model: &ModelSpec, tier: Tier) -> usize {
    let usable = (model.max_output_tokens.saturating_sub(prompt_overhead_tokens(tier))) as f64 * 0.8;
    let per_job = tokens_per_job_output(tier) as f64;
    ((usable / per_job).floor() as usize).max(1)
}

fn rate_constrained_size(total_jobs: usize, daily_request_cap: u32) -> usize {
    if total_jobs <= 150 {
        15
    } else if total_jobs <= 1500 {
        15
    } else {
        let computed = (total_jobs as f64 / (daily_request_cap as f64 * 0.8)).ceil() as usize;
        computed.max(10)
    }
}

fn time_constrained_size(time_budget_seconds: Option<f64>) -> Option<usize> {
    let budget = time_budget_seconds?;
    let mut size = TIME_CONSTRAINED_MAX;
    while size > 1 {
        let estimated =
            size as f64 * PER_JOB_PROCESSING_SECONDS + PER_BATCH_API_OVERHEAD_SECONDS;
        if estimated <= budget {
            break;
        }
        size -= 1;
    }
    Some(size)
}

/// Which constraint ended up binding the final batch size, for the rationale
/// string surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingConstraint {
    /// The model's output token limit forced a smaller batch.
    Token,
    /// Per-minute/per-day request caps forced a smaller batch.
    Rate,
    /// The configured quality priority forced a smaller batch.
    Quality,
    /// The caller's time budget forced a smaller batch.
    Time,
}

/// Result of [`optimal_batch_size`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSizing {
    /// The chosen batch size: the minimum across all active constraints.
    pub optimal: usize,
    /// Half of `optimal`, floored at 1.
    pub min_size: usize,
    /// The smaller of `optimal * 2` and the token-constrained size.
    pub max_size: usize,
    /// Which constraint was binding.
    pub rationale: BindingConstraint,
    /// `ceil(total_jobs / optimal)`.
    pub batches_needed: usize,
    /// Estimated wall-clock time for the whole job set, in seconds.
    pub estimated_total_time_seconds: f64,
    /// Estimated total cost in USD for the whole job set.
    pub estimated_total_cost: f64,
}

/// Choose a batch size for `total_jobs` jobs at `tier` against `model`, given
/// a request-rate cap and optional quality/time preferences.
///
/// `time_budget_seconds`, if given, bounds how long the caller is willing to
/// wait for the whole job set; `None` omits the time constraint entirely.
pub fn optimal_batch_size(
    total_jobs: usize,
    tier: Tier,
    model: &ModelSpec,
    daily_request_cap: u32,
    quality_priority: QualityPriority,
    time_budget_seconds: Option<f64>,
) -> BatchSizing {
    let token_size = token_constrained_size(model, tier);
    let rate_size = rate_constrained_size(total_jobs, daily_request_cap);
    let quality_size = quality_constrained_size(tier, quality_priority);
    let time_size = time_constrained_size(time_budget_seconds);

    let mut candidates: Vec<(BindingConstraint, usize)> = vec![
        (BindingConstraint::Token, token_size),
        (BindingConstraint::Rate, rate_size),
        (BindingConstraint::Quality, quality_size),
    ];
    if let Some(size) = time_size {
        candidates.push((BindingConstraint::Time, size));
    }

    let (rationale, optimal) = candidates
        .into_iter()
        .min_by_key(|(_, size)| *size)
        .expect("at least the token, rate and quality constraints are always present");
    let optimal = optimal.max(1);

    let min_size = (optimal / 2).max(1);
    let max_size = (optimal * 2).min(token_size);

    let batches_needed = if total_jobs == 0 {
        0
    } else {
        (total_jobs as f64 / optimal as f64).ceil() as usize
    };

    let mut estimated_total_time_seconds =
        batches_needed as f64 * (PER_JOB_PROCESSING_SECONDS * optimal as f64 + PER_BATCH_API_OVERHEAD_SECONDS);
    if batches_needed > 1 {
        let implied_rpm = batches_needed as f64 / (estimated_total_time_seconds / 60.0);
        if implied_rpm > model.rpm_limit as f64 {
            let penalty_minutes = batches_needed as f64 / model.rpm_limit as f64;
            estimated_total_time_seconds = estimated_total_time_seconds.max(penalty_minutes * 60.0);
        }
    }

    let output_tokens_total = total_jobs as f64 * tokens_per_job_output(tier) as f64;
    let input_tokens_total = total_jobs as f64 * prompt_overhead_tokens(tier) as f64;
    let estimated_total_cost = model.estimate_cost(input_tokens_total as u32, output_tokens_total as u32);

    BatchSizing {
        optimal,
        min_size,
        max_size,
        rationale,
        batches_needed,
        estimated_total_time_seconds,
        estimated_total_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCatalog;

    fn lite_model() -> ModelSpec {
        ModelCatalog::default_gemini_catalog()
            .get("gemini-2.0-flash-lite-001")
            .unwrap()
            .clone()
    }

    #[test]
    fn small_job_set_is_bound_by_the_tightest_constraint() {
        let model = lite_model();
        let sizing = optimal_batch_size(8, Tier::Tier1, &model, 1000, QualityPriority::Balanced, None);
        let token_size = token_constrained_size(&model, Tier::Tier1);
        assert_eq!(sizing.optimal, token_size);
        assert_eq!(sizing.rationale, BindingConstraint::Token);
        assert!(sizing.batches_needed >= 1);
    }

    #[test]
    fn zero_jobs_needs_zero_batches() {
        let model = lite_model();
        let sizing = optimal_batch_size(0, Tier::Tier1, &model, 1000, QualityPriority::Balanced, None);
        assert_eq!(sizing.batches_needed, 0);
    }

    #[test]
    fn tight_time_budget_shrinks_batch_size() {
        let model = lite_model();
        let generous = optimal_batch_size(100, Tier::Tier1, &model, 1000, QualityPriority::Speed, None);
        let constrained =
            optimal_batch_size(100, Tier::Tier1, &model, 1000, QualityPriority::Speed, Some(10.0));
        assert!(constrained.optimal <= generous.optimal);
        assert_eq!(constrained.rationale, BindingConstraint::Time);
    }

    #[test]
    fn large_job_set_uses_rate_constraint_formula() {
        let model = lite_model();
        let sizing = optimal_batch_size(5000, Tier::Tier1, &model, 100, QualityPriority::Speed, None);
        // rate_constrained = ceil(5000 / (100*0.8)) = ceil(62.5) = 63, floored at 10 (no-op here)
        assert!(sizing.optimal <= 63);
    }

    #[test]
    fn max_size_never_exceeds_token_constrained_size() {
        let model = lite_model();
        let sizing = optimal_batch_size(3, Tier::Tier1, &model, 1000, QualityPriority::Quality, None);
        let token_size = token_constrained_size(&model, Tier::Tier1);
        assert!(sizing.max_size <= token_size);
    }
}
