//! Per-request output token budgeting.
//!
//! Grounded on `token_optimizer.py`'s `calculate_optimal_tokens` / `TokenAllocation`.
//! Pure arithmetic: no I/O, no `Result` — the "exceptions for control flow"
//! redesign note calls for a tabular, testable function here, and an output
//! token budget has no failure mode worth modeling as an error.

use crate::domain::Tier;

/// Hard ceiling on output tokens, shared by every model in the catalog.
pub const MODEL_TOKEN_LIMIT: u32 = 8192;

/// Fixed allowance for JSON wrapper overhead (field names, braces, punctuation).
const JSON_OVERHEAD: u32 = 100;

fn base_tokens_per_job(tier: Tier) -> u32 {
    match tier {
        Tier::Tier1 => 800,
        Tier::Tier2 => 600,
        Tier::Tier3 => 600,
    }
}

fn safety_margin(tier: Tier) -> f64 {
    match tier {
        Tier::Tier1 => 1.30,
        Tier::Tier2 => 1.20,
        Tier::Tier3 => 1.20,
    }
}

/// Ideal batch size per tier, used only to decide whether to emit a
/// `batch_too_large` recommendation — not a hard cap.
fn ideal_batch_size(tier: Tier) -> usize {
    match tier {
        Tier::Tier1 => 10,
        Tier::Tier2 => 15,
        Tier::Tier3 => 15,
    }
}

/// Advisory notes attached to a [`TokenAllocation`] when the caller's batch
/// shape is outside the comfortable operating range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRecommendation {
    /// `max_output_tokens` was capped at [`MODEL_TOKEN_LIMIT`]; the model may
    /// truncate its response.
    AtModelLimit,
    /// Less than 60% of the model's output budget would be used; a smaller,
    /// cheaper model could serve this batch just as well.
    LowUtilization,
    /// `job_count` exceeds this tier's ideal batch size; consider splitting.
    BatchTooLarge { ideal: usize, actual: usize },
}

/// Result of [`allocate`]: the computed output token budget plus any advisory
/// recommendations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAllocation {
    /// Output tokens to request from the model.
    pub max_output_tokens: u32,
    /// Utilization of the model's hard ceiling, as a percentage (0-100).
    pub utilization_pct: u32,
    /// Advisory recommendations, if any.
    pub recommendations: Vec<TokenRecommendation>,
}

/// Compute the output token budget for a batch of `job_count` jobs at `tier`.
///
/// `job_count == 0` returns a budget of just the JSON overhead, per the
/// boundary behavior: the planner should never be asked to size a request for
/// zero jobs, but if it is, it must not panic or divide by zero.
pub fn allocate(job_count: usize, tier: Tier) -> TokenAllocation {
    let base = base_tokens_per_job(tier) as f64;
    let margin = safety_margin(tier);
    let raw = (job_count as f64 * base * margin).ceil() as u32 + JSON_OVERHEAD;
    let max_output_tokens = raw.min(MODEL_TOKEN_LIMIT);

    let utilization_pct = (max_output_tokens as f64 / MODEL_TOKEN_LIMIT as f64 * 100.0) as u32;

    let mut recommendations = Vec::new();
    if raw >= MODEL_TOKEN_LIMIT {
        recommendations.push(TokenRecommendation::AtModelLimit);
    }
    if job_count > 0 && utilization_pct < 60 {
        recommendations.push(TokenRecommendation::LowUtilization);
    }
    let ideal = ideal_batch_size(tier);
    if job_count > ideal {
        recommendations.push(TokenRecommendation::BatchTooLarge {
            ideal,
            actual: job_count,
        });
    }

    TokenAllocation {
        max_output_tokens,
        utilization_pct,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_tier1_two_jobs() {
        let allocation = allocate(2, Tier::Tier1);
        // ceil(2 * 800 * 1.30) + 100 = ceil(2080) + 100 = 2180
        assert_eq!(allocation.max_output_tokens, 2180);
    }

    #[test]
    fn zero_jobs_returns_just_overhead() {
        let allocation = allocate(0, Tier::Tier1);
        assert_eq!(allocation.max_output_tokens, JSON_OVERHEAD);
        assert!(allocation.recommendations.is_empty());
    }

    #[test]
    fn large_batch_caps_at_model_limit_and_recommends() {
        let allocation = allocate(500, Tier::Tier1);
        assert_eq!(allocation.max_output_tokens, MODEL_TOKEN_LIMIT);
        assert!(allocation
            .recommendations
            .contains(&TokenRecommendation::AtModelLimit));
    }

    #[test]
    fn batch_over_ideal_size_is_flagged() {
        let allocation = allocate(12, Tier::Tier1);
        assert!(allocation
            .recommendations
            .iter()
            .any(|r| matches!(r, TokenRecommendation::BatchTooLarge { .. })));
    }

    #[test]
    fn single_job_is_low_utilization() {
        let allocation = allocate(1, Tier::Tier2);
        assert!(allocation
            .recommendations
            .contains(&TokenRecommendation::LowUtilization));
    }
}
