//! Weighted multi-factor model selection.
//!
//! Grounded on `model_selector.py`'s `ModelSelector.select_model` and its
//! four `_score_by_*` sub-scorers. Each sub-score is in `[0, 1]`; the overall
//! score is `0.4*workload + 0.3*budget + 0.2*quality + 0.1*time`.

use crate::domain::Tier;
use crate::models::{ModelCatalog, ModelSpec, ModelTier};

const WEIGHT_WORKLOAD: f64 = 0.4;
const WEIGHT_BUDGET: f64 = 0.3;
const WEIGHT_QUALITY: f64 = 0.2;
const WEIGHT_TIME: f64 = 0.1;

/// Batch size past which workload scoring starts favoring higher-capacity models.
const LARGE_BATCH_THRESHOLD: usize = 20;

/// Everything the selector needs to know about the request being sized, beyond
/// the catalog itself.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext {
    /// Which analysis tier this request serves.
    pub tier: Tier,
    /// Number of jobs in the batch.
    pub job_count: usize,
    /// Tokens already consumed today, from the [`crate::llm_client::UsageLedger`].
    pub daily_tokens_used: u64,
    /// The configured daily token budget.
    pub daily_token_limit: u64,
    /// Recent measured output-quality score in `[0, 1]`, if one is tracked.
    pub recent_quality_score: Option<f64>,
    /// Whether the caller marked this request as latency-sensitive.
    pub time_sensitive: bool,
    /// Whether the current wall-clock hour is a configured peak usage hour.
    pub peak_hours: bool,
}

fn score_by_workload(model: &ModelSpec, ctx: &SelectionContext) -> f64 {
    let tier_affinity = match (ctx.tier, model.tier) {
        (Tier::Tier3, ModelTier::Premium) => 1.0,
        (Tier::Tier3, ModelTier::Standard) => 0.6,
        (Tier::Tier3, ModelTier::Lite) => 0.3,
        (Tier::Tier2, ModelTier::Standard) => 1.0,
        (Tier::Tier2, ModelTier::Premium) => 0.7,
        (Tier::Tier2, ModelTier::Lite) => 0.5,
        (Tier::Tier1, ModelTier::Lite) => 1.0,
        (Tier::Tier1, ModelTier::Standard) => 0.8,
        (Tier::Tier1, ModelTier::Premium) => 0.4,
    };
    if ctx.job_count > LARGE_BATCH_THRESHOLD {
        let capacity_bonus = match model.tier {
            ModelTier::Lite => 0.0,
            ModelTier::Standard => 0.1,
            ModelTier::Premium => 0.2,
        };
        (tier_affinity + capacity_bonus).min(1.0)
    } else {
        tier_affinity
    }
}

fn score_by_budget(model: &ModelSpec, ctx: &SelectionContext) -> f64 {
    if ctx.daily_token_limit == 0 {
        return 0.5;
    }
    let ratio = ctx.daily_tokens_used as f64 / ctx.daily_token_limit as f64;
    if ratio > 0.90 {
        match model.tier {
            ModelTier::Lite => 1.0,
            ModelTier::Standard => 0.2,
            ModelTier::Premium => 0.0,
        }
    } else if ratio > 0.80 {
        match model.tier {
            ModelTier::Lite => 0.9,
            ModelTier::Standard => 0.7,
            ModelTier::Premium => 0.1,
        }
    } else if ratio < 0.40 {
        match model.tier {
            ModelTier::Lite => 0.6,
            ModelTier::Standard => 0.8,
            ModelTier::Premium => 1.0,
        }
    } else {
        match model.tier {
            ModelTier::Lite => 0.8,
            ModelTier::Standard => 0.7,
            ModelTier::Premium => 0.5,
        }
    }
}

fn score_by_quality(model: &ModelSpec, ctx: &SelectionContext) -> f64 {
    match ctx.recent_quality_score {
        Some(q) if q < 0.75 => match model.tier {
            ModelTier::Premium => 1.0,
            ModelTier::Standard => 0.6,
            ModelTier::Lite => 0.2,
        },
        Some(q) if q > 0.95 => match model.tier {
            ModelTier::Lite => 1.0,
            ModelTier::Standard => 0.7,
            ModelTier::Premium => 0.4,
        },
        Some(_) => 0.6,
        None => 0.5,
    }
}

fn score_by_time(model: &ModelSpec, ctx: &SelectionContext) -> f64 {
    if ctx.time_sensitive || ctx.peak_hours {
        match model.tier {
            ModelTier::Lite => 1.0,
            ModelTier::Standard => 0.6,
            ModelTier::Premium => 0.2,
        }
    } else {
        0.5
    }
}

fn overall_score(model: &ModelSpec, ctx: &SelectionContext) -> f64 {
    WEIGHT_WORKLOAD * score_by_workload(model, ctx)
        + WEIGHT_BUDGET * score_by_budget(model, ctx)
        + WEIGHT_QUALITY * score_by_quality(model, ctx)
        + WEIGHT_TIME * score_by_time(model, ctx)
}

fn build_selection_reason(model: &ModelSpec, ctx: &SelectionContext, score: f64) -> String {
    format!(
        "selected {} for tier{} batch of {} (score={:.3}, daily_tokens={}/{})",
        model.id,
        ctx.tier.number(),
        ctx.job_count,
        score,
        ctx.daily_tokens_used,
        ctx.daily_token_limit
    )
}

/// One past selection decision, kept for operator visibility and tests.
#[derive(Debug, Clone)]
pub struct SelectionRecord {
    /// The model id that was chosen.
    pub model_id: String,
    /// Human-readable rationale.
    pub reason: String,
    /// Whether this selection switched away from the previously selected model.
    pub switched: bool,
}

/// Stateful wrapper around the scoring functions: tracks the currently
/// selected model and how many times it has changed, per spec §4.2's
/// "persists `current_model`; counts `model_switches`".
#[derive(Debug, Default)]
pub struct ModelSelector {
    current_model: Option<String>,
    model_switches: u32,
    selection_history: Vec<SelectionRecord>,
}

impl ModelSelector {
    /// A fresh selector with no prior selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The model id currently in effect, if any selection has been made yet.
    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    /// How many times the selection has changed model across calls to [`select`](Self::select).
    pub fn model_switches(&self) -> u32 {
        self.model_switches
    }

    /// Past selection decisions, most recent last.
    pub fn selection_history(&self) -> &[SelectionRecord] {
        &self.selection_history
    }

    /// Score every model in `catalog` under `ctx` and select the highest scorer.
    ///
    /// Returns `None` only if the catalog is empty.
    pub fn select<'a>(&mut self, catalog: &'a ModelCatalog, ctx: &SelectionContext) -> Option<&'a ModelSpec> {
        let chosen = catalog
            .iter()
            .map(|m| (m, overall_score(m, ctx)))
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;

        let (model, score) = chosen;
        let switched = self.current_model.as_deref() != Some(model.id.as_str());
        if switched && self.current_model.is_some() {
            self.model_switches += 1;
        }
        self.current_model = Some(model.id.clone());
        self.selection_history.push(SelectionRecord {
            model_id: model.id.clone(),
            reason: build_selection_reason(model, ctx, score),
            switched,
        });
        Some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(tier: Tier) -> SelectionContext {
        SelectionContext {
            tier,
            job_count: 5,
            daily_tokens_used: 1_000,
            daily_token_limit: 100_000,
            recent_quality_score: None,
            time_sensitive: false,
            peak_hours: false,
        }
    }

    #[test]
    fn tier1_prefers_lite_under_normal_budget() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut selector = ModelSelector::new();
        let chosen = selector.select(&catalog, &ctx(Tier::Tier1)).unwrap();
        assert_eq!(chosen.tier, ModelTier::Lite);
    }

    #[test]
    fn tier3_prefers_premium_under_normal_budget() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut selector = ModelSelector::new();
        let chosen = selector.select(&catalog, &ctx(Tier::Tier3)).unwrap();
        assert_eq!(chosen.tier, ModelTier::Premium);
    }

    #[test]
    fn near_exhausted_budget_forces_lite_regardless_of_tier() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut selector = ModelSelector::new();
        let mut high_usage = ctx(Tier::Tier3);
        high_usage.daily_tokens_used = 95_000;
        let chosen = selector.select(&catalog, &high_usage).unwrap();
        assert_eq!(chosen.tier, ModelTier::Lite);
    }

    #[test]
    fn switching_models_increments_counter() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut selector = ModelSelector::new();
        selector.select(&catalog, &ctx(Tier::Tier1)).unwrap();
        assert_eq!(selector.model_switches(), 0);
        selector.select(&catalog, &ctx(Tier::Tier3)).unwrap();
        assert_eq!(selector.model_switches(), 1);
        selector.select(&catalog, &ctx(Tier::Tier3)).unwrap();
        assert_eq!(selector.model_switches(), 1, "re-selecting the same model must not count as a switch");
    }

    #[test]
    fn low_recent_quality_upgrades_toward_premium() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut selector = ModelSelector::new();
        let mut low_quality = ctx(Tier::Tier1);
        low_quality.recent_quality_score = Some(0.5);
        let chosen = selector.select(&catalog, &low_quality).unwrap();
        assert_eq!(chosen.tier, ModelTier::Standard, "low quality should pull the tier1 pick up from lite");
        assert!(selector.selection_history().last().unwrap().reason.contains(&chosen.id));
    }
}
