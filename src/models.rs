//! Model catalog: the set of LLM models available to the planner and client.
//!
//! Grounded on `model_selector.py`'s `ModelSpec` dataclass and hardcoded
//! `MODELS` table.

use serde::{Deserialize, Serialize};

/// Capability tier of a catalog model. Distinct from [`crate::domain::Tier`]
/// (the analysis tier) — a `ModelTier::Premium` model can serve any analysis tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelTier {
    /// Cheapest, fastest, lowest quality.
    Lite,
    /// Balanced cost/quality.
    Standard,
    /// Highest quality, highest cost, lowest RPM headroom on the free tier.
    Premium,
}

/// A single catalog entry describing one LLM model's capabilities and cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider-side model identifier, used verbatim in the generation endpoint URL.
    pub id: String,
    /// Capability tier.
    pub tier: ModelTier,
    /// Human-readable name.
    pub name: String,
    /// Requests-per-minute limit for this model.
    pub rpm_limit: u32,
    /// Cost per 1,000 input tokens, in USD.
    pub input_cost_per_1k: f64,
    /// Cost per 1,000 output tokens, in USD.
    pub output_cost_per_1k: f64,
    /// Maximum output tokens this model will return.
    pub max_output_tokens: u32,
    /// Ascending priority for the 503 fallback walk; 1 is most preferred.
    pub priority: u32,
}

impl ModelSpec {
    /// Estimated cost in USD for a request with the given input/output token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Ordered collection of [`ModelSpec`]s. Priority order defines the 503
/// fallback walk in [`crate::llm_client`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Build a catalog from an explicit model list, sorted by ascending priority.
    pub fn new(mut models: Vec<ModelSpec>) -> Self {
        models.sort_by_key(|m| m.priority);
        Self { models }
    }

    /// The reference three-model Gemini-shaped catalog from the original deployment:
    /// a free lite tier, a free standard tier, and a paid premium tier.
    pub fn default_gemini_catalog() -> Self {
        Self::new(vec![
            ModelSpec {
                id: "gemini-2.0-flash-lite-001".to_string(),
                tier: ModelTier::Lite,
                name: "Gemini 2.0 Flash Lite".to_string(),
                rpm_limit: 15,
                input_cost_per_1k: 0.0,
                output_cost_per_1k: 0.0,
                max_output_tokens: 8192,
                priority: 1,
            },
            ModelSpec {
                id: "gemini-2.0-flash-001".to_string(),
                tier: ModelTier::Standard,
                name: "Gemini 2.0 Flash".to_string(),
                rpm_limit: 15,
                input_cost_per_1k: 0.0,
                output_cost_per_1k: 0.0,
                max_output_tokens: 8192,
                priority: 2,
            },
            ModelSpec {
                id: "gemini-2.5-flash".to_string(),
                tier: ModelTier::Premium,
                name: "Gemini 2.5 Flash".to_string(),
                rpm_limit: 60,
                input_cost_per_1k: 0.30,
                output_cost_per_1k: 2.50,
                max_output_tokens: 8192,
                priority: 3,
            },
        ])
    }

    /// Iterate models in ascending priority order (most preferred first).
    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    /// Look up a model by its id.
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    /// The most-preferred model in the catalog (lowest priority number).
    pub fn preferred(&self) -> Option<&ModelSpec> {
        self.models.first()
    }

    /// The next model after `current`, ascending by priority, skipping any id in `exclude`.
    ///
    /// Used by the 503 fallback chain (spec §4.3): walk the catalog for a model
    /// not yet tried this request.
    pub fn next_available(&self, exclude: &std::collections::HashSet<String>) -> Option<&ModelSpec> {
        self.models.iter().find(|m| !exclude.contains(&m.id))
    }

    /// Rebuild the catalog from a provider's model-list response, keeping only
    /// ids matching `name_prefix` and assigning priority in listing order.
    ///
    /// Falls back to the caller's existing catalog on any inconsistency (an
    /// empty `listed` slice): spec §4.3's "falls back to the cached catalog on
    /// failure".
    pub fn refreshed_from_listing(&self, listed: &[String], name_prefix: &str) -> Self {
        let matching: Vec<&String> = listed.iter().filter(|n| n.starts_with(name_prefix)).collect();
        if matching.is_empty() {
            return self.clone();
        }
        let mut models = Vec::new();
        for (idx, id) in matching.into_iter().enumerate() {
            if let Some(existing) = self.get(id) {
                let mut spec = existing.clone();
                spec.priority = (idx + 1) as u32;
                models.push(spec);
            }
        }
        if models.is_empty() {
            return self.clone();
        }
        Self::new(models)
    }

    /// Number of models in the catalog.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog has no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_priority_ordered() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let ids: Vec<&str> = catalog.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "gemini-2.0-flash-lite-001",
                "gemini-2.0-flash-001",
                "gemini-2.5-flash"
            ]
        );
    }

    #[test]
    fn next_available_skips_tried_models() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let mut tried = std::collections::HashSet::new();
        tried.insert("gemini-2.0-flash-lite-001".to_string());
        let next = catalog.next_available(&tried).unwrap();
        assert_eq!(next.id, "gemini-2.0-flash-001");
    }

    #[test]
    fn next_available_returns_none_when_all_tried() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let tried: std::collections::HashSet<String> =
            catalog.iter().map(|m| m.id.clone()).collect();
        assert!(catalog.next_available(&tried).is_none());
    }

    #[test]
    fn refresh_falls_back_to_cached_on_empty_listing() {
        let catalog = ModelCatalog::default_gemini_catalog();
        let refreshed = catalog.refreshed_from_listing(&[], "gemini-");
        assert_eq!(refreshed.len(), catalog.len());
    }
}
