//! Tier 2: stress level, red flags, implicit requirements. Depends on tier 1
//! having already completed for a job.

use std::sync::Arc;

use crate::domain::Tier;
use crate::llm_client::LlmClient;
use crate::prompt_registry::PromptRegistry;
use crate::prompts::TIER2_PROMPT_NAME;
use crate::security_log::EventSink;
use crate::store::StateStore;

use super::TierAnalyzer;

/// Build the tier-2 analyzer.
pub fn new_tier2_analyzer(
    store: Arc<dyn StateStore>,
    registry: Arc<PromptRegistry>,
    client: Arc<LlmClient>,
    incidents: Arc<dyn EventSink>,
) -> TierAnalyzer {
    TierAnalyzer::new(Tier::Tier2, TIER2_PROMPT_NAME, store, registry, client, incidents)
}
