//! Tier 3: employer prestige and cover-letter angle. Depends on tier 2 having
//! already completed for a job.

use std::sync::Arc;

use crate::domain::Tier;
use crate::llm_client::LlmClient;
use crate::prompt_registry::PromptRegistry;
use crate::prompts::TIER3_PROMPT_NAME;
use crate::security_log::EventSink;
use crate::store::StateStore;

use super::TierAnalyzer;

/// Build the tier-3 analyzer.
pub fn new_tier3_analyzer(
    store: Arc<dyn StateStore>,
    registry: Arc<PromptRegistry>,
    client: Arc<LlmClient>,
    incidents: Arc<dyn EventSink>,
) -> TierAnalyzer {
    TierAnalyzer::new(Tier::Tier3, TIER3_PROMPT_NAME, store, registry, client, incidents)
}
