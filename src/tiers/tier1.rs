//! Tier 1: authenticity + classification + ATS structured data. No prior-tier
//! dependency — every job starts here.

use std::sync::Arc;

use crate::domain::Tier;
use crate::llm_client::LlmClient;
use crate::prompt_registry::PromptRegistry;
use crate::prompts::TIER1_PROMPT_NAME;
use crate::security_log::EventSink;
use crate::store::StateStore;

use super::TierAnalyzer;

/// Build the tier-1 analyzer.
pub fn new_tier1_analyzer(
    store: Arc<dyn StateStore>,
    registry: Arc<PromptRegistry>,
    client: Arc<LlmClient>,
    incidents: Arc<dyn EventSink>,
) -> TierAnalyzer {
    TierAnalyzer::new(Tier::Tier1, TIER1_PROMPT_NAME, store, registry, client, incidents)
}
