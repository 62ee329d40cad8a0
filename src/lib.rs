//! # tiered-analysis-pipeline
//!
//! Sequential three-tier LLM analysis pipeline for unanalyzed job postings,
//! with prompt-tamper protection, adaptive request planning, and a
//! multi-layer response validator/sanitizer.
//!
//! ## Pipeline shape
//!
//! Three [`tiers::TierAnalyzer`] instances (tier 1: authenticity and ATS
//! structure, tier 2: stress/red-flags, tier 3: prestige and cover-letter
//! angle) run in sequence, gated by time-of-day windows
//! ([`config::TimeWindowConfig`]) under a [`scheduler::Scheduler`]. Each
//! batch goes through:
//!
//! 1. [`prompt_registry::PromptRegistry`] — tamper detection and canonical
//!    restoration of the prompt template (C1).
//! 2. [`planner`] — token allocation, model selection, and batch sizing (C2).
//! 3. [`llm_client::LlmClient`] — dispatch with 503/429/timeout fallback (C3).
//! 4. [`validator`] and [`sanitizer`] — structural validation, security-token
//!    round trip, and field sanitization (C4).
//! 5. [`store::StateStore`] — persistence of tier completions and artifacts (C7).
//!
//! Every tamper detection, rejected response, and sanitization action is
//! recorded through [`security_log::EventSink`] (C8).
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiered_analysis_pipeline::config::PipelineConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_env()?;
//! // Assemble a `Scheduler` from `config` and call `run_scheduled_tier` or
//! // `run_continuous_scheduler` to drive the pipeline.
//! # let _ = config;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

// =============================================================================
// Module declarations
// =============================================================================

pub mod api;
pub mod cancellation;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm_client;
pub mod models;
pub mod planner;
pub mod prompt_registry;
pub mod prompts;
pub mod sanitizer;
pub mod scheduler;
pub mod security_log;
pub mod store;
pub mod tiers;
pub mod validator;

pub(crate) mod internals;
pub(crate) mod logging;

// =============================================================================
// Public API re-exports
// =============================================================================

pub use domain::{
    AnalysisArtifact, AtsKeyword, AtsOptimization, AuthenticityCheck, Classification, Job, JobId,
    SecurityToken, StructuredData, Tier, Tier1Artifact, Tier2Artifact, Tier3Artifact,
    TierCompletion, TierState,
};

pub use error::{PipelineError, PipelineResult};

pub use models::{ModelCatalog, ModelSpec, ModelTier};

pub use prompt_registry::{ChangeSource, PromptRegistry, RegistryEntry};

pub use llm_client::LlmClient;

pub use validator::ValidatedArtifact;

pub use store::{InMemoryStateStore, ProcessingStatus, StateStore};

pub use security_log::{
    DetectionSink, EventSink, FileEventSink, InMemorySink, NoopDetectionSink, NoopSink,
    SecurityIncident, Severity,
};

pub use tiers::{new_tier1_analyzer, new_tier2_analyzer, new_tier3_analyzer, TierAnalyzer, TierRunStats};

pub use scheduler::{active_tier, AggregateRunStats, Scheduler};

pub use cancellation::CancellationToken;

pub use config::{GeminiConfig, PipelineConfig, ProviderConfig, TimeWindowConfig};
