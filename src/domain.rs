//! Core data model: jobs, tier state, and tier-tagged analysis artifacts.
//!
//! Mirrors spec §3. Artifacts are a tagged enum per tier rather than a
//! shape-sniffed `serde_json::Value`, per the "replace `isinstance` branching
//! with a tagged variant" redesign note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque job identifier. The core never constructs one; jobs are supplied by
/// the external collaborator that owns the job table.
pub type JobId = String;

/// A job posting as seen by the pipeline. Read-only from the core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    /// Opaque job identifier.
    pub id: JobId,
    /// Job title as posted.
    pub title: String,
    /// Full job description text.
    pub description: String,
    /// Posting company name.
    pub company: String,
}

/// Which of the three sequential analysis tiers a piece of state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Core authenticity + classification pass.
    Tier1,
    /// Stress/red-flag/implicit-requirement pass. Depends on tier 1.
    Tier2,
    /// Prestige + cover-letter-insight pass. Depends on tier 2.
    Tier3,
}

impl Tier {
    /// The ordinal used throughout logs and the external interface (1/2/3).
    pub fn number(self) -> u8 {
        match self {
            Tier::Tier1 => 1,
            Tier::Tier2 => 2,
            Tier::Tier3 => 3,
        }
    }

    /// The tier that must already be complete before this one may run, if any.
    pub fn prerequisite(self) -> Option<Tier> {
        match self {
            Tier::Tier1 => None,
            Tier::Tier2 => Some(Tier::Tier1),
            Tier::Tier3 => Some(Tier::Tier2),
        }
    }
}

/// Per-tier completion metadata for a single job.
///
/// Invariant (enforced by [`crate::store::StateStore`] implementations, not by
/// this type alone): `tier_k_completed ⇒ tier_{k-1}_completed` for k ∈ {2,3}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierCompletion {
    /// Whether this tier has been completed for the job.
    pub completed: bool,
    /// When the tier completed, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Output tokens spent producing the artifact.
    pub tokens_used: u32,
    /// The model that produced the artifact.
    pub model_used: String,
    /// Wall-clock time of the LLM call that produced the artifact, in milliseconds.
    pub response_time_ms: u64,
}

impl TierCompletion {
    /// A not-yet-attempted completion record.
    pub fn pending() -> Self {
        Self {
            completed: false,
            completed_at: None,
            tokens_used: 0,
            model_used: String::new(),
            response_time_ms: 0,
        }
    }
}

/// Aggregate per-job tier state, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TierState {
    /// Tier 1 completion metadata.
    pub tier1: Option<TierCompletion>,
    /// Tier 2 completion metadata.
    pub tier2: Option<TierCompletion>,
    /// Tier 3 completion metadata.
    pub tier3: Option<TierCompletion>,
}

impl TierState {
    /// Whether the given tier is marked complete.
    pub fn is_complete(&self, tier: Tier) -> bool {
        let completion = match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
            Tier::Tier3 => &self.tier3,
        };
        completion.as_ref().is_some_and(|c| c.completed)
    }

    /// Whether `tier` is eligible to run: its prerequisite (if any) is complete
    /// and it is not itself already complete.
    pub fn is_pending(&self, tier: Tier) -> bool {
        let prereq_done = tier.prerequisite().map_or(true, |p| self.is_complete(p));
        prereq_done && !self.is_complete(tier)
    }

    /// Record a tier's completion. Panics in debug builds if the prerequisite
    /// tier is not yet complete — that would violate the append-forward invariant.
    pub fn record(&mut self, tier: Tier, completion: TierCompletion) {
        debug_assert!(
            tier.prerequisite().map_or(true, |p| self.is_complete(p)),
            "recorded tier {:?} completion before its prerequisite completed",
            tier
        );
        match tier {
            Tier::Tier1 => self.tier1 = Some(completion),
            Tier::Tier2 => self.tier2 = Some(completion),
            Tier::Tier3 => self.tier3 = Some(completion),
        }
    }
}

/// Tier 1 structured result: authenticity + classification + ATS structured data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticityCheck {
    /// Whether the posted title matches the described role.
    pub title_matches_role: bool,
    /// Whether the posting is judged to be an authentic job (not a scam/spam listing).
    pub is_authentic: bool,
}

/// Tier 1 industry/function classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    /// Primary industry classification.
    pub industry: String,
    /// Industry sub-category, if determined.
    #[serde(default)]
    pub sub_industry: Option<String>,
    /// Job function (e.g. "engineering", "sales").
    #[serde(default)]
    pub job_function: Option<String>,
    /// Seniority level (e.g. "senior", "entry").
    #[serde(default)]
    pub seniority_level: Option<String>,
}

/// ATS (applicant tracking system) keyword optimization data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AtsOptimization {
    /// Extracted ATS keywords and their category.
    ///
    /// The source implementation used both `keyword_type` and `keyword_category`
    /// inconsistently across files; this crate standardizes on `keyword_category`.
    #[serde(default)]
    pub keywords: Vec<AtsKeyword>,
}

/// A single ATS keyword with its category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AtsKeyword {
    /// The keyword text.
    pub keyword: String,
    /// Category the keyword was classified under.
    pub keyword_category: String,
}

/// Tier 1 structured data, nested under `structured_data` in the raw response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StructuredData {
    /// ATS optimization keywords.
    #[serde(default)]
    pub ats_optimization: AtsOptimization,
    /// Skills explicitly mentioned in the posting.
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Tier 1 analysis artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier1Artifact {
    /// Authenticity signals.
    pub authenticity_check: AuthenticityCheck,
    /// Industry/function classification.
    pub classification: Classification,
    /// ATS and skill structured data.
    pub structured_data: StructuredData,
}

/// Tier 2 analysis artifact: stress, red flags, implicit requirements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier2Artifact {
    /// Assessed stress level of the role, 0.0-1.0 or a categorical label depending on prompt version.
    pub stress_level_analysis: serde_json::Value,
    /// Red flags detected in the posting (e.g. unrealistic scope, vague compensation).
    pub red_flags: Vec<String>,
    /// Requirements implied but not stated outright.
    pub implicit_requirements: Vec<String>,
}

/// Tier 3 analysis artifact: prestige signal and cover-letter angle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier3Artifact {
    /// Employer/role prestige analysis.
    pub prestige_analysis: serde_json::Value,
    /// Suggested cover-letter angle derived from the posting.
    pub cover_letter_insight: serde_json::Value,
}

/// Per-request round-trip security token (spec §3, §4.1): a random
/// 32-character alphanumeric string prefixed `SEC_TOKEN_`, embedded in the
/// prompt and required verbatim in the response's `security_token` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    const PREFIX: &'static str = "SEC_TOKEN_";
    const RANDOM_LEN: usize = 32;
    const ALPHABET: &'static [u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    /// Generate a fresh token for one outgoing LLM request.
    pub fn generate() -> Self {
        let random: String = (0..Self::RANDOM_LEN)
            .map(|_| Self::ALPHABET[fastrand::usize(..Self::ALPHABET.len())] as char)
            .collect();
        Self(format!("{}{random}", Self::PREFIX))
    }

    /// The token text as embedded in the prompt and expected back in the response.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecurityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tier-tagged analysis artifact. Replaces shape-sniffing on the raw JSON:
/// the validator branches once at parse time (spec §9) and everything
/// downstream matches on this enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "tier")]
pub enum AnalysisArtifact {
    /// Tier 1 result.
    Tier1(Tier1Artifact),
    /// Tier 2 result.
    Tier2(Tier2Artifact),
    /// Tier 3 result.
    Tier3(Tier3Artifact),
}

impl AnalysisArtifact {
    /// Which tier produced this artifact.
    pub fn tier(&self) -> Tier {
        match self {
            AnalysisArtifact::Tier1(_) => Tier::Tier1,
            AnalysisArtifact::Tier2(_) => Tier::Tier2,
            AnalysisArtifact::Tier3(_) => Tier::Tier3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_state_starts_with_only_tier1_pending() {
        let state = TierState::default();
        assert!(state.is_pending(Tier::Tier1));
        assert!(!state.is_pending(Tier::Tier2));
        assert!(!state.is_pending(Tier::Tier3));
    }

    #[test]
    fn completing_tier1_unblocks_tier2() {
        let mut state = TierState::default();
        state.record(Tier::Tier1, TierCompletion::pending());
        // `pending()` has completed=false, so recording it should not unblock tier2.
        assert!(!state.is_pending(Tier::Tier2));

        let mut completion = TierCompletion::pending();
        completion.completed = true;
        state.record(Tier::Tier1, completion);
        assert!(state.is_pending(Tier::Tier2));
        assert!(!state.is_pending(Tier::Tier1));
    }

    #[test]
    #[should_panic]
    fn recording_tier2_before_tier1_violates_invariant() {
        let mut state = TierState::default();
        let mut completion = TierCompletion::pending();
        completion.completed = true;
        state.record(Tier::Tier2, completion);
    }

    #[test]
    fn security_tokens_carry_the_expected_prefix_and_length() {
        let token = SecurityToken::generate();
        assert!(token.as_str().starts_with("SEC_TOKEN_"));
        assert_eq!(token.as_str().len(), "SEC_TOKEN_".len() + 32);
    }

    #[test]
    fn security_tokens_are_not_trivially_repeated() {
        let a = SecurityToken::generate();
        let b = SecurityToken::generate();
        assert_ne!(a.as_str(), b.as_str());
    }
}
