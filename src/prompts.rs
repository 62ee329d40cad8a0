//! Canonical prompt templates and builders for the three analysis tiers.
//!
//! Each template is wrapped in `PROMPT_START`/`PROMPT_END` markers, mirroring
//! the source's file-based extraction convention (spec §4.1), even though
//! here the "file" is a compiled-in string rather than a `.py` module on
//! disk. This is also the canonical-getter source used by
//! [`crate::prompt_registry::PromptRegistry::validate_and_handle`] — see
//! DESIGN.md's Open Question resolution.

use crate::domain::{AnalysisArtifact, Job, Tier};

/// Logical name for the tier 1 prompt, used as the registry key.
pub const TIER1_PROMPT_NAME: &str = "tier1_core_prompt";
/// Logical name for the tier 2 prompt, used as the registry key.
pub const TIER2_PROMPT_NAME: &str = "tier2_enhanced_prompt";
/// Logical name for the tier 3 prompt, used as the registry key.
pub const TIER3_PROMPT_NAME: &str = "tier3_strategic_prompt";

/// Number of times the security token must be woven into a rendered prompt
/// (spec §3, `SecurityToken`: "Embedded ≥20 times in the prompt"). A single
/// banner line is trivially stripped by a hostile rewrite of the job text; a
/// verification block repeating the token this many times makes partial
/// tampering detectable by the token round-trip check in the validator (C4).
const SECURITY_TOKEN_REPEAT_COUNT: usize = 24;

fn security_token_banner(security_token: &str) -> String {
    let mut banner = String::from("SECURITY TOKEN VERIFICATION BLOCK (do not alter any line below):\n");
    for i in 0..SECURITY_TOKEN_REPEAT_COUNT {
        banner.push_str(&format!("SEC_TOKEN[{i:02}]: {security_token}\n"));
    }
    banner.push_str(
        "The security_token field in your JSON response must equal the token above, verbatim.\n",
    );
    banner
}

// PROMPT_START
const TIER1_TEMPLATE: &str = concat!(
    "{security_token_banner}",
    "Analyze these {job_count} job postings for authenticity, classification, ",
    "and ATS-optimized structured data.\n",
    "Return ONLY a JSON object: ",
    "{{\"security_token\": \"<token above, verbatim>\", \"analysis_results\": [",
    "{{\"job_id\": \"<id>\", ",
    "\"authenticity_check\": {{\"title_matches_role\": bool, \"is_authentic\": bool}}, ",
    "\"classification\": {{\"industry\": \"...\"}}, ",
    "\"structured_data\": {{\"ats_optimization\": {{\"keywords\": []}}}}",
    "}}]}}\n",
    "{jobs_text}",
);
// PROMPT_END

// PROMPT_START
const TIER2_TEMPLATE: &str = concat!(
    "{security_token_banner}",
    "Given the tier-1 analysis context below, analyze these {job_count} job postings for ",
    "stress level, red flags, and implicit requirements.\n",
    "Return ONLY a JSON object: ",
    "{{\"security_token\": \"<token above, verbatim>\", \"analysis_results\": [",
    "{{\"job_id\": \"<id>\", ",
    "\"stress_level_analysis\": {{}}, \"red_flags\": [], \"implicit_requirements\": []",
    "}}]}}\n",
    "{jobs_text}",
);
// PROMPT_END

// PROMPT_START
const TIER3_TEMPLATE: &str = concat!(
    "{security_token_banner}",
    "Given the tier-1 and tier-2 analysis context below, analyze these {job_count} job ",
    "postings for employer prestige and cover-letter angle.\n",
    "Return ONLY a JSON object: ",
    "{{\"security_token\": \"<token above, verbatim>\", \"analysis_results\": [",
    "{{\"job_id\": \"<id>\", ",
    "\"prestige_analysis\": {{}}, \"cover_letter_insight\": {{}}",
    "}}]}}\n",
    "{jobs_text}",
);
// PROMPT_END

/// Look up the canonical (compiled-in) template text for a registered prompt name.
///
/// This is the canonical getter passed to
/// [`crate::prompt_registry::PromptRegistry::validate_and_handle`].
pub fn canonical_text(name: &str) -> Option<&'static str> {
    match name {
        TIER1_PROMPT_NAME => Some(TIER1_TEMPLATE),
        TIER2_PROMPT_NAME => Some(TIER2_TEMPLATE),
        TIER3_PROMPT_NAME => Some(TIER3_TEMPLATE),
        _ => None,
    }
}

/// The logical registry name for `tier`.
pub fn prompt_name_for(tier: Tier) -> &'static str {
    match tier {
        Tier::Tier1 => TIER1_PROMPT_NAME,
        Tier::Tier2 => TIER2_PROMPT_NAME,
        Tier::Tier3 => TIER3_PROMPT_NAME,
    }
}

fn render_jobs_text(jobs: &[Job]) -> String {
    let mut out = String::new();
    for job in jobs {
        out.push_str(&format!(
            "---\nTITLE: {}\nDESCRIPTION: {}\n---\n",
            job.title, job.description
        ));
    }
    out
}

/// Render a trimmed summary of prior-tier context for a job, used by tier 2/3
/// prompt builders. Keeps only the fields spec §4.5 calls out: top skills,
/// authenticity, stress level, red flags, implicit requirements.
pub fn cumulative_context_text(prior: &[AnalysisArtifact]) -> String {
    let mut out = String::new();
    for artifact in prior {
        match artifact {
            AnalysisArtifact::Tier1(t1) => {
                let skills: Vec<&str> = t1
                    .structured_data
                    .skills
                    .iter()
                    .take(5)
                    .map(|s| s.as_str())
                    .collect();
                out.push_str(&format!(
                    "tier1: authentic={} top_skills={:?}\n",
                    t1.authenticity_check.is_authentic, skills
                ));
            }
            AnalysisArtifact::Tier2(t2) => {
                let flags: Vec<&str> = t2.red_flags.iter().take(3).map(|s| s.as_str()).collect();
                let reqs: Vec<&str> = t2
                    .implicit_requirements
                    .iter()
                    .take(3)
                    .map(|s| s.as_str())
                    .collect();
                out.push_str(&format!(
                    "tier2: stress={} red_flags={:?} implicit_requirements={:?}\n",
                    t2.stress_level_analysis, flags, reqs
                ));
            }
            AnalysisArtifact::Tier3(_) => {}
        }
    }
    out
}

/// Render any tier's template text (the canonical constant, or whatever C1's
/// `validate_and_handle` decided should be used) against a concrete batch of
/// jobs, prior-tier context, and a security token.
///
/// This is what lets the prompt registry's tamper check operate on the
/// template text alone while the tier analyzer still ends up with a fully
/// rendered, per-request prompt: `validate_and_handle` never sees dynamic
/// per-request data, only the (possibly restored) template.
pub fn render_template(
    tier: Tier,
    template: &str,
    jobs: &[Job],
    prior: &[AnalysisArtifact],
    security_token: &str,
) -> String {
    let body = template
        .replace("{security_token_banner}", &security_token_banner(security_token))
        .replace("{job_count}", &jobs.len().to_string())
        .replace("{jobs_text}", &render_jobs_text(jobs));
    match tier {
        Tier::Tier1 => body,
        Tier::Tier2 | Tier::Tier3 => {
            format!("{}\nPRIOR CONTEXT:\n{}", body, cumulative_context_text(prior))
        }
    }
}

/// Build the runtime tier-1 prompt text with the given security token embedded
/// `SECURITY_TOKEN_REPEAT_COUNT` times.
pub fn build_tier1_prompt(jobs: &[Job], security_token: &str) -> String {
    render_template(Tier::Tier1, TIER1_TEMPLATE, jobs, &[], security_token)
}

/// Build the runtime tier-2 prompt text with the given security token embedded
/// and prior-tier context folded in.
pub fn build_tier2_prompt(jobs: &[Job], prior: &[AnalysisArtifact], security_token: &str) -> String {
    render_template(Tier::Tier2, TIER2_TEMPLATE, jobs, prior, security_token)
}

/// Build the runtime tier-3 prompt text with the given security token embedded
/// and prior-tier context folded in.
pub fn build_tier3_prompt(jobs: &[Job], prior: &[AnalysisArtifact], security_token: &str) -> String {
    render_template(Tier::Tier3, TIER3_TEMPLATE, jobs, prior, security_token)
}
