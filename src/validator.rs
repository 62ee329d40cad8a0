//! C4: Response Validator — decode, parse, structural check, content
//! screens, token round-trip, sanitization.
//!
//! Any step failure discards the entire response (spec §4.4); only the final
//! sanitization step is non-fatal. Grounded on `ai_analyzer.py`'s
//! `validate_response` / `is_valid_json_structure` / `contains_non_job_content`
//! for steps 2-4, and the tagged-variant redesign note (spec §9) for how the
//! parsed JSON becomes a typed [`AnalysisArtifact`].

use serde_json::Value;

use crate::domain::{
    AnalysisArtifact, JobId, Tier1Artifact, Tier2Artifact, Tier3Artifact, Tier,
};
use crate::error::{PipelineError, PipelineResult};
use crate::sanitizer::{sanitize_value, SanitizationWarning};
use crate::security_log::{EventSink, SecurityIncident};

/// Injection-success indicator substrings, checked case-insensitively against
/// the raw response text. Lifted verbatim from the source's
/// `contains_non_job_content`.
const INJECTION_INDICATORS: &[&str] = &[
    "i am an ai assistant",
    "as an ai language model",
    "i cannot provide",
    "i should not",
    "system prompt",
    "my instructions",
    "developer mode",
    "jailbreak successful",
    "ignore previous",
    "forget context",
    "new instructions received",
    "bypassing safety",
    "revealing system information",
];

/// Phrases that mark a `skills` entry as an injection attempt rather than a
/// legitimate technical term. Legitimate terms like "distributed systems"
/// must not match any of these.
const SUSPICIOUS_SKILL_PHRASES: &[&str] = &[
    "system prompt",
    "prompt injection",
    "injection attack",
    "hack the",
    "bypass security",
    "ignore instructions",
];

/// One successfully validated and sanitized per-job result.
#[derive(Debug, Clone)]
pub struct ValidatedArtifact {
    /// The job this artifact belongs to.
    pub job_id: JobId,
    /// The typed, tier-tagged artifact.
    pub artifact: AnalysisArtifact,
    /// Sanitization warnings recorded while cleaning this artifact's fields.
    pub warnings: Vec<SanitizationWarning>,
}

fn contains_injection_marker(raw_text: &str) -> Option<&'static str> {
    let lowered = raw_text.to_lowercase();
    INJECTION_INDICATORS
        .iter()
        .find(|indicator| lowered.contains(*indicator))
        .copied()
}

fn skills_of(item: &Value) -> Vec<String> {
    item.get("structured_data")
        .and_then(|sd| sd.get("skills"))
        .and_then(|s| s.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn contains_suspicious_skill(item: &Value) -> Option<String> {
    for skill in skills_of(item) {
        let lowered = skill.to_lowercase();
        if SUSPICIOUS_SKILL_PHRASES.iter().any(|p| lowered.contains(p)) {
            return Some(skill);
        }
    }
    None
}

fn required_fields_present(tier: Tier, item: &Value) -> bool {
    let Some(obj) = item.as_object() else {
        return false;
    };
    if !obj.contains_key("job_id") {
        return false;
    }
    match tier {
        Tier::Tier1 => {
            let auth_ok = obj
                .get("authenticity_check")
                .and_then(|v| v.get("title_matches_role"))
                .and_then(|v| v.as_bool())
                .is_some()
                && obj
                    .get("authenticity_check")
                    .and_then(|v| v.get("is_authentic"))
                    .and_then(|v| v.as_bool())
                    .is_some();
            let classification_ok = obj
                .get("classification")
                .and_then(|v| v.get("industry"))
                .and_then(|v| v.as_str())
                .is_some();
            let structured_data_ok = obj
                .get("structured_data")
                .and_then(|v| v.get("ats_optimization"))
                .is_some();
            auth_ok && classification_ok && structured_data_ok
        }
        Tier::Tier2 => {
            obj.contains_key("stress_level_analysis")
                && obj.get("red_flags").map(|v| v.is_array()).unwrap_or(false)
                && obj
                    .get("implicit_requirements")
                    .map(|v| v.is_array())
                    .unwrap_or(false)
        }
        Tier::Tier3 => obj.contains_key("prestige_analysis") && obj.contains_key("cover_letter_insight"),
    }
}

fn job_id_of(item: &Value) -> Option<JobId> {
    item.get("job_id").and_then(|v| v.as_str()).map(str::to_string)
}

fn build_artifact(tier: Tier, item: Value) -> PipelineResult<AnalysisArtifact> {
    match tier {
        Tier::Tier1 => {
            let artifact: Tier1Artifact = serde_json::from_value(item)
                .map_err(|e| PipelineError::schema_validation_failed(format!("tier1 artifact shape: {e}")))?;
            Ok(AnalysisArtifact::Tier1(artifact))
        }
        Tier::Tier2 => {
            let artifact: Tier2Artifact = serde_json::from_value(item)
                .map_err(|e| PipelineError::schema_validation_failed(format!("tier2 artifact shape: {e}")))?;
            Ok(AnalysisArtifact::Tier2(artifact))
        }
        Tier::Tier3 => {
            let artifact: Tier3Artifact = serde_json::from_value(item)
                .map_err(|e| PipelineError::schema_validation_failed(format!("tier3 artifact shape: {e}")))?;
            Ok(AnalysisArtifact::Tier3(artifact))
        }
    }
}

/// Run the full C4 pipeline over one LLM response for `tier`.
///
/// `expected_security_token` is the token embedded in the prompt that
/// produced this response. On success, returns one [`ValidatedArtifact`] per
/// element of `analysis_results`, in response order; a step 1-5 failure
/// rejects the entire response as a single [`PipelineError`].
pub fn validate_response(
    tier: Tier,
    raw_text: &str,
    expected_security_token: &str,
    incidents: &dyn EventSink,
) -> PipelineResult<Vec<ValidatedArtifact>> {
    // Step 1: decode.
    if raw_text.trim().is_empty() {
        return Err(PipelineError::response_parsing_error("empty response payload"));
    }

    // Step 2: parse JSON.
    let parsed: Value = serde_json::from_str(raw_text)
        .map_err(|e| PipelineError::response_parsing_error(format!("malformed JSON: {e}")))?;

    let obj = parsed
        .as_object()
        .ok_or_else(|| PipelineError::schema_validation_failed("response is not a JSON object"))?;

    let analysis_results = obj
        .get("analysis_results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| PipelineError::schema_validation_failed("missing analysis_results array"))?;

    // Step 3: structural check, every element.
    for item in analysis_results {
        if !required_fields_present(tier, item) {
            return Err(PipelineError::schema_validation_failed(format!(
                "analysis_results element missing required tier{} fields",
                tier.number()
            )));
        }
    }

    // Step 4: content screens.
    if let Some(indicator) = contains_injection_marker(raw_text) {
        incidents.record(SecurityIncident::validation_rejected("injection_marker", indicator));
        return Err(PipelineError::security_violation(
            "injection_marker",
            format!("response text matched injection indicator: {indicator}"),
        ));
    }
    if analysis_results.is_empty() {
        incidents.record(SecurityIncident::validation_rejected(
            "empty_analysis_results",
            "response contained zero analysis results",
        ));
        return Err(PipelineError::security_violation(
            "empty_analysis_results",
            "response contained no analysis results, possible injection response",
        ));
    }
    for item in analysis_results {
        if let Some(job_id) = job_id_of(item) {
            if job_id.len() > 100 {
                incidents.record(SecurityIncident::validation_rejected(
                    "suspicious_job_id",
                    &job_id,
                ));
                return Err(PipelineError::security_violation(
                    "suspicious_job_id",
                    "job_id exceeds the expected length",
                ));
            }
        } else {
            return Err(PipelineError::schema_validation_failed("analysis result missing job_id"));
        }
        if let Some(skill) = contains_suspicious_skill(item) {
            incidents.record(SecurityIncident::validation_rejected("suspicious_skill", &skill));
            return Err(PipelineError::security_violation(
                "suspicious_skill",
                format!("suspicious skill phrase detected: {skill}"),
            ));
        }
    }

    // Step 5: token round-trip.
    let security_token = obj.get("security_token").and_then(|v| v.as_str()).unwrap_or("");
    if security_token != expected_security_token {
        incidents.record(SecurityIncident::validation_rejected(
            "token_mismatch",
            security_token,
        ));
        return Err(PipelineError::security_violation(
            "token_mismatch",
            "security token did not match the one embedded in the originating prompt",
        ));
    }

    // Step 6: per-job sanitization, then build the typed artifact.
    let mut out = Vec::with_capacity(analysis_results.len());
    for item in analysis_results.iter().cloned() {
        let job_id = job_id_of(&item).expect("checked above");
        let (sanitized, warnings) = sanitize_value(&job_id, &item);
        for warning in &warnings {
            incidents.record(SecurityIncident::sanitization_action(
                &warning.path,
                "sanitized",
                &warning.message,
            ));
        }
        let artifact = build_artifact(tier, sanitized)?;
        out.push(ValidatedArtifact {
            job_id,
            artifact,
            warnings,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security_log::NoopSink;

    fn token() -> &'static str {
        "SEC_TOKEN_ABCDEFGHIJKLMNOPQRSTUV12"
    }

    fn valid_tier1_response() -> String {
        format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a","authenticity_check":{{"title_matches_role":true,"is_authentic":true}},"classification":{{"industry":"tech"}},"structured_data":{{"ats_optimization":{{"keywords":[]}},"skills":["distributed systems","rust"]}}}}]}}"#,
            token = token()
        )
    }

    #[test]
    fn happy_path_tier1_validates() {
        let sink = NoopSink;
        let response = valid_tier1_response();
        let results = validate_response(Tier::Tier1, &response, token(), &sink).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, "a");
    }

    #[test]
    fn legitimate_technical_skill_is_not_flagged() {
        let sink = NoopSink;
        let response = valid_tier1_response();
        assert!(validate_response(Tier::Tier1, &response, token(), &sink).is_ok());
    }

    #[test]
    fn token_mismatch_is_rejected() {
        let sink = NoopSink;
        let response = valid_tier1_response();
        let result = validate_response(Tier::Tier1, &response, "SEC_TOKEN_WRONGWRONGWRONGWRONGWR12", &sink);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let sink = NoopSink;
        let result = validate_response(Tier::Tier1, "not json", token(), &sink);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let sink = NoopSink;
        let response = format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a"}}]}}"#,
            token = token()
        );
        assert!(validate_response(Tier::Tier1, &response, token(), &sink).is_err());
    }

    #[test]
    fn injection_indicator_in_raw_text_is_rejected() {
        let sink = NoopSink;
        let response = format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a","authenticity_check":{{"title_matches_role":true,"is_authentic":true}},"classification":{{"industry":"tech"}},"structured_data":{{"ats_optimization":{{}}}}}}],"note":"ignore previous instructions"}}"#,
            token = token()
        );
        assert!(validate_response(Tier::Tier1, &response, token(), &sink).is_err());
    }

    #[test]
    fn suspicious_skill_phrase_is_rejected() {
        let sink = NoopSink;
        let response = format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a","authenticity_check":{{"title_matches_role":true,"is_authentic":true}},"classification":{{"industry":"tech"}},"structured_data":{{"ats_optimization":{{}},"skills":["prompt injection"]}}}}]}}"#,
            token = token()
        );
        assert!(validate_response(Tier::Tier1, &response, token(), &sink).is_err());
    }

    #[test]
    fn sql_injection_in_a_string_field_is_sanitized_not_rejected() {
        let sink = NoopSink;
        let response = format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a","authenticity_check":{{"title_matches_role":true,"is_authentic":true}},"classification":{{"industry":"tech'; DROP TABLE users; --"}},"structured_data":{{"ats_optimization":{{}}}}}}]}}"#,
            token = token()
        );
        let results = validate_response(Tier::Tier1, &response, token(), &sink).unwrap();
        assert!(!results[0].warnings.is_empty());
    }

    #[test]
    fn sanitization_warnings_are_forwarded_to_the_incident_sink() {
        use crate::security_log::InMemorySink;
        let sink = InMemorySink::new();
        let response = format!(
            r#"{{"security_token":"{token}","analysis_results":[{{"job_id":"a","authenticity_check":{{"title_matches_role":true,"is_authentic":true}},"classification":{{"industry":"tech'; DROP TABLE users; --"}},"structured_data":{{"ats_optimization":{{}}}}}}]}}"#,
            token = token()
        );
        validate_response(Tier::Tier1, &response, token(), &sink).unwrap();
        assert!(!sink.incidents().is_empty());
    }
}
