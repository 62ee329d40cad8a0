//! C4 response sanitizer: the final defense layer before a validated analysis
//! result is persisted.
//!
//! Grounded nearly line-for-line on `response_sanitizer.py`'s `ResponseSanitizer`
//! — the same ordered check list (length cap, SQL injection, command
//! injection, XSS, path traversal, URL policy, null bytes, control
//! characters), the same prohibited/allowed URL field sets, and the same
//! aggregate report shape. Recurses over `serde_json::Value` instead of a
//! Python dict, and returns owned `Value`s rather than mutating in place.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::logging::log_warn;

const MAX_STRING_LENGTH: usize = 10_000;

static SQL_INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(union\s+select)",
        r"(?i)(drop\s+table)",
        r"(?i)(delete\s+from)",
        r"(?i)(insert\s+into)",
        r"(?i)(update\s+\w+\s+set)",
        r"(?i)(exec\s*\()",
        r"(?i)(execute\s+immediate)",
        r"(?i)(xp_cmdshell)",
        r"--\s*$",
        r"(?s)/\*.*\*/",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static COMMAND_INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"[;&|`$()]", r"\$\(", r"(?s)`.*`", r">\s*/"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static XSS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?i)<iframe",
        r"(?i)<embed",
        r"(?i)<object",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PATH_TRAVERSAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\.\./", r"\.\.", r"(?i)%2e%2e", r"\.\.\\"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static SUSPICIOUS_URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"https?://\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}",
        r"(?i)https?://[a-z0-9-]+\.(?:ngrok|localtunnel|serveo)\.io",
        r"(?i)https?://[a-z0-9-]+\.(?:duckdns|no-ip)\.org",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://[^\s]+").unwrap());
static BARE_URL_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://").unwrap());
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f-\x9f]").unwrap());

/// Matches an entity this module's own [`html_escape`] produces. Masked out
/// before the command-injection/SQL-comment checks run so that re-running the
/// sanitizer on its own output doesn't mistake an entity's trailing `;` for a
/// shell metacharacter — without this, `sanitize(sanitize(x)) != sanitize(x)`
/// whenever `x` triggers both the XSS and command-injection checks.
static HTML_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(?:amp|lt|gt|quot|#x27|#39);").unwrap());
static ENTITY_MASK: LazyLock<Regex> = LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap());

const URL_PROHIBITED_FIELDS: &[&str] = &[
    "skill_name",
    "industry",
    "sub_industry",
    "job_function",
    "seniority_level",
    "job_title",
    "company_name",
    "department",
];

const URL_ALLOWED_FIELDS: &[&str] = &[
    "application_link",
    "application_email",
    "company_website",
];

/// A single sanitization action, one per field that needed adjusting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationWarning {
    /// Dotted/indexed path to the field (e.g. `structured_data.skills[2]`).
    pub path: String,
    /// Human-readable description of what was found and done.
    pub message: String,
}

/// Aggregate counts over a batch of warnings, per
/// `response_sanitizer.py`'s `get_sanitization_report`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizationReport {
    /// Total number of warnings.
    pub total_warnings: usize,
    /// Warnings mentioning a SQL injection pattern.
    pub sql_injection_attempts: usize,
    /// Warnings mentioning a command injection pattern.
    pub command_injection_attempts: usize,
    /// Warnings mentioning an XSS pattern.
    pub xss_attempts: usize,
    /// Warnings mentioning a path traversal pattern.
    pub path_traversal_attempts: usize,
    /// Warnings mentioning a suspicious (allowed-field) URL.
    pub suspicious_urls: usize,
    /// Warnings mentioning an unauthorized (prohibited-field) URL.
    pub unauthorized_urls: usize,
}

/// Build the aggregate report for a batch of warnings.
pub fn sanitization_report(warnings: &[SanitizationWarning]) -> SanitizationReport {
    let mut report = SanitizationReport {
        total_warnings: warnings.len(),
        ..Default::default()
    };
    for w in warnings {
        if w.message.contains("SQL injection") {
            report.sql_injection_attempts += 1;
        }
        if w.message.contains("Command injection") {
            report.command_injection_attempts += 1;
        }
        if w.message.contains("XSS") {
            report.xss_attempts += 1;
        }
        if w.message.contains("Path traversal") {
            report.path_traversal_attempts += 1;
        }
        if w.message.contains("Suspicious URL") {
            report.suspicious_urls += 1;
        }
        if w.message.contains("Unauthorized URL") {
            report.unauthorized_urls += 1;
        }
    }
    report
}

/// Recursively sanitize an entire analysis result. Idempotent: running this
/// twice on its own output produces no further warnings.
pub fn sanitize_value(job_id: &str, value: &Value) -> (Value, Vec<SanitizationWarning>) {
    let mut warnings = Vec::new();
    let sanitized = sanitize_field("", value, job_id, "$", &mut warnings);
    if !warnings.is_empty() {
        log_warn!(
            job_id = %job_id,
            warning_count = warnings.len(),
            "response sanitization found and corrected issues"
        );
    }
    (sanitized, warnings)
}

fn sanitize_field(key: &str, value: &Value, job_id: &str, path: &str, warnings: &mut Vec<SanitizationWarning>) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(sanitize_string(key, s, job_id, path, warnings)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| sanitize_field(key, item, job_id, &format!("{path}[{i}]"), warnings))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let nested_path = format!("{path}.{k}");
                    (k.clone(), sanitize_field(k, v, job_id, &nested_path, warnings))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sanitize_string(
    key: &str,
    value: &str,
    _job_id: &str,
    path: &str,
    warnings: &mut Vec<SanitizationWarning>,
) -> String {
    let mut value = value.to_string();

    if value.len() > MAX_STRING_LENGTH {
        let original_len = value.len();
        value.truncate(MAX_STRING_LENGTH);
        warnings.push(SanitizationWarning {
            path: path.to_string(),
            message: format!(
                "String truncated from {original_len} to {MAX_STRING_LENGTH} chars"
            ),
        });
    }

    let mut masked_entities: Vec<String> = Vec::new();
    let mut value = HTML_ENTITY
        .replace_all(&value, |caps: &regex::Captures| {
            masked_entities.push(caps[0].to_string());
            format!("\u{E000}{}\u{E001}", masked_entities.len() - 1)
        })
        .into_owned();

    for pattern in SQL_INJECTION_PATTERNS.iter() {
        if pattern.is_match(&value) {
            warnings.push(SanitizationWarning {
                path: path.to_string(),
                message: format!("SQL injection pattern detected: {} - STRIPPED", pattern.as_str()),
            });
            value = pattern.replace_all(&value, "[REMOVED]").into_owned();
        }
    }

    for pattern in COMMAND_INJECTION_PATTERNS.iter() {
        if pattern.is_match(&value) {
            warnings.push(SanitizationWarning {
                path: path.to_string(),
                message: "Command injection pattern detected - STRIPPED".to_string(),
            });
            value = pattern.replace_all(&value, "").into_owned();
        }
    }

    for pattern in XSS_PATTERNS.iter() {
        if pattern.is_match(&value) {
            warnings.push(SanitizationWarning {
                path: path.to_string(),
                message: "XSS pattern detected - ESCAPED".to_string(),
            });
            value = html_escape(&value);
            break;
        }
    }

    for pattern in PATH_TRAVERSAL_PATTERNS.iter() {
        if pattern.is_match(&value) {
            warnings.push(SanitizationWarning {
                path: path.to_string(),
                message: "Path traversal pattern detected - STRIPPED".to_string(),
            });
            value = pattern.replace_all(&value, "").into_owned();
        }
    }

    if URL_PROHIBITED_FIELDS.contains(&key) {
        if BARE_URL_PREFIX.is_match(&value) {
            warnings.push(SanitizationWarning {
                path: path.to_string(),
                message: "Unauthorized URL detected in prohibited field - STRIPPED".to_string(),
            });
            value = URL_PATTERN.replace_all(&value, "[URL_REMOVED]").into_owned();
        }
    } else if URL_ALLOWED_FIELDS.contains(&key) {
        let urls: Vec<String> = URL_PATTERN.find_iter(&value).map(|m| m.as_str().to_string()).collect();
        for url in urls {
            if is_suspicious_url(&url) {
                let sample: String = url.chars().take(50).collect();
                warnings.push(SanitizationWarning {
                    path: path.to_string(),
                    message: format!("Suspicious URL detected: {sample}... - STRIPPED"),
                });
                value = value.replace(&url, "[SUSPICIOUS_URL_REMOVED]");
            }
        }
    }

    if value.contains('\0') {
        warnings.push(SanitizationWarning {
            path: path.to_string(),
            message: "Null byte detected - STRIPPED".to_string(),
        });
        value = value.replace('\0', "");
    }

    if CONTROL_CHARS.is_match(&value) {
        warnings.push(SanitizationWarning {
            path: path.to_string(),
            message: "Control characters detected - STRIPPED".to_string(),
        });
        value = CONTROL_CHARS.replace_all(&value, "").into_owned();
    }

    if !masked_entities.is_empty() {
        value = ENTITY_MASK
            .replace_all(&value, |caps: &regex::Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| masked_entities.get(idx).cloned())
                    .unwrap_or_default()
            })
            .into_owned();
    }

    value
}

fn html_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn is_suspicious_url(url: &str) -> bool {
    if SUSPICIOUS_URL_PATTERNS.iter().any(|p| p.is_match(url)) {
        return true;
    }
    let Ok(parsed) = url::Url::parse(url) else {
        return true;
    };
    match parsed.host_str() {
        Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0") => true,
        Some(host) => host.starts_with("10.") || host.starts_with("172.16.") || host.starts_with("192.168."),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_sql_injection_pattern() {
        let input = json!({ "note": "'; DROP TABLE jobs; --" });
        let (sanitized, warnings) = sanitize_value("job-1", &input);
        assert!(!warnings.is_empty());
        assert!(sanitized["note"].as_str().unwrap().contains("[REMOVED]"));
    }

    #[test]
    fn escapes_xss_script_tags() {
        let input = json!({ "note": "<script>alert(1)</script>" });
        let (sanitized, warnings) = sanitize_value("job-1", &input);
        assert!(warnings.iter().any(|w| w.message.contains("XSS")));
        assert!(!sanitized["note"].as_str().unwrap().contains("<script>"));
    }

    #[test]
    fn strips_url_from_prohibited_field() {
        let input = json!({ "industry": "see https://evil.example.com for details" });
        let (sanitized, warnings) = sanitize_value("job-1", &input);
        assert!(warnings.iter().any(|w| w.message.contains("Unauthorized URL")));
        assert!(!sanitized["industry"].as_str().unwrap().contains("https://"));
    }

    #[test]
    fn flags_suspicious_url_in_allowed_field_but_keeps_normal_ones() {
        let suspicious = json!({ "application_link": "https://127.0.0.1/apply" });
        let (_, warnings) = sanitize_value("job-1", &suspicious);
        assert!(warnings.iter().any(|w| w.message.contains("Suspicious URL")));

        let normal = json!({ "application_link": "https://careers.example.com/apply" });
        let (_, warnings) = sanitize_value("job-1", &normal);
        assert!(warnings.is_empty());
    }

    #[test]
    fn strips_null_bytes_and_control_chars() {
        let input = json!({ "note": "clean\u{0000}text\u{0007}" });
        let (sanitized, warnings) = sanitize_value("job-1", &input);
        assert!(!warnings.is_empty());
        assert_eq!(sanitized["note"].as_str().unwrap(), "cleantext");
    }

    #[test]
    fn sanitization_is_idempotent() {
        let input = json!({ "note": "<script>x()</script>; DROP TABLE jobs;" });
        let (once, _) = sanitize_value("job-1", &input);
        let (twice, warnings_twice) = sanitize_value("job-1", &once);
        assert_eq!(once, twice);
        assert!(warnings_twice.is_empty());
    }

    /// HTML-escaping turns `<`/`>` into entities ending in `;`; without
    /// masking, the command-injection check would treat that trailing `;` as
    /// a shell metacharacter on the next pass and strip it, corrupting the
    /// entity and producing fresh warnings every time the value is
    /// re-sanitized (e.g. re-validating an already-persisted artifact).
    #[test]
    fn reprocessing_escaped_entities_does_not_corrupt_or_rewarn() {
        let input = json!({ "note": "<iframe src=evil.test>click</iframe>" });
        let (once, warnings_once) = sanitize_value("job-1", &input);
        assert!(!warnings_once.is_empty());
        let note = once["note"].as_str().unwrap();
        assert!(note.contains("&lt;iframe"), "expected an escaped entity in the output: {note}");

        let (twice, warnings_twice) = sanitize_value("job-1", &once);
        assert_eq!(once, twice);
        assert!(warnings_twice.is_empty(), "re-sanitizing already-escaped output should be a no-op");
    }

    #[test]
    fn recurses_into_nested_arrays_and_objects() {
        let input = json!({
            "structured_data": {
                "ats_optimization": {
                    "keywords": [
                        { "keyword": "owns `rm -rf /`", "keyword_category": "tooling" }
                    ]
                }
            }
        });
        let (sanitized, warnings) = sanitize_value("job-1", &input);
        assert!(!warnings.is_empty());
        let keyword = sanitized["structured_data"]["ats_optimization"]["keywords"][0]["keyword"]
            .as_str()
            .unwrap();
        assert!(!keyword.contains('`'));
    }

    #[test]
    fn report_counts_each_category() {
        let warnings = vec![
            SanitizationWarning { path: "a".into(), message: "SQL injection pattern detected: x - STRIPPED".into() },
            SanitizationWarning { path: "b".into(), message: "XSS pattern detected - ESCAPED".into() },
            SanitizationWarning { path: "c".into(), message: "Unauthorized URL detected in prohibited field - STRIPPED".into() },
        ];
        let report = sanitization_report(&warnings);
        assert_eq!(report.total_warnings, 3);
        assert_eq!(report.sql_injection_attempts, 1);
        assert_eq!(report.xss_attempts, 1);
        assert_eq!(report.unauthorized_urls, 1);
    }
}
