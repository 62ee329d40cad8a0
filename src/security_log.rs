//! C8: Security Event Log — append-only JSONL channels plus a best-effort
//! relational detections mirror.
//!
//! Grounded on spec §4.8 and the "single `EventSink` abstraction... never let
//! the DB mirror block the primary write" redesign note (spec §9).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logging::{log_error, log_warn};

/// Severity of a security detection, per spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low-severity, expected event (e.g. a user-authorized prompt edit).
    Low,
    /// Worth tracking but not urgent.
    Medium,
    /// Unauthorized change or suspicious content; needs review.
    High,
    /// Active security violation (token mismatch, injection success).
    Critical,
}

/// A single security-relevant event, written to both JSONL and the relational
/// mirror. Covers prompt changes, security incidents, and sanitization actions
/// — the three JSONL categories named in spec §4.8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Machine-readable detection kind (e.g. `replaced_prompt`, `token_mismatch`, `sql_injection`).
    pub detection_type: String,
    /// Severity classification.
    pub severity: Severity,
    /// The pattern or rule that fired, if applicable.
    pub pattern: Option<String>,
    /// A redacted/truncated sample of the offending content.
    pub sample: Option<String>,
    /// Free-form structured context.
    pub metadata: serde_json::Value,
    /// What the pipeline did in response (e.g. `rejected`, `sanitized`, `restored_canonical`).
    pub action_taken: String,
}

impl SecurityIncident {
    /// Build a prompt-registry-originated incident (C1).
    pub fn prompt_changed(prompt_name: &str, action_taken: &str, severity: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            detection_type: "prompt_change".to_string(),
            severity: parse_severity(severity),
            pattern: None,
            sample: Some(prompt_name.to_string()),
            metadata: serde_json::json!({ "prompt_name": prompt_name }),
            action_taken: action_taken.to_string(),
        }
    }

    /// Build a response-validator-originated incident (C4).
    pub fn validation_rejected(incident_type: &str, detail: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            detection_type: incident_type.to_string(),
            severity: Severity::Critical,
            pattern: None,
            sample: Some(truncate(detail, 200)),
            metadata: serde_json::Value::Null,
            action_taken: "rejected".to_string(),
        }
    }

    /// Build a sanitization-action incident (C4), one per sanitized field.
    pub fn sanitization_action(field_path: &str, action: &str, reason: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            detection_type: reason.to_string(),
            severity: Severity::Medium,
            pattern: None,
            sample: Some(field_path.to_string()),
            metadata: serde_json::json!({ "field_path": field_path }),
            action_taken: action.to_string(),
        }
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        _ => Severity::Critical,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

/// Sink for security events. Implementations must never let a failure here
/// block the primary request/response flow (spec §4.8, §9).
pub trait EventSink: Send + Sync {
    /// Record one incident.
    fn record(&self, incident: SecurityIncident);
}

/// An `EventSink` that discards everything. Useful for unit tests of
/// components that take an `EventSink` but aren't testing the log itself.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _incident: SecurityIncident) {}
}

/// An `EventSink` that records incidents in memory, for assertions in tests.
#[derive(Default)]
pub struct InMemorySink {
    incidents: Mutex<Vec<SecurityIncident>>,
}

impl InMemorySink {
    /// A fresh, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot all recorded incidents so far.
    pub fn incidents(&self) -> Vec<SecurityIncident> {
        self.incidents.lock().unwrap().clone()
    }
}

impl EventSink for InMemorySink {
    fn record(&self, incident: SecurityIncident) {
        self.incidents.lock().unwrap().push(incident);
    }
}

/// An `EventSink` that appends each incident as one JSON line to a category
/// file under a storage directory (`prompt_changes.jsonl`,
/// `security_incidents.jsonl`, `response_sanitization.jsonl`), serializing
/// appends behind a mutex per spec §5, and best-effort mirrors into a
/// `DetectionSink`. Write failures are logged, never propagated.
pub struct FileEventSink {
    path: Mutex<PathBuf>,
    mirror: Box<dyn DetectionSink>,
}

impl FileEventSink {
    /// Create a sink appending to `storage_dir/file_name`, mirroring into `mirror`.
    pub fn new(storage_dir: &Path, file_name: &str, mirror: Box<dyn DetectionSink>) -> Self {
        Self {
            path: Mutex::new(storage_dir.join(file_name)),
            mirror,
        }
    }
}

impl EventSink for FileEventSink {
    fn record(&self, incident: SecurityIncident) {
        let path = self.path.lock().unwrap();
        match serde_json::to_string(&incident) {
            Ok(line) => {
                let result = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&*path)
                    .and_then(|mut f| writeln!(f, "{line}"));
                if let Err(err) = result {
                    log_error!(
                        path = %path.display(),
                        error = %err,
                        "failed to append security event to JSONL log"
                    );
                }
            }
            Err(err) => {
                log_error!(error = %err, "failed to serialize security incident");
            }
        }
        // Best-effort DB mirror: never blocks, never panics the primary path.
        self.mirror.insert(&incident);
    }
}

/// The relational `security_detections` table mirror, per spec §4.8. A real
/// deployment implements this against its database; failures here must never
/// block the JSONL write, which is why `insert` takes `&self` and returns
/// nothing — callers can't accidentally propagate a DB error up the stack.
pub trait DetectionSink: Send + Sync {
    /// Best-effort insert of one detection row. Implementations should log
    /// and swallow errors rather than panic.
    fn insert(&self, incident: &SecurityIncident);
}

/// A `DetectionSink` that does nothing — the default when no relational
/// store is configured.
pub struct NoopDetectionSink;

impl DetectionSink for NoopDetectionSink {
    fn insert(&self, _incident: &SecurityIncident) {}
}

/// A `DetectionSink` that records rows in memory, for test assertions.
#[derive(Default)]
pub struct InMemoryDetectionSink {
    rows: Mutex<Vec<SecurityIncident>>,
}

impl InMemoryDetectionSink {
    /// A fresh, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot all recorded rows so far.
    pub fn rows(&self) -> Vec<SecurityIncident> {
        self.rows.lock().unwrap().clone()
    }
}

impl DetectionSink for InMemoryDetectionSink {
    fn insert(&self, incident: &SecurityIncident) {
        self.rows.lock().unwrap().push(incident.clone());
    }
}

/// A `DetectionSink` that always fails, for testing that mirror failures
/// never block the primary JSONL write.
pub struct AlwaysFailDetectionSink;

impl DetectionSink for AlwaysFailDetectionSink {
    fn insert(&self, incident: &SecurityIncident) {
        log_warn!(
            detection_type = %incident.detection_type,
            "simulated relational mirror failure (ignored by design)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_sink_appends_one_line_per_incident() {
        let dir = TempDir::new().unwrap();
        let mirror = Box::new(InMemoryDetectionSink::new());
        let sink = FileEventSink::new(dir.path(), "security_incidents.jsonl", mirror);

        sink.record(SecurityIncident::validation_rejected("token_mismatch", "abc"));
        sink.record(SecurityIncident::validation_rejected("token_mismatch", "def"));

        let contents = std::fs::read_to_string(dir.path().join("security_incidents.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn mirror_failure_does_not_block_jsonl_write() {
        let dir = TempDir::new().unwrap();
        let sink = FileEventSink::new(
            dir.path(),
            "security_incidents.jsonl",
            Box::new(AlwaysFailDetectionSink),
        );
        sink.record(SecurityIncident::validation_rejected("token_mismatch", "abc"));
        let contents = std::fs::read_to_string(dir.path().join("security_incidents.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn in_memory_sink_records_in_order() {
        let sink = InMemorySink::new();
        sink.record(SecurityIncident::prompt_changed("p", "replaced_prompt", "high"));
        sink.record(SecurityIncident::prompt_changed("q", "updated_hash", "low"));
        let incidents = sink.incidents();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].sample.as_deref(), Some("p"));
    }
}
