//! C1: Prompt Registry — canonical template storage and SHA-256 hash
//! compare/replace.
//!
//! Grounded on `original_source/.../prompt_security_manager.py`
//! (`register_prompt`, `validate_and_handle_prompt`, `_normalize_prompt_for_hashing`)
//! and `prompt_validation_systems.py`'s System 1 (hash-the-template-then-replace).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logging::{log_info, log_warn};
use crate::security_log::{EventSink, SecurityIncident};

/// Who originated a prompt change, per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// A human operator edited the prompt deliberately; changes are allowed.
    User,
    /// An automated agent produced the runtime prompt; unauthorized changes are auto-replaced.
    Agent,
    /// The system itself (e.g. a deployment) produced the prompt.
    System,
}

impl ChangeSource {
    fn is_trusted(self) -> bool {
        matches!(self, ChangeSource::User)
    }
}

/// One entry in the persisted hash registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// SHA-256 hex digest of the normalized template.
    pub hash: String,
    /// When this name was first registered.
    pub registered_at: DateTime<Utc>,
    /// When the hash was last updated.
    pub last_updated: DateTime<Utc>,
    /// Who performed the last update.
    pub last_updated_by: ChangeSource,
}

static SECURITY_TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SEC_TOKEN_[A-Za-z0-9]{32}").unwrap());
static TIMESTAMP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap());
static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static JOB_COUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Analyze these \d+ job postings").unwrap());
static DESCRIPTION_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)DESCRIPTION:.*?---").unwrap());
static TITLE_BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"TITLE:.*?\n").unwrap());
static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize prompt text into a structurally stable form for hashing
/// (spec §4.1). Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let step1 = SECURITY_TOKEN_PATTERN.replace_all(text, "SEC_TOKEN_PLACEHOLDER");
    let step2 = TIMESTAMP_PATTERN.replace_all(&step1, "TIMESTAMP_PLACEHOLDER");
    let step3 = UUID_PATTERN.replace_all(&step2, "UUID_PLACEHOLDER");
    let step4 = JOB_COUNT_PATTERN.replace_all(&step3, "Analyze these N job postings");
    let step5 = DESCRIPTION_BLOCK_PATTERN.replace_all(&step4, "DESCRIPTION: PLACEHOLDER\n---");
    let step6 = TITLE_BLOCK_PATTERN.replace_all(&step5, "TITLE: PLACEHOLDER\n");
    let step7 = WHITESPACE_PATTERN.replace_all(&step6, " ");
    step7.trim().to_string()
}

/// SHA-256 hex digest of the normalized form of `text`.
pub fn hash_prompt(text: &str) -> String {
    let normalized = normalize(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// C1: the prompt hash registry. One instance per deployment, shared via `&`
/// (interior mutability) since it is read on every prompt use and written
/// rarely — spec §5's read/write lock guidance.
pub struct PromptRegistry {
    entries: std::sync::RwLock<HashMap<String, RegistryEntry>>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    /// An empty registry. Per spec §4.1, registry-load failures also produce
    /// an empty registry — first use simply re-registers.
    pub fn new() -> Self {
        Self {
            entries: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Load a registry from a previously serialized entry map (e.g. read from
    /// `storage/prompt_hashes.json`).
    pub fn from_entries(entries: HashMap<String, RegistryEntry>) -> Self {
        Self {
            entries: std::sync::RwLock::new(entries),
        }
    }

    /// Snapshot the current entries, e.g. for persisting to disk.
    pub fn snapshot(&self) -> HashMap<String, RegistryEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Register `template_text` as the canonical template for `name`, computing
    /// and storing its hash. Returns the computed hash.
    pub fn register(&self, name: &str, template_text: &str, source: ChangeSource) -> String {
        let hash = hash_prompt(template_text);
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            name.to_string(),
            RegistryEntry {
                hash: hash.clone(),
                registered_at: now,
                last_updated: now,
                last_updated_by: source,
            },
        );
        log_info!(prompt_name = name, hash = %hash, "registered canonical prompt");
        hash
    }

    /// Core C1 operation. Contract (spec §4.1):
    /// - unknown name: register as canonical, return `(current_text, false)`.
    /// - hash matches: return `(current_text, false)`.
    /// - `source == User`: update stored hash, return `(current_text, false)`.
    /// - `source` agent/system: fetch canonical via `canonical_getter`; if its
    ///   hash matches the stored hash, return `(canonical, true)`; else treat
    ///   the canonical as a legitimate code update, register it, return
    ///   `(canonical, true)`.
    pub fn validate_and_handle(
        &self,
        name: &str,
        current_text: &str,
        source: ChangeSource,
        canonical_getter: impl FnOnce() -> Option<String>,
        incidents: &dyn EventSink,
    ) -> (String, bool) {
        let current_hash = hash_prompt(current_text);

        let stored_hash = {
            let entries = self.entries.read().unwrap();
            entries.get(name).map(|e| e.hash.clone())
        };

        let Some(stored_hash) = stored_hash else {
            self.register(name, current_text, source);
            return (current_text.to_string(), false);
        };

        if current_hash == stored_hash {
            return (current_text.to_string(), false);
        }

        if source.is_trusted() {
            self.update_hash(name, &current_hash, source);
            log_info!(prompt_name = name, "prompt hash updated by trusted user change");
            incidents.record(SecurityIncident::prompt_changed(name, "updated_hash", "low"));
            return (current_text.to_string(), false);
        }

        // Untrusted (agent/system) source: attempt canonical restore.
        match canonical_getter() {
            Some(canonical) => {
                let canonical_hash = hash_prompt(&canonical);
                if canonical_hash == stored_hash {
                    log_warn!(
                        prompt_name = name,
                        "untrusted prompt change detected; restored canonical text"
                    );
                    incidents.record(SecurityIncident::prompt_changed(
                        name,
                        "replaced_prompt",
                        "high",
                    ));
                } else {
                    // The canonical text itself changed (a legitimate code update).
                    self.register(name, &canonical, source);
                    incidents.record(SecurityIncident::prompt_changed(
                        name,
                        "registered_new_canonical",
                        "high",
                    ));
                }
                (canonical, true)
            }
            None => {
                // Availability over strictness: keep serving the current text.
                log_warn!(
                    prompt_name = name,
                    "canonical prompt retrieval failed; serving current text unchanged"
                );
                incidents.record(SecurityIncident::prompt_changed(
                    name,
                    "canonical_retrieval_failed",
                    "high",
                ));
                (current_text.to_string(), false)
            }
        }
    }

    fn update_hash(&self, name: &str, new_hash: &str, source: ChangeSource) {
        let mut entries = self.entries.write().unwrap();
        let now = Utc::now();
        entries
            .entry(name.to_string())
            .and_modify(|e| {
                e.hash = new_hash.to_string();
                e.last_updated = now;
                e.last_updated_by = source;
            })
            .or_insert_with(|| RegistryEntry {
                hash: new_hash.to_string(),
                registered_at: now,
                last_updated: now,
                last_updated_by: source,
            });
    }
}
