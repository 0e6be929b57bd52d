//! Regulatory monitoring data model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Heuristic keyword classifier for candidate severity. Grounded in the
    /// observation that regulatory notices signal urgency through a small,
    /// stable vocabulary (enforcement actions, deadlines, emergency rules).
    pub fn classify(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("emergency") || lower.contains("immediate effect") || lower.contains("enforcement action") {
            Severity::Critical
        } else if lower.contains("deadline") || lower.contains("warning") || lower.contains("penalty") {
            Severity::High
        } else if lower.contains("notice") || lower.contains("proposed rule") || lower.contains("consultation") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorySource {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub source_type: String,
    pub check_interval_minutes: u64,
    pub active: bool,
    pub consecutive_failures: u32,
    pub quarantined: bool,
    pub quarantined_until: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryChange {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub content_url: String,
    pub content_hash: String,
    pub severity: Severity,
    pub change_type: String,
    pub first_seen_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
}

/// A candidate change produced by a source-specific extractor, before
/// dedup/persistence.
#[derive(Debug, Clone)]
pub struct CandidateChange {
    pub title: String,
    pub url: String,
    pub body: String,
    pub severity: Severity,
    pub change_type: String,
}

/// Outcome counters for one scrape cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleCounters {
    pub inserted: u32,
    pub duplicated: u32,
    pub failed: u32,
}

/// Normalize title+body for hashing: lowercase, collapse whitespace, strip
/// a small set of boilerplate tokens that recur across regulator sites and
/// would otherwise perturb the hash without carrying content.
pub fn normalize(text: &str) -> String {
    const BOILERPLATE: &[&str] = &["click here", "read more", "skip to content", "all rights reserved"];

    let mut lowered = text.to_ascii_lowercase();
    for token in BOILERPLATE {
        lowered = lowered.replace(token, " ");
    }

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn content_hash(title: &str, body: &str) -> String {
    use sha2::{Digest, Sha256};
    let canonical = format!("{}\n{}", normalize(title), normalize(body));
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
