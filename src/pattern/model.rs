//! Pattern engine data model.
//! Grounded in `original_source/shared/pattern_recognition.hpp`'s
//! `PatternDataPoint`/`DiscoveredPattern` shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDataPoint {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub numerical_features: HashMap<String, f64>,
    pub categorical_features: HashMap<String, String>,
    pub raw_data: serde_json::Value,
}

impl PatternDataPoint {
    pub fn new(
        entity_id: String,
        numerical_features: HashMap<String, f64>,
        categorical_features: HashMap<String, String>,
    ) -> Self {
        Self {
            entity_id,
            timestamp: Utc::now(),
            numerical_features,
            categorical_features,
            raw_data: serde_json::Value::Null,
        }
    }

    /// Convenience constructor mirroring `create_data_point_from_decision`
    /// in the original source: decision outcomes become data points whose
    /// factor weights are the analyzed features.
    pub fn from_decision(entity_id: &str, decision_type: &str, factors: HashMap<String, f64>) -> Self {
        let mut categorical = HashMap::new();
        categorical.insert("decision_type".to_string(), decision_type.to_string());
        Self::new(entity_id.to_string(), factors, categorical)
    }

    /// Mirrors `create_data_point_from_activity`.
    pub fn from_activity(entity_id: &str, behavior_type: &str, value: f64) -> Self {
        let mut numerical = HashMap::new();
        numerical.insert("behavior_value".to_string(), value);
        let mut categorical = HashMap::new();
        categorical.insert("behavior_type".to_string(), behavior_type.to_string());
        Self::new(entity_id.to_string(), numerical, categorical)
    }

    /// Mirrors `create_data_point_from_event`.
    pub fn from_event(entity_id: &str, event_tag: &str, numerical_features: HashMap<String, f64>) -> Self {
        let mut categorical = HashMap::new();
        categorical.insert("event_tag".to_string(), event_tag.to_string());
        Self::new(entity_id.to_string(), numerical_features, categorical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn from_strength(strength: f64) -> Self {
        if strength >= 0.9 {
            Confidence::VeryHigh
        } else if strength >= 0.75 {
            Confidence::High
        } else if strength >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Decision,
    Behavior,
    Anomaly,
    Trend,
    Correlation,
    Sequence,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Decision => "decision",
            PatternKind::Behavior => "behavior",
            PatternKind::Anomaly => "anomaly",
            PatternKind::Trend => "trend",
            PatternKind::Correlation => "correlation",
            PatternKind::Sequence => "sequence",
        }
    }
}

/// Kind-specific payload. Tagged by the enclosing `Pattern.kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payloadType", rename_all = "camelCase")]
pub enum PatternPayload {
    Decision { decision_type: String, factor: String },
    Behavior { behavior_type: String, mean: f64, stddev: f64 },
    Anomaly { feature: String, zscore: f64 },
    Trend { metric: String, slope: f64, r2: f64, direction: String },
    Correlation { feature_a: String, feature_b: String, coefficient: f64, sample_size: usize },
    Sequence { first: String, second: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: PatternKind,
    pub confidence: Confidence,
    pub impact: Impact,
    pub strength: f64,
    pub occurrences: u32,
    pub discovered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub payload: PatternPayload,
}

impl Pattern {
    /// `pattern_<kind>_<entityId>_<epochMillis>`, taken directly from
    /// `generate_pattern_id` in the original source.
    /// Deterministic on `(kind, entity_id, discriminator)` rather than a
    /// timestamp, so two patterns discovered in the same analysis pass
    /// never collide on id and silently overwrite one another.
    pub fn generate_id(kind: PatternKind, entity_id: &str, discriminator: &str) -> String {
        format!("pattern_{}_{}_{}", kind.as_str(), entity_id, discriminator)
    }

    pub fn is_significant(&self, min_confidence: f64, min_occurrences: u32) -> bool {
        self.strength >= min_confidence && self.occurrences >= min_occurrences
    }
}

/// A `(pattern, relevance)` pair returned by `PatternEngine::apply`.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedPattern {
    pub pattern: Pattern,
    pub relevance: f64,
}

/// Snapshot used by `GET /patterns/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStats {
    pub total_data_points: u64,
    pub total_patterns: u64,
    pub active_entities: u64,
    pub patterns_by_kind: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_id_scheme_matches_convention() {
        let id = Pattern::generate_id(PatternKind::Anomaly, "entity-1", "amount#0");
        assert_eq!(id, "pattern_anomaly_entity-1_amount#0");
    }

    #[test]
    fn confidence_tiers_are_ordered() {
        assert_eq!(Confidence::from_strength(0.95), Confidence::VeryHigh);
        assert_eq!(Confidence::from_strength(0.8), Confidence::High);
        assert_eq!(Confidence::from_strength(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_strength(0.1), Confidence::Low);
    }

    #[test]
    fn significance_requires_both_strength_and_occurrences() {
        let pattern = Pattern {
            id: "p1".to_string(),
            name: "n".to_string(),
            description: "d".to_string(),
            kind: PatternKind::Trend,
            confidence: Confidence::High,
            impact: Impact::Low,
            strength: 0.8,
            occurrences: 3,
            discovered_at: Utc::now(),
            last_updated: Utc::now(),
            metadata: HashMap::new(),
            payload: PatternPayload::Trend {
                metric: "m".to_string(),
                slope: 0.02,
                r2: 0.9,
                direction: "increasing".to_string(),
            },
        };
        assert!(!pattern.is_significant(0.7, 5));
        assert!(pattern.is_significant(0.7, 3));
    }
}
