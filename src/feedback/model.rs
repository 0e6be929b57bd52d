//! Feedback system data model.
//! Grounded in `original_source/shared/feedback_incorporation.hpp`'s
//! `FeedbackData`/`LearningModel` shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Variant order is significant: derived `Ord` makes
/// `Low < Medium < High < Critical`, matching `priority >= MEDIUM` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl FeedbackPriority {
    /// Weight table from the original source's `getPriorityWeight`.
    pub fn weight(&self) -> f64 {
        match self {
            FeedbackPriority::Low => 0.5,
            FeedbackPriority::Medium => 1.0,
            FeedbackPriority::High => 2.0,
            FeedbackPriority::Critical => 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Human,
    Validation,
    Performance,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackData {
    pub id: String,
    pub kind: FeedbackKind,
    pub source_entity: String,
    pub target_entity: String,
    pub decision_id: Option<String>,
    pub context: String,
    /// Normalized to [-1, 1]: negative is corrective, positive is affirming.
    pub score: f64,
    pub priority: FeedbackPriority,
    pub text: Option<String>,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackData {
    fn new(
        kind: FeedbackKind,
        source_entity: &str,
        target_entity: &str,
        context: &str,
        score: f64,
        priority: FeedbackPriority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source_entity: source_entity.to_string(),
            target_entity: target_entity.to_string(),
            decision_id: None,
            context: context.to_string(),
            score: score.clamp(-1.0, 1.0),
            priority,
            text: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A human reviewer's approve/reject/rating on a decision. `approved`
    /// maps to +1/-1 before any explicit rating overrides it.
    pub fn from_human(
        reviewer_id: &str,
        target_entity: &str,
        decision_id: &str,
        approved: bool,
        rating: Option<f64>,
        comment: Option<&str>,
    ) -> Self {
        let score = rating.unwrap_or(if approved { 1.0 } else { -1.0 });
        let mut feedback = Self::new(
            FeedbackKind::Human,
            reviewer_id,
            target_entity,
            "human_review",
            score,
            FeedbackPriority::High,
        );
        feedback.decision_id = Some(decision_id.to_string());
        feedback.text = comment.map(str::to_string);
        feedback
    }

    /// A validation outcome: did the predicted label match ground truth.
    pub fn from_validation(target_entity: &str, predicted_correct: bool, confidence: f64) -> Self {
        let score = if predicted_correct { confidence } else { -confidence };
        Self::new(
            FeedbackKind::Validation,
            "validation_harness",
            target_entity,
            "validation_outcome",
            score,
            FeedbackPriority::Medium,
        )
    }

    /// A measured performance delta, e.g. downstream outcome quality.
    pub fn from_performance(target_entity: &str, delta: f64) -> Self {
        Self::new(
            FeedbackKind::Performance,
            "performance_monitor",
            target_entity,
            "performance_delta",
            delta,
            FeedbackPriority::Low,
        )
    }

    /// `max(0.1, 1 / (1 + ageDays))`, from `calculateRecencyWeight`.
    pub fn recency_weight(&self) -> f64 {
        let age_days = (Utc::now() - self.timestamp).num_seconds() as f64 / 86_400.0;
        (1.0 / (1.0 + age_days.max(0.0))).max(0.1)
    }

    /// Combined weight used when aggregating feedback for learning:
    /// priority weight times recency weight.
    pub fn weight(&self) -> f64 {
        self.priority.weight() * self.recency_weight()
    }

    /// Feedback below `threshold` or below medium priority doesn't move the
    /// needle enough to justify a learning pass; mirrors
    /// `is_feedback_significant` in the original.
    pub fn is_significant(&self, threshold: f64) -> bool {
        self.score.abs() >= threshold && self.priority >= FeedbackPriority::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStrategy {
    Supervised,
    Reinforcement,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningModel {
    pub id: String,
    pub model_type: String,
    pub entity_id: String,
    pub strategy: LearningStrategy,
    pub parameters: HashMap<String, f64>,
    pub accuracy: f64,
    pub sample_count: u32,
    pub last_trained_at: DateTime<Utc>,
    /// Capped ordered history of the significant feedback that trained this
    /// model, oldest first.
    pub feedback_window: VecDeque<FeedbackData>,
}

impl LearningModel {
    pub fn new(entity_id: &str, model_type: &str, strategy: LearningStrategy) -> Self {
        Self {
            id: format!("model_{entity_id}_{model_type}"),
            model_type: model_type.to_string(),
            entity_id: entity_id.to_string(),
            strategy,
            parameters: HashMap::new(),
            accuracy: 0.0,
            sample_count: 0,
            last_trained_at: Utc::now(),
            feedback_window: VecDeque::new(),
        }
    }

    /// Append significant feedback to the window, evicting the oldest entry
    /// past `cap`.
    pub fn push_feedback_window(&mut self, feedback: FeedbackData, cap: usize) {
        self.feedback_window.push_back(feedback);
        while self.feedback_window.len() > cap {
            self.feedback_window.pop_front();
        }
    }
}

/// Snapshot used by `GET /feedback/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: u64,
    pub total_models: u64,
    pub average_score: f64,
    pub active_entities: u64,
}

/// Structured insight emitted by `analyze_feedback_patterns`.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackInsight {
    pub entity_id: String,
    pub sentiment: String,
    pub suggestion: String,
    pub average_score: f64,
    pub sample_count: u32,
}
