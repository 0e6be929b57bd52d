//! Feedback System
//! Mission: collect human/validation/performance feedback per entity and
//! incorporate it into lightweight learning models using three strategies
//! (supervised, reinforcement, batch). Emits a parallel observation into
//! the pattern engine on submit — feedback depends on patterns, never the
//! other way around.
//!
//! Learning-rate constants and insight rules are grounded in
//! `original_source/shared/feedback_incorporation.cpp`.

pub mod model;

use crate::config::FeedbackConfig;
use crate::pattern::{PatternDataPoint, PatternEngine};
use crate::registry::{HandlerError, Response};
use model::{
    FeedbackData, FeedbackInsight, FeedbackStats, LearningModel, LearningStrategy,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

const SUPERVISED_LEARNING_RATE: f64 = 0.01;
const REINFORCEMENT_LEARNING_RATE: f64 = 0.001;
const BATCH_LEARNING_RATE: f64 = 0.05;
const BATCH_MIN_SAMPLES: usize = 3;
const INSIGHT_POSITIVE_THRESHOLD: f64 = 0.3;
const INSIGHT_NEGATIVE_THRESHOLD: f64 = -0.3;
const MAX_FEEDBACK_WINDOW: usize = 100;

pub struct FeedbackSystem {
    config: FeedbackConfig,
    entity_feedback: Mutex<HashMap<String, VecDeque<FeedbackData>>>,
    models: Mutex<HashMap<String, LearningModel>>,
    pattern_engine: Arc<PatternEngine>,
    total_feedback: AtomicU64,
    running: Arc<AtomicBool>,
}

impl FeedbackSystem {
    pub fn new(config: FeedbackConfig, pattern_engine: Arc<PatternEngine>) -> Self {
        Self {
            config,
            entity_feedback: Mutex::new(HashMap::new()),
            models: Mutex::new(HashMap::new()),
            pattern_engine,
            total_feedback: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Record a feedback event, emit a parallel pattern observation, and
    /// (when configured for real-time learning) immediately update models
    /// for significant feedback.
    pub fn submit(&self, feedback: FeedbackData) {
        let target = feedback.target_entity.clone();
        let significant = feedback.is_significant(self.config.confidence_threshold);

        {
            let mut buffers = self.entity_feedback.lock();
            let buffer = buffers.entry(target.clone()).or_default();
            buffer.push_back(feedback.clone());
            while buffer.len() > self.config.max_per_entity {
                buffer.pop_front();
            }
        }
        self.total_feedback.fetch_add(1, Ordering::Relaxed);

        self.pattern_engine.add_data_point(PatternDataPoint::new(
            target.clone(),
            [("feedback_score".to_string(), feedback.score)]
                .into_iter()
                .collect(),
            [("event_tag".to_string(), "feedback_received".to_string())]
                .into_iter()
                .collect(),
        ));

        if self.config.real_time_learning && significant {
            self.apply_learning(Some(&target));
        }
    }

    fn snapshot(&self, entity_id: &str) -> Vec<FeedbackData> {
        self.entity_feedback
            .lock()
            .get(entity_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run all three learning strategies for one entity, or every buffered
    /// entity when `entity_id` is `None`.
    pub fn apply_learning(&self, entity_id: Option<&str>) {
        let entities: Vec<String> = {
            let buffers = self.entity_feedback.lock();
            match entity_id {
                Some(id) => vec![id.to_string()],
                None => buffers.keys().cloned().collect(),
            }
        };

        for entity in entities {
            let feedback = self.snapshot(&entity);
            if feedback.len() < self.config.min_for_learning as usize {
                continue;
            }
            self.apply_supervised(&entity, &feedback);
            self.apply_reinforcement(&entity, &feedback);
            self.apply_batch(&entity, &feedback);
        }
    }

    /// Decision models: for every `factor_*_weight` key present in a
    /// sample's metadata, nudge that parameter by `weight(f) * score * eta`
    /// (eta 0.01), clamped to [-1, 1]. Accuracy is the mean absolute score
    /// across the whole batch.
    fn apply_supervised(&self, entity_id: &str, feedback: &[FeedbackData]) {
        let mut model = self.load_or_create(entity_id, "decision", LearningStrategy::Supervised);
        for sample in feedback {
            let update = sample.weight() * sample.score * SUPERVISED_LEARNING_RATE;
            for key in sample.metadata.keys() {
                if key.starts_with("factor_") && key.contains("_weight") {
                    let param = model.parameters.entry(key.clone()).or_insert(0.0);
                    *param = (*param + update).clamp(-1.0, 1.0);
                }
            }
        }

        let mean_abs_score = feedback.iter().map(|f| f.score.abs()).sum::<f64>() / feedback.len() as f64;
        model.accuracy = mean_abs_score.min(1.0);
        model.sample_count = feedback.len() as u32;
        model.last_trained_at = chrono::Utc::now();
        self.push_significant_window(&mut model, feedback);
        self.store(model);
    }

    /// Behavior models: reinforcement learning where the reward is
    /// `mean(weight(f) * score)` over the batch; the `policy` parameter
    /// shifts by `reward * 0.001`, clamped to [0, 1], and accuracy drifts by
    /// `0.1 * reward`.
    fn apply_reinforcement(&self, entity_id: &str, feedback: &[FeedbackData]) {
        let mut model = self.load_or_create(entity_id, "behavior", LearningStrategy::Reinforcement);
        let reward = feedback.iter().map(|f| f.weight() * f.score).sum::<f64>() / feedback.len() as f64;
        let policy = model.parameters.entry("policy".to_string()).or_insert(0.5);
        *policy = (*policy + REINFORCEMENT_LEARNING_RATE * reward).clamp(0.0, 1.0);
        model.accuracy = (model.accuracy + 0.1 * reward).clamp(0.0, 1.0);
        model.sample_count = feedback.len() as u32;
        model.last_trained_at = chrono::Utc::now();
        self.push_significant_window(&mut model, feedback);
        self.store(model);
    }

    /// Risk models: batch learning grouped by `meta.param_*` key, requiring
    /// at least 3 samples per group, rate 0.05, parameters clamped to
    /// [0, 1]. Accuracy is `0.5` plus the mean absolute parameter update
    /// across every group seen (trained or not).
    fn apply_batch(&self, entity_id: &str, feedback: &[FeedbackData]) {
        let mut by_param: HashMap<String, Vec<f64>> = HashMap::new();
        for sample in feedback {
            for key in sample.metadata.keys() {
                if key.starts_with("param_") {
                    by_param.entry(key.clone()).or_default().push(sample.score);
                }
            }
        }
        if by_param.is_empty() {
            return;
        }

        let mut model = self.load_or_create(entity_id, "risk", LearningStrategy::Batch);
        let mut trained_any = false;
        let mut total_improvement = 0.0;
        for (param, scores) in &by_param {
            if scores.len() < BATCH_MIN_SAMPLES {
                continue;
            }
            trained_any = true;
            let mean_score = scores.iter().sum::<f64>() / scores.len() as f64;
            let update = mean_score * BATCH_LEARNING_RATE;
            let value = model.parameters.entry(param.clone()).or_insert(0.0);
            *value = (*value + update).clamp(0.0, 1.0);
            total_improvement += update.abs();
        }

        if trained_any {
            model.accuracy = (0.5 + total_improvement / by_param.len() as f64).min(1.0);
            model.sample_count = feedback.len() as u32;
            model.last_trained_at = chrono::Utc::now();
            self.push_significant_window(&mut model, feedback);
            self.store(model);
        }
    }

    fn push_significant_window(&self, model: &mut LearningModel, feedback: &[FeedbackData]) {
        for sample in feedback {
            if sample.is_significant(self.config.confidence_threshold) {
                model.push_feedback_window(sample.clone(), MAX_FEEDBACK_WINDOW);
            }
        }
    }

    fn load_or_create(&self, entity_id: &str, model_type: &str, strategy: LearningStrategy) -> LearningModel {
        let key = format!("model_{entity_id}_{model_type}");
        self.models
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| LearningModel::new(entity_id, model_type, strategy))
    }

    fn store(&self, model: LearningModel) {
        self.models.lock().insert(model.id.clone(), model);
    }

    /// Sentiment/suggestion insight for one entity over the trailing
    /// `days_back` days. Insight rules: avg score above +0.3 is positive
    /// (continue current strategy), below -0.3 is negative (review
    /// parameters), and a human-feedback volume more than double the
    /// system-feedback volume suggests increasing automation.
    pub fn analyze_feedback_patterns(&self, entity_id: &str, days_back: i64) -> FeedbackInsight {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days_back);
        let feedback: Vec<FeedbackData> = self
            .snapshot(entity_id)
            .into_iter()
            .filter(|f| f.timestamp >= cutoff)
            .collect();

        if feedback.is_empty() {
            return FeedbackInsight {
                entity_id: entity_id.to_string(),
                sentiment: "neutral".to_string(),
                suggestion: "insufficient feedback to form an insight".to_string(),
                average_score: 0.0,
                sample_count: 0,
            };
        }

        let average_score = feedback.iter().map(|f| f.score).sum::<f64>() / feedback.len() as f64;
        let human_count = feedback
            .iter()
            .filter(|f| matches!(f.kind, model::FeedbackKind::Human))
            .count();
        let system_count = feedback
            .iter()
            .filter(|f| matches!(f.kind, model::FeedbackKind::System))
            .count();

        let mut suggestions = Vec::new();
        let sentiment = if average_score > INSIGHT_POSITIVE_THRESHOLD {
            suggestions.push("continue current strategy".to_string());
            "positive"
        } else if average_score < INSIGHT_NEGATIVE_THRESHOLD {
            suggestions.push("review parameters".to_string());
            "negative"
        } else {
            "neutral"
        };

        if system_count > 0 && human_count as f64 > 2.0 * system_count as f64 {
            suggestions.push("increase automation".to_string());
        }
        if suggestions.is_empty() {
            suggestions.push("no action indicated".to_string());
        }

        FeedbackInsight {
            entity_id: entity_id.to_string(),
            sentiment: sentiment.to_string(),
            suggestion: suggestions.join("; "),
            average_score,
            sample_count: feedback.len() as u32,
        }
    }

    pub fn get_feedback_stats(&self) -> FeedbackStats {
        let buffers = self.entity_feedback.lock();
        let all_scores: Vec<f64> = buffers.values().flat_map(|b| b.iter().map(|f| f.score)).collect();
        let average_score = if all_scores.is_empty() {
            0.0
        } else {
            all_scores.iter().sum::<f64>() / all_scores.len() as f64
        };

        FeedbackStats {
            total_feedback: self.total_feedback.load(Ordering::Relaxed),
            total_models: self.models.lock().len() as u64,
            average_score,
            active_entities: buffers.len() as u64,
        }
    }

    pub fn export_feedback_data(&self) -> Vec<FeedbackData> {
        self.entity_feedback
            .lock()
            .values()
            .flat_map(|b| b.iter().cloned())
            .collect()
    }

    pub fn list_models(&self) -> Vec<LearningModel> {
        self.models.lock().values().cloned().collect()
    }

    /// Spawn the periodic batch-learning worker. Runs until `shutdown`.
    pub fn start_background_worker(self: &Arc<Self>) {
        let system = self.clone();
        let interval = std::time::Duration::from_secs(self.config.worker_interval_minutes * 60);
        tokio::spawn(async move {
            while system.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !system.running.load(Ordering::SeqCst) {
                    break;
                }
                system.apply_learning(None);
                info!("feedback system background pass complete");
            }
        });
    }
}

pub async fn handle_submit_feedback(
    system: Arc<FeedbackSystem>,
    req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    let feedback: FeedbackData = req.body_json()?;
    system.submit(feedback);
    Ok(Response::no_content())
}

pub async fn handle_feedback_stats(
    system: Arc<FeedbackSystem>,
    _req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    Ok(Response::json(200, &system.get_feedback_stats()))
}

pub async fn handle_export_feedback(
    system: Arc<FeedbackSystem>,
    _req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    Ok(Response::json(200, &system.export_feedback_data()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternConfig;

    fn system() -> FeedbackSystem {
        let pattern_engine = Arc::new(PatternEngine::new(PatternConfig {
            min_occurrences: 5,
            min_confidence: 0.7,
            retention_hours: 168,
            real_time_analysis: false,
            batch_interval: 100,
            cleanup_interval_minutes: 30,
        }));
        FeedbackSystem::new(
            FeedbackConfig {
                max_per_entity: 1_000,
                retention_hours: 168,
                min_for_learning: 3,
                confidence_threshold: 0.7,
                real_time_learning: false,
                batch_interval: 50,
                worker_interval_minutes: 15,
            },
            pattern_engine,
        )
    }

    #[test]
    fn submit_increments_stats_and_buffers() {
        let sys = system();
        sys.submit(FeedbackData::from_performance("entity-1", 0.4));
        let stats = sys.get_feedback_stats();
        assert_eq!(stats.total_feedback, 1);
        assert_eq!(stats.active_entities, 1);
    }

    #[test]
    fn supervised_learning_builds_decision_model() {
        let sys = system();
        for _ in 0..5 {
            sys.submit(FeedbackData::from_human("reviewer-1", "entity-1", "decision-1", true, None, None));
        }
        sys.apply_learning(Some("entity-1"));
        let models = sys.list_models();
        let decision_model = models.iter().find(|m| m.model_type == "decision").unwrap();
        assert!(decision_model.accuracy > 0.0);
        assert_eq!(decision_model.sample_count, 5);
    }

    #[test]
    fn supervised_learning_only_updates_factor_weight_keys_and_fills_window() {
        let sys = system();
        for _ in 0..5 {
            let mut feedback = FeedbackData::from_human("reviewer-1", "entity-1", "decision-1", true, None, None);
            feedback.metadata.insert("factor_amount_weight".to_string(), "x".to_string());
            feedback.metadata.insert("unrelated_key".to_string(), "x".to_string());
            sys.submit(feedback);
        }
        sys.apply_learning(Some("entity-1"));
        let models = sys.list_models();
        let decision_model = models.iter().find(|m| m.model_type == "decision").unwrap();
        assert!(decision_model.parameters.contains_key("factor_amount_weight"));
        assert!(!decision_model.parameters.contains_key("unrelated_key"));
        assert_eq!(decision_model.feedback_window.len(), 5);
    }

    fn performance_with_param(entity: &str, score: f64) -> FeedbackData {
        let mut feedback = FeedbackData::from_performance(entity, score);
        feedback.metadata.insert("param_threshold".to_string(), "watched".to_string());
        feedback
    }

    #[test]
    fn batch_learning_requires_minimum_samples_per_param_group() {
        let sys = system();
        sys.submit(performance_with_param("entity-2", 0.5));
        sys.submit(performance_with_param("entity-2", 0.5));
        sys.apply_learning(Some("entity-2"));
        assert!(sys.list_models().iter().all(|m| m.model_type != "risk"));

        sys.submit(performance_with_param("entity-2", 0.5));
        sys.apply_learning(Some("entity-2"));
        let risk_model = sys.list_models().into_iter().find(|m| m.model_type == "risk").unwrap();
        assert!(risk_model.parameters.contains_key("param_threshold"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submit_and_add_data_point_do_not_deadlock() {
        // Stress the two lock-acquisition paths that touch the same entity
        // from both sides of the feedback/pattern boundary: `submit` locks
        // `entity_feedback` then reaches into the pattern engine's own
        // `entity_buffers` lock, while a caller adding data points directly
        // only ever takes the pattern engine's lock. Neither path holds one
        // lock while blocking on the other, so arbitrary interleaving must
        // complete instead of deadlocking.
        let pattern_engine = Arc::new(PatternEngine::new(PatternConfig {
            min_occurrences: 5,
            min_confidence: 0.7,
            retention_hours: 168,
            real_time_analysis: true,
            batch_interval: 100,
            cleanup_interval_minutes: 30,
        }));
        let sys = Arc::new(FeedbackSystem::new(
            FeedbackConfig {
                max_per_entity: 1_000,
                retention_hours: 168,
                min_for_learning: 3,
                confidence_threshold: 0.7,
                real_time_learning: true,
                batch_interval: 50,
                worker_interval_minutes: 15,
            },
            pattern_engine.clone(),
        ));

        let mut handles = Vec::new();
        for i in 0..50 {
            let sys = sys.clone();
            handles.push(tokio::spawn(async move {
                sys.submit(FeedbackData::from_performance("entity-stress", (i % 10) as f64 / 10.0));
            }));
            let engine = pattern_engine.clone();
            handles.push(tokio::spawn(async move {
                engine.add_data_point(PatternDataPoint::new(
                    "entity-stress".to_string(),
                    [("n".to_string(), i as f64)].into_iter().collect(),
                    HashMap::new(),
                ));
            }));
        }

        let deadline = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            for handle in handles {
                handle.await.unwrap();
            }
        });
        assert!(deadline.await.is_ok(), "concurrent submit/add_data_point mix did not complete in time");
        assert_eq!(sys.get_feedback_stats().total_feedback, 50);
    }

    #[test]
    fn insight_rules_detect_positive_and_negative_sentiment() {
        let sys = system();
        for _ in 0..5 {
            sys.submit(FeedbackData::from_human("reviewer-1", "entity-3", "decision-1", true, None, None));
        }
        let insight = sys.analyze_feedback_patterns("entity-3", 30);
        assert_eq!(insight.sentiment, "positive");

        let sys = system();
        for _ in 0..5 {
            sys.submit(FeedbackData::from_human("reviewer-1", "entity-4", "decision-1", false, None, None));
        }
        let insight = sys.analyze_feedback_patterns("entity-4", 30);
        assert_eq!(insight.sentiment, "negative");
    }
}
