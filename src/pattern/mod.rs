//! Pattern Engine
//! Mission: a process-wide, mutex-guarded feature extractor and analyzer.
//! Entities push numeric/categorical observations; six analyzers turn
//! accumulated history into discovered patterns that downstream handlers
//! (decisions, regulatory monitor, feedback) can query and apply.
//!
//! Analyzer thresholds are grounded in
//! `original_source/shared/pattern_recognition.cpp`.

pub mod model;
pub mod stats;

use crate::config::PatternConfig;
use crate::registry::{HandlerError, Response};
pub use model::{
    AnalysisStats, AppliedPattern, Confidence, Impact, Pattern, PatternDataPoint, PatternKind,
    PatternPayload,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

const MAX_BUFFER_PER_ENTITY: usize = 10_000;
const MIN_SAMPLES_FOR_CORRELATION: usize = 10;
const MIN_SAMPLES_FOR_STABILITY: usize = 10;
const CORRELATION_THRESHOLD: f64 = 0.5;
const STABILITY_CV_THRESHOLD: f64 = 0.2;
const TREND_SLOPE_THRESHOLD: f64 = 0.01;
const ANOMALY_Z_THRESHOLD: f64 = 3.0;
const ANOMALY_CRITICAL_Z_THRESHOLD: f64 = 5.0;
const APPLY_RELEVANCE_THRESHOLD: f64 = 0.3;
const DECISION_STRENGTH_DIVISOR: f64 = 100.0;

pub struct PatternEngine {
    config: PatternConfig,
    entity_buffers: Mutex<HashMap<String, VecDeque<PatternDataPoint>>>,
    patterns: Mutex<HashMap<String, Pattern>>,
    total_points: AtomicU64,
    running: Arc<AtomicBool>,
}

impl PatternEngine {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            entity_buffers: Mutex::new(HashMap::new()),
            patterns: Mutex::new(HashMap::new()),
            total_points: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// O(1), non-blocking: push onto the entity's bounded ring buffer,
    /// evicting the oldest point once it exceeds `MAX_BUFFER_PER_ENTITY`.
    pub fn add_data_point(&self, point: PatternDataPoint) {
        let mut buffers = self.entity_buffers.lock();
        let buffer = buffers.entry(point.entity_id.clone()).or_default();
        buffer.push_back(point);
        while buffer.len() > MAX_BUFFER_PER_ENTITY {
            buffer.pop_front();
        }
        self.total_points.fetch_add(1, Ordering::Relaxed);

        if self.config.real_time_analysis {
            let entity_id = buffer.back().map(|p| p.entity_id.clone());
            drop(buffers);
            if let Some(entity_id) = entity_id {
                self.analyze(Some(&entity_id));
            }
        }
    }

    /// Run all six analyzers, either for one entity or every buffered one.
    pub fn analyze(&self, entity_id: Option<&str>) {
        let entities: Vec<String> = {
            let buffers = self.entity_buffers.lock();
            match entity_id {
                Some(id) => vec![id.to_string()],
                None => buffers.keys().cloned().collect(),
            }
        };

        for entity in entities {
            self.analyze_decision(&entity);
            self.analyze_behavior(&entity);
            self.analyze_anomaly(&entity);
            self.analyze_trend(&entity);
            self.analyze_correlation(&entity);
            self.analyze_sequence(&entity);
        }
    }

    fn snapshot(&self, entity_id: &str) -> Vec<PatternDataPoint> {
        self.entity_buffers
            .lock()
            .get(entity_id)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decision patterns: recurring `decision_type` choices. Strength scales
    /// with occurrence count, capped at 1.0 past 100 occurrences.
    fn analyze_decision(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for point in &points {
            if let Some(decision_type) = point.categorical_features.get("decision_type") {
                *counts.entry(decision_type.clone()).or_insert(0) += 1;
            }
        }

        for (decision_type, count) in counts {
            if count < self.config.min_occurrences {
                continue;
            }
            let strength = (count as f64 / DECISION_STRENGTH_DIVISOR).min(1.0);
            if strength < self.config.min_confidence {
                continue;
            }
            self.upsert_pattern(
                entity_id,
                PatternKind::Decision,
                &decision_type.clone(),
                format!("Recurring {decision_type} decisions"),
                format!("{entity_id} has made {count} {decision_type} decisions"),
                strength,
                count,
                PatternPayload::Decision {
                    decision_type: decision_type.clone(),
                    factor: decision_type,
                },
            );
        }
    }

    /// Behavior patterns: a feature whose coefficient of variation is low
    /// enough to call "stable".
    fn analyze_behavior(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in &points {
            for (feature, value) in &point.numerical_features {
                series.entry(feature.clone()).or_default().push(*value);
            }
        }

        for (feature, values) in series {
            if values.len() < MIN_SAMPLES_FOR_STABILITY {
                continue;
            }
            let cv = stats::coefficient_of_variation(&values);
            if cv >= STABILITY_CV_THRESHOLD {
                continue;
            }
            let strength = (1.0 - cv).clamp(0.0, 1.0);
            if strength < self.config.min_confidence {
                continue;
            }
            self.upsert_pattern(
                entity_id,
                PatternKind::Behavior,
                &feature.clone(),
                format!("Stable {feature} behavior"),
                format!("{entity_id}'s {feature} shows low variability (cv={cv:.3})"),
                strength,
                values.len() as u32,
                PatternPayload::Behavior {
                    behavior_type: feature,
                    mean: stats::mean(&values),
                    stddev: stats::stddev(&values),
                },
            );
        }
    }

    /// Anomaly patterns: baseline is the first 80% of a feature's history,
    /// checked against the last 20%. `|z| > 3` is an anomaly, `|z| > 5` is
    /// critical impact.
    fn analyze_anomaly(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in &points {
            for (feature, value) in &point.numerical_features {
                series.entry(feature.clone()).or_default().push(*value);
            }
        }

        for (feature, values) in series {
            if values.len() < MIN_SAMPLES_FOR_STABILITY {
                continue;
            }
            let split = (values.len() as f64 * 0.8) as usize;
            let (baseline, recent) = values.split_at(split.max(1).min(values.len() - 1));
            for (idx, value) in recent.iter().enumerate() {
                let z = stats::zscore(*value, baseline);
                if z.abs() <= ANOMALY_Z_THRESHOLD {
                    continue;
                }
                let strength = (z.abs() / 5.0).min(1.0);
                if strength < self.config.min_confidence {
                    continue;
                }
                let impact = if z.abs() > ANOMALY_CRITICAL_Z_THRESHOLD {
                    Impact::Critical
                } else {
                    Impact::High
                };
                self.upsert_pattern_with_impact(
                    entity_id,
                    PatternKind::Anomaly,
                    &format!("{feature}#{idx}"),
                    format!("{feature} anomaly"),
                    format!("{entity_id}'s {feature} deviates from baseline (z={z:.2})"),
                    strength,
                    1,
                    impact,
                    PatternPayload::Anomaly {
                        feature: feature.clone(),
                        zscore: z,
                    },
                );
            }
        }
    }

    /// Trend patterns: OLS slope of a feature's time series.
    fn analyze_trend(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in &points {
            for (feature, value) in &point.numerical_features {
                series.entry(feature.clone()).or_default().push(*value);
            }
        }

        for (feature, values) in series {
            if values.len() < MIN_SAMPLES_FOR_STABILITY {
                continue;
            }
            let (slope, r2) = stats::linear_regression_slope_r2(&values);
            if slope.abs() <= TREND_SLOPE_THRESHOLD {
                continue;
            }
            let strength = r2.clamp(0.0, 1.0);
            if strength < self.config.min_confidence {
                continue;
            }
            let direction = if slope > 0.0 { "increasing" } else { "decreasing" };
            self.upsert_pattern(
                entity_id,
                PatternKind::Trend,
                &feature.clone(),
                format!("{feature} is {direction}"),
                format!("{entity_id}'s {feature} trend: slope={slope:.4}, r2={r2:.3}"),
                strength,
                values.len() as u32,
                PatternPayload::Trend {
                    metric: feature,
                    slope,
                    r2,
                    direction: direction.to_string(),
                },
            );
        }
    }

    /// Correlation patterns: Pearson correlation between every pair of
    /// numerical features with enough joint samples.
    fn analyze_correlation(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in &points {
            for (feature, value) in &point.numerical_features {
                series.entry(feature.clone()).or_default().push(*value);
            }
        }

        let features: Vec<String> = series.keys().cloned().collect();
        for i in 0..features.len() {
            for j in (i + 1)..features.len() {
                let xs = &series[&features[i]];
                let ys = &series[&features[j]];
                let n = xs.len().min(ys.len());
                if n < MIN_SAMPLES_FOR_CORRELATION {
                    continue;
                }
                let r = stats::pearson(&xs[..n], &ys[..n]);
                if r.abs() <= CORRELATION_THRESHOLD {
                    continue;
                }
                let strength = r.abs();
                if strength < self.config.min_confidence {
                    continue;
                }
                let (lo, hi) = if features[i] <= features[j] {
                    (&features[i], &features[j])
                } else {
                    (&features[j], &features[i])
                };
                self.upsert_pattern(
                    entity_id,
                    PatternKind::Correlation,
                    &format!("{lo}|{hi}"),
                    format!("{} correlates with {}", features[i], features[j]),
                    format!("r={r:.3} over {n} joint samples"),
                    strength,
                    n as u32,
                    PatternPayload::Correlation {
                        feature_a: features[i].clone(),
                        feature_b: features[j].clone(),
                        coefficient: r,
                        sample_size: n,
                    },
                );
            }
        }
    }

    /// Sequence patterns: recurring adjacent pairs of `event_tag`/
    /// `decision_type`/`behavior_type` categorical markers.
    fn analyze_sequence(&self, entity_id: &str) {
        let points = self.snapshot(entity_id);
        let tags: Vec<String> = points
            .iter()
            .filter_map(|p| {
                p.categorical_features
                    .get("event_tag")
                    .or_else(|| p.categorical_features.get("decision_type"))
                    .or_else(|| p.categorical_features.get("behavior_type"))
                    .cloned()
            })
            .collect();

        if tags.len() < 2 {
            return;
        }

        let mut pair_counts: HashMap<(String, String), u32> = HashMap::new();
        for window in tags.windows(2) {
            let pair = (window[0].clone(), window[1].clone());
            *pair_counts.entry(pair).or_insert(0) += 1;
        }

        for ((first, second), count) in pair_counts {
            if count < self.config.min_occurrences {
                continue;
            }
            let strength = (count as f64 / DECISION_STRENGTH_DIVISOR).min(1.0).max(0.5);
            if strength < self.config.min_confidence {
                continue;
            }
            self.upsert_pattern(
                entity_id,
                PatternKind::Sequence,
                &format!("{first}->{second}"),
                format!("{first} is usually followed by {second}"),
                format!("observed {count} times for {entity_id}"),
                strength,
                count,
                PatternPayload::Sequence { first, second },
            );
        }
    }

    fn upsert_pattern(
        &self,
        entity_id: &str,
        kind: PatternKind,
        discriminator: &str,
        name: String,
        description: String,
        strength: f64,
        occurrences: u32,
        payload: PatternPayload,
    ) {
        self.upsert_pattern_with_impact(
            entity_id,
            kind,
            discriminator,
            name,
            description,
            strength,
            occurrences,
            Impact::Medium,
            payload,
        );
    }

    /// Dedup key is `(kind, entity_id, discriminator)`: the discriminator
    /// carries whatever the payload varies over (decision_type, feature
    /// name, ordered feature pair, metric, bigram) so an analyzer that
    /// emits several patterns of the same kind for one entity doesn't
    /// clobber its own output.
    fn upsert_pattern_with_impact(
        &self,
        entity_id: &str,
        kind: PatternKind,
        discriminator: &str,
        name: String,
        description: String,
        strength: f64,
        occurrences: u32,
        impact: Impact,
        payload: PatternPayload,
    ) {
        let mut patterns = self.patterns.lock();
        let key = format!("{}:{}:{}", kind.as_str(), entity_id, discriminator);
        let existing_id = patterns
            .values()
            .find(|p| p.metadata.get("key").map(String::as_str) == Some(key.as_str()))
            .map(|p| p.id.clone());

        let now = chrono::Utc::now();
        if let Some(id) = existing_id {
            if let Some(pattern) = patterns.get_mut(&id) {
                pattern.strength = strength;
                pattern.occurrences = occurrences;
                pattern.confidence = Confidence::from_strength(strength);
                pattern.impact = impact;
                pattern.last_updated = now;
                pattern.description = description;
                pattern.payload = payload;
                return;
            }
        }

        let id = Pattern::generate_id(kind, entity_id, discriminator);
        let mut metadata = HashMap::new();
        metadata.insert("entity_id".to_string(), entity_id.to_string());
        metadata.insert("key".to_string(), key);

        let pattern = Pattern {
            id: id.clone(),
            name,
            description,
            kind,
            confidence: Confidence::from_strength(strength),
            impact,
            strength,
            occurrences,
            discovered_at: now,
            last_updated: now,
            metadata,
            payload,
        };
        patterns.insert(id, pattern);
    }

    /// Patterns of `kind` (when given) with `strength >= min_confidence`,
    /// sorted strongest-first.
    pub fn get_patterns(&self, kind: Option<PatternKind>, min_confidence: f64) -> Vec<Pattern> {
        let patterns = self.patterns.lock();
        let mut matched: Vec<Pattern> = patterns
            .values()
            .filter(|p| kind.map_or(true, |k| p.kind == k))
            .filter(|p| p.strength >= min_confidence)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        matched
    }

    pub fn get_pattern(&self, id: &str) -> Option<Pattern> {
        self.patterns.lock().get(id).cloned()
    }

    /// Returns the patterns relevant to a fresh data point, paired with a
    /// relevance score, above the 0.3 cutoff and sorted descending.
    pub fn apply(&self, point: &PatternDataPoint) -> Vec<AppliedPattern> {
        let patterns = self.patterns.lock();
        let mut applied: Vec<AppliedPattern> = patterns
            .values()
            .filter(|p| p.metadata.get("entity_id").map(String::as_str) == Some(point.entity_id.as_str()))
            .filter_map(|p| {
                let relevance = Self::relevance(p, point);
                (relevance > APPLY_RELEVANCE_THRESHOLD).then(|| AppliedPattern {
                    pattern: p.clone(),
                    relevance,
                })
            })
            .collect();
        applied.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        applied
    }

    fn relevance(pattern: &Pattern, point: &PatternDataPoint) -> f64 {
        match &pattern.payload {
            PatternPayload::Decision { decision_type, .. } => {
                if point.categorical_features.get("decision_type") == Some(decision_type) {
                    pattern.strength
                } else {
                    0.0
                }
            }
            PatternPayload::Behavior { behavior_type, .. }
            | PatternPayload::Trend { metric: behavior_type, .. }
            | PatternPayload::Anomaly { feature: behavior_type, .. } => {
                if point.numerical_features.contains_key(behavior_type) {
                    pattern.strength
                } else {
                    0.0
                }
            }
            PatternPayload::Correlation { feature_a, feature_b, .. } => {
                if point.numerical_features.contains_key(feature_a)
                    && point.numerical_features.contains_key(feature_b)
                {
                    pattern.strength
                } else {
                    0.0
                }
            }
            PatternPayload::Sequence { first, .. } => {
                let tag = point
                    .categorical_features
                    .get("event_tag")
                    .or_else(|| point.categorical_features.get("decision_type"))
                    .or_else(|| point.categorical_features.get("behavior_type"));
                if tag == Some(first) {
                    pattern.strength
                } else {
                    0.0
                }
            }
        }
    }

    /// Drops patterns that have not been updated within `retention_hours`
    /// and trims any entity buffer older than the retention window.
    pub fn cleanup_old_data(&self) {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(self.config.retention_hours);

        self.patterns.lock().retain(|_, p| p.last_updated >= cutoff);

        let mut buffers = self.entity_buffers.lock();
        for buffer in buffers.values_mut() {
            while buffer.front().map(|p| p.timestamp < cutoff).unwrap_or(false) {
                buffer.pop_front();
            }
        }
        buffers.retain(|_, buffer| !buffer.is_empty());
    }

    pub fn get_analysis_stats(&self) -> AnalysisStats {
        let patterns = self.patterns.lock();
        let buffers = self.entity_buffers.lock();

        let mut patterns_by_kind: HashMap<String, u64> = HashMap::new();
        for pattern in patterns.values() {
            *patterns_by_kind.entry(pattern.kind.as_str().to_string()).or_insert(0) += 1;
        }

        AnalysisStats {
            total_data_points: self.total_points.load(Ordering::Relaxed),
            total_patterns: patterns.len() as u64,
            active_entities: buffers.len() as u64,
            patterns_by_kind,
        }
    }

    pub fn export_patterns(&self) -> Vec<Pattern> {
        self.patterns.lock().values().cloned().collect()
    }

    /// Spawn the periodic analyze+cleanup worker. Runs until `shutdown`.
    pub fn start_background_worker(self: &Arc<Self>) {
        let engine = self.clone();
        let interval = std::time::Duration::from_secs(self.config.cleanup_interval_minutes * 60);
        tokio::spawn(async move {
            while engine.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !engine.running.load(Ordering::SeqCst) {
                    break;
                }
                engine.analyze(None);
                engine.cleanup_old_data();
                info!("pattern engine background pass complete");
            }
        });
    }
}

pub async fn handle_list_patterns(
    engine: Arc<PatternEngine>,
    req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    let kind = req.query.get("kind").map(|s| s.as_str()).and_then(parse_kind);
    let min_confidence = req
        .query
        .get("minConfidence")
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    Ok(Response::json(200, &engine.get_patterns(kind, min_confidence)))
}

pub async fn handle_pattern_stats(
    engine: Arc<PatternEngine>,
    _req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    Ok(Response::json(200, &engine.get_analysis_stats()))
}

pub async fn handle_export_patterns(
    engine: Arc<PatternEngine>,
    _req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    Ok(Response::json(200, &engine.export_patterns()))
}

fn parse_kind(s: &str) -> Option<PatternKind> {
    match s {
        "decision" => Some(PatternKind::Decision),
        "behavior" => Some(PatternKind::Behavior),
        "anomaly" => Some(PatternKind::Anomaly),
        "trend" => Some(PatternKind::Trend),
        "correlation" => Some(PatternKind::Correlation),
        "sequence" => Some(PatternKind::Sequence),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PatternConfig {
        PatternConfig {
            min_occurrences: 5,
            min_confidence: 0.7,
            retention_hours: 168,
            real_time_analysis: false,
            batch_interval: 100,
            cleanup_interval_minutes: 30,
        }
    }

    #[test]
    fn decision_pattern_emerges_after_min_occurrences() {
        let engine = PatternEngine::new(config());
        for _ in 0..100 {
            engine.add_data_point(PatternDataPoint::from_decision(
                "entity-1",
                "approve",
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-1"));
        let patterns = engine.get_patterns(Some(PatternKind::Decision), 0.7);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences, 100);
    }

    #[test]
    fn anomaly_detected_against_flat_baseline() {
        let engine = PatternEngine::new(config());
        for _ in 0..80 {
            engine.add_data_point(PatternDataPoint::new(
                "entity-2".to_string(),
                [("amount".to_string(), 1.0)].into_iter().collect(),
                HashMap::new(),
            ));
        }
        for _ in 0..20 {
            engine.add_data_point(PatternDataPoint::new(
                "entity-2".to_string(),
                [("amount".to_string(), 20.0)].into_iter().collect(),
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-2"));
        let patterns = engine.get_patterns(Some(PatternKind::Anomaly), 0.7);
        assert!(!patterns.is_empty());
        assert_eq!(patterns[0].impact, Impact::Critical);
    }

    #[test]
    fn trend_detected_on_monotonic_series() {
        let engine = PatternEngine::new(config());
        for i in 0..20 {
            engine.add_data_point(PatternDataPoint::new(
                "entity-3".to_string(),
                [("risk_score".to_string(), i as f64 * 2.0)].into_iter().collect(),
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-3"));
        let patterns = engine.get_patterns(Some(PatternKind::Trend), 0.5);
        assert!(!patterns.is_empty());
    }

    #[test]
    fn buffer_is_capped_and_evicts_oldest() {
        let engine = PatternEngine::new(config());
        for i in 0..(MAX_BUFFER_PER_ENTITY + 10) {
            engine.add_data_point(PatternDataPoint::new(
                "entity-4".to_string(),
                [("n".to_string(), i as f64)].into_iter().collect(),
                HashMap::new(),
            ));
        }
        let buffers = engine.entity_buffers.lock();
        assert_eq!(buffers.get("entity-4").unwrap().len(), MAX_BUFFER_PER_ENTITY);
    }

    #[test]
    fn apply_filters_below_relevance_threshold() {
        let engine = PatternEngine::new(config());
        for _ in 0..100 {
            engine.add_data_point(PatternDataPoint::from_decision(
                "entity-5",
                "approve",
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-5"));

        let matching = PatternDataPoint::from_decision("entity-5", "approve", HashMap::new());
        let applied = engine.apply(&matching);
        assert!(!applied.is_empty());

        let unrelated = PatternDataPoint::from_decision("entity-5", "reject", HashMap::new());
        let applied_unrelated = engine.apply(&unrelated);
        assert!(applied_unrelated.is_empty());
    }

    #[test]
    fn correlation_pattern_is_emitted_once_per_unordered_pair() {
        let engine = PatternEngine::new(config());
        for i in 0..15 {
            let x = i as f64;
            engine.add_data_point(PatternDataPoint::new(
                "entity-7".to_string(),
                [("a".to_string(), x), ("b".to_string(), x * 2.0)].into_iter().collect(),
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-7"));

        let correlations = engine.get_patterns(Some(PatternKind::Correlation), 0.0);
        assert_eq!(correlations.len(), 1, "a single (a,b) pair must yield exactly one pattern, never a mirrored (b,a)");
    }

    #[test]
    fn correlation_keeps_every_pair_among_three_features() {
        let engine = PatternEngine::new(config());
        for i in 0..15 {
            let x = i as f64;
            engine.add_data_point(PatternDataPoint::new(
                "entity-8".to_string(),
                [
                    ("a".to_string(), x),
                    ("b".to_string(), x * 2.0),
                    ("c".to_string(), x * 3.0),
                ]
                .into_iter()
                .collect(),
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-8"));

        let correlations = engine.get_patterns(Some(PatternKind::Correlation), 0.0);
        assert_eq!(
            correlations.len(),
            3,
            "three mutually correlated features must yield all three pairs, not one pattern clobbering the rest"
        );
    }

    #[test]
    fn behavior_patterns_are_kept_per_feature_not_collapsed() {
        let engine = PatternEngine::new(config());
        for _ in 0..15 {
            engine.add_data_point(PatternDataPoint::new(
                "entity-9".to_string(),
                [("steady_a".to_string(), 10.0), ("steady_b".to_string(), 20.0)]
                    .into_iter()
                    .collect(),
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-9"));

        let behaviors = engine.get_patterns(Some(PatternKind::Behavior), 0.0);
        assert_eq!(behaviors.len(), 2, "each stable feature must keep its own behavior pattern");
    }

    #[test]
    fn cleanup_drops_stale_patterns() {
        let engine = PatternEngine::new(PatternConfig {
            retention_hours: 0,
            ..config()
        });
        for _ in 0..100 {
            engine.add_data_point(PatternDataPoint::from_decision(
                "entity-6",
                "approve",
                HashMap::new(),
            ));
        }
        engine.analyze(Some("entity-6"));
        assert!(!engine.get_patterns(None, 0.0).is_empty());

        engine.cleanup_old_data();
        assert!(engine.get_patterns(None, 0.0).is_empty());
    }
}
