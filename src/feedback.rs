//! Feedback processor: evaluates outcomes, derives learning signals, updates
//! per-action history and the two external sinks, and answers
//! recommendation/trend queries. Grounded on the original
//! `feedback_processor.py`.

use crate::external::{DeltaLearner, HistoricalMemoryStore};
use crate::model::{FeedbackSignal, FeedbackTiming, Payload};
use crate::ring::RingBuffer;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionEvaluation {
    pub success_rate: f64,
    pub execution_time: f64,
    pub user_satisfaction: f64,
    pub context_adequacy: f64,
    pub timeliness: f64,
    pub resource_efficiency: f64,
}

impl ActionEvaluation {
    pub fn overall_score(&self) -> f64 {
        (self.success_rate
            + self.execution_time
            + self.user_satisfaction
            + self.context_adequacy
            + self.timeliness
            + self.resource_efficiency)
            / 6.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LearningSignalKind {
    PositiveReinforcement,
    NegativeCorrection,
    ErrorRecovery,
    StrategyOptimization,
}

fn choose_signal_kind(score: f64, success: bool) -> LearningSignalKind {
    if score > 0.8 && success {
        LearningSignalKind::PositiveReinforcement
    } else if !success {
        LearningSignalKind::NegativeCorrection
    } else if score < 0.5 {
        LearningSignalKind::ErrorRecovery
    } else {
        LearningSignalKind::StrategyOptimization
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub action_type: String,
    pub feedback_count: u64,
    pub success_count: u64,
    #[serde(skip)]
    pub recent_scores: Option<RingBuffer<f64>>,
    pub average_score: f64,
    pub last_feedback_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAdjustment {
    pub action_type: String,
    pub adjustment_type: String,
    pub value: f64,
    pub expected_outcome: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub action_type: String,
    pub average_score: f64,
    pub priority: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedbackConfig {
    pub recent_scores_capacity: usize,
    pub strategy_adjustments_capacity: usize,
    pub recommendation_threshold: f64,
    pub min_feedback_for_adjustment: u64,
    pub min_feedback_for_recommendation: u64,
    pub min_scores_for_trend: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            recent_scores_capacity: 100,
            strategy_adjustments_capacity: 100,
            recommendation_threshold: 0.7,
            min_feedback_for_adjustment: 3,
            min_feedback_for_recommendation: 5,
            min_scores_for_trend: 10,
        }
    }
}

/// Document shape for the best-effort persisted history (spec.md §6).
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedHistory {
    history: Vec<PersistedHistoryEntry>,
    strategy_adjustments: Vec<StrategyAdjustment>,
    counters: PersistedCounters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedHistoryEntry {
    action_type: String,
    feedback_count: u64,
    success_count: u64,
    average_score: f64,
    last_feedback_time: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCounters {
    sink_errors: u64,
}

#[derive(Debug, Default, Clone)]
pub struct FeedbackMetrics {
    pub evaluated: u64,
    pub sink_errors: u64,
}

pub struct FeedbackProcessor {
    config: FeedbackConfig,
    history: DashMap<String, ActionHistoryEntry>,
    adjustments: Mutex<RingBuffer<StrategyAdjustment>>,
    memory_store: Option<Arc<dyn HistoricalMemoryStore>>,
    delta_learner: Option<Arc<dyn DeltaLearner>>,
    sink_errors: AtomicU64,
    evaluated: AtomicU64,
}

impl FeedbackProcessor {
    pub fn new(
        config: FeedbackConfig,
        memory_store: Option<Arc<dyn HistoricalMemoryStore>>,
        delta_learner: Option<Arc<dyn DeltaLearner>>,
    ) -> Self {
        let adjustments_capacity = config.strategy_adjustments_capacity;
        Self {
            config,
            history: DashMap::new(),
            adjustments: Mutex::new(RingBuffer::new(adjustments_capacity)),
            memory_store,
            delta_learner,
            sink_errors: AtomicU64::new(0),
            evaluated: AtomicU64::new(0),
        }
    }

    /// Serializes feedback through this single entry point, matching
    /// spec.md's "serializes feedback via an internal queue" (the
    /// processor's own `&self` calls are already serialized by each
    /// component's caller awaiting them one at a time; no extra queue is
    /// needed given the orchestrator already dispatches signals serially
    /// per spec.md §5 "the Feedback Processor is strictly serial").
    pub async fn submit(&self, signal: FeedbackSignal, success: bool) {
        let execution_time_ms = signal
            .payload
            .get("execution_time_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(50.0);

        let evaluation = ActionEvaluation {
            success_rate: if success { 1.0 } else { 0.0 },
            execution_time: execution_time_score(execution_time_ms),
            user_satisfaction: signal.magnitude,
            context_adequacy: 0.7,
            timeliness: if signal.timing == FeedbackTiming::Immediate { 1.0 } else { 0.7 },
            resource_efficiency: 0.8,
        };
        let score = evaluation.overall_score();
        self.evaluated.fetch_add(1, Ordering::Relaxed);

        let action_type = action_kind_for(&signal);
        self.update_history(&action_type, score, success, signal.timestamp);

        let kind = choose_signal_kind(score, success);
        self.update_sinks(&action_type, &signal, success, score, kind).await;
        self.maybe_adjust_strategy(&action_type, success).await;
    }

    fn update_history(&self, action_type: &str, score: f64, success: bool, now: DateTime<Utc>) {
        let mut entry = self.history.entry(action_type.to_string()).or_insert_with(|| ActionHistoryEntry {
            action_type: action_type.to_string(),
            feedback_count: 0,
            success_count: 0,
            recent_scores: Some(RingBuffer::new(self.config.recent_scores_capacity)),
            average_score: 0.0,
            last_feedback_time: now,
        });

        entry.feedback_count += 1;
        if success {
            entry.success_count += 1;
        }
        let scores = entry.recent_scores.get_or_insert_with(|| RingBuffer::new(self.config.recent_scores_capacity));
        scores.push(score);
        let values = scores.to_vec();
        entry.average_score = values.iter().sum::<f64>() / values.len() as f64;
        entry.last_feedback_time = now;
    }

    async fn update_sinks(
        &self,
        action_type: &str,
        signal: &FeedbackSignal,
        success: bool,
        score: f64,
        _kind: LearningSignalKind,
    ) {
        let mut outcome_payload = Payload::new();
        outcome_payload.insert("action_type".into(), action_type.into());
        outcome_payload.insert("context".into(), serde_json::Value::Object(signal.payload.clone()));
        outcome_payload.insert("outcome".into(), if success { "success" } else { "failure" }.into());
        outcome_payload.insert("score".into(), score.into());
        outcome_payload.insert("timestamp".into(), signal.timestamp.to_rfc3339().into());

        if let Some(store) = &self.memory_store {
            if store.store_experience(&outcome_payload).await.is_err() {
                self.sink_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(learner) = &self.delta_learner {
            let mut metrics = Payload::new();
            metrics.insert("score".into(), score.into());
            let mut update = Payload::new();
            update.insert("type".into(), "execution_feedback".into());
            update.insert("metrics".into(), serde_json::Value::Object(metrics));
            update.insert("success".into(), success.into());
            update.insert("prediction_error".into(), (1.0 - score).into());
            update.insert("strategy_effectiveness".into(), score.into());

            let integrated = learner.integrate_execution_feedback(&update).await;
            if integrated.is_err() {
                if let Some(delta) = learner.compute_delta(&update).await {
                    if learner.should_trigger_learning(&delta).await {
                        if learner.integrate_knowledge(&update, &delta).await.is_err() {
                            self.sink_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                } else {
                    self.sink_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn maybe_adjust_strategy(&self, action_type: &str, success: bool) {
        let (feedback_count, avg_score) = match self.history.get(action_type) {
            Some(entry) => (entry.feedback_count, entry.average_score),
            None => return,
        };

        if feedback_count < self.config.min_feedback_for_adjustment {
            return;
        }

        let (adjustment_type, value) = if avg_score < 0.3 {
            ("replace", -0.5)
        } else if avg_score < 0.5 {
            ("modify", -0.3)
        } else if success {
            ("increase", 0.2)
        } else {
            ("decrease", -0.2)
        };

        let expected_outcome = if adjustment_type == "increase" || adjustment_type == "modify" {
            "improved_success_rate"
        } else {
            "avoid_similar_failures"
        };

        let adjustment = StrategyAdjustment {
            action_type: action_type.to_string(),
            adjustment_type: adjustment_type.to_string(),
            value,
            expected_outcome: expected_outcome.to_string(),
            confidence: value.abs(),
            timestamp: Utc::now(),
        };
        self.adjustments.lock().await.push(adjustment);
    }

    pub async fn recommendations(&self, limit: usize) -> Vec<Recommendation> {
        let mut candidates: Vec<Recommendation> = self
            .history
            .iter()
            .filter(|e| e.feedback_count >= self.config.min_feedback_for_recommendation)
            .filter(|e| e.average_score < self.config.recommendation_threshold)
            .map(|e| Recommendation {
                action_type: e.action_type.clone(),
                average_score: e.average_score,
                priority: if e.average_score < 0.3 { "high".into() } else { "medium".into() },
            })
            .collect();

        candidates.sort_by(|a, b| {
            let a_high = a.priority == "high";
            let b_high = b.priority == "high";
            b_high.cmp(&a_high).then(a.average_score.partial_cmp(&b.average_score).unwrap())
        });
        candidates.truncate(limit);
        candidates
    }

    /// Compares the first half's mean recent score to the second half's for
    /// an action kind with at least `min_scores_for_trend` recorded scores.
    pub fn trend(&self, action_type: &str) -> Option<&'static str> {
        let entry = self.history.get(action_type)?;
        let scores = entry.recent_scores.as_ref()?.to_vec();
        if scores.len() < self.config.min_scores_for_trend {
            return None;
        }
        let mid = scores.len() / 2;
        let first_half = &scores[..mid];
        let second_half = &scores[mid..];
        let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
        let diff = mean(second_half) - mean(first_half);
        Some(if diff > 0.1 {
            "improving"
        } else if diff < -0.1 {
            "declining"
        } else {
            "stable"
        })
    }

    pub async fn strategy_adjustments(&self) -> Vec<StrategyAdjustment> {
        self.adjustments.lock().await.to_vec()
    }

    pub fn metrics(&self) -> FeedbackMetrics {
        FeedbackMetrics {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Best-effort save to a flat JSON document (spec.md §6). Failure is
    /// logged; the runtime is unaffected.
    pub async fn save_history(&self, path: &PathBuf) {
        let history: Vec<PersistedHistoryEntry> = self
            .history
            .iter()
            .map(|e| PersistedHistoryEntry {
                action_type: e.action_type.clone(),
                feedback_count: e.feedback_count,
                success_count: e.success_count,
                average_score: e.average_score,
                last_feedback_time: e.last_feedback_time,
            })
            .collect();
        let document = PersistedHistory {
            history,
            strategy_adjustments: self.strategy_adjustments().await,
            counters: PersistedCounters {
                sink_errors: self.sink_errors.load(Ordering::Relaxed),
            },
        };
        match serde_json::to_vec_pretty(&document) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(path, bytes).await {
                    warn!(target: "feedback", error = %err, "failed to persist feedback history");
                }
            }
            Err(err) => warn!(target: "feedback", error = %err, "failed to serialize feedback history"),
        }
    }

    /// Best-effort load; absence is not an error.
    pub async fn load_history(&self, path: &PathBuf) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let document: PersistedHistory = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(target: "feedback", error = %err, "failed to parse feedback history");
                return;
            }
        };
        for entry in document.history {
            self.history.insert(
                entry.action_type.clone(),
                ActionHistoryEntry {
                    action_type: entry.action_type,
                    feedback_count: entry.feedback_count,
                    success_count: entry.success_count,
                    recent_scores: Some(RingBuffer::new(self.config.recent_scores_capacity)),
                    average_score: entry.average_score,
                    last_feedback_time: entry.last_feedback_time,
                },
            );
        }
        let mut adjustments = self.adjustments.lock().await;
        for adjustment in document.strategy_adjustments {
            adjustments.push(adjustment);
        }
    }
}

fn execution_time_score(ms: f64) -> f64 {
    if ms < 100.0 {
        1.0
    } else if ms < 500.0 {
        0.8
    } else if ms < 1000.0 {
        0.6
    } else {
        0.4
    }
}

fn action_kind_for(signal: &FeedbackSignal) -> String {
    signal
        .payload
        .get("action_kind")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| signal.action_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedbackLayer;

    fn signal(action_id: &str, magnitude: f64, success_hint: bool) -> FeedbackSignal {
        let mut s = FeedbackSignal::new(action_id, FeedbackLayer::Physiological, FeedbackTiming::Immediate, magnitude);
        s.payload.insert("action_kind".into(), "file_operation".into());
        let _ = success_hint;
        s
    }

    #[tokio::test]
    async fn evaluation_success_matches_value_threshold() {
        let processor = FeedbackProcessor::new(FeedbackConfig::default(), None, None);
        processor.submit(signal("a1", 0.9, true), true).await;
        let entry = processor.history.get("file_operation").unwrap();
        assert_eq!(entry.feedback_count, 1);
        assert_eq!(entry.success_count, 1);
    }

    #[tokio::test]
    async fn five_low_scores_trigger_high_priority_recommendation_and_replace_adjustment() {
        let processor = FeedbackProcessor::new(FeedbackConfig::default(), None, None);
        for _ in 0..5 {
            processor.submit(signal("a1", 0.1, false), false).await;
        }
        let recs = processor.recommendations(10).await;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, "high");

        let adjustments = processor.strategy_adjustments().await;
        let last = adjustments.last().unwrap();
        assert_eq!(last.adjustment_type, "replace");
        assert!((last.value + 0.5).abs() < 1e-9);
    }

    #[test]
    fn execution_time_buckets_match_spec() {
        assert_eq!(execution_time_score(50.0), 1.0);
        assert_eq!(execution_time_score(400.0), 0.8);
        assert_eq!(execution_time_score(900.0), 0.6);
        assert_eq!(execution_time_score(2000.0), 0.4);
    }
}
