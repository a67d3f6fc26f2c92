//! Cycle orchestrator ("feedback loop engine"): drives each perception
//! through cognitive decision, execution, feedback generation, and learning.
//! Grounded on the original `feedback_loop_engine.py`; the capability-probe/
//! timeout/metrics shape follows `core/src/action_broker.rs`.

use crate::external::{ActionExecutor, DeltaLearner, ExecuteRequest, HistoricalMemoryStore};
use crate::feedback::FeedbackProcessor;
use crate::model::{
    ActionDecision, Cycle, CycleState, ExecutionResult, FeedbackLayer, FeedbackSignal, FeedbackTiming,
    LearningUpdate, Payload, PerceptionEvent, PerceptionKind,
};
use crate::ring::RingBuffer;
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct OrchestratorConfig {
    pub completed_history_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            completed_history_capacity: 1000,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LatencyMetrics {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub samples: u64,
}

/// Fallback rule table from spec.md §4.6, used whenever the cognitive
/// external call is absent or fails.
fn fallback_decision(perception: &PerceptionEvent) -> (&'static str, f64) {
    match perception.kind {
        PerceptionKind::Cursor => ("system_query", 0.1),
        PerceptionKind::Filesystem => ("file_operation", 0.5),
        PerceptionKind::ScheduledTime => ("satisfy_need", 0.4),
        PerceptionKind::UserActivity => ("initiate_conversation", 0.6),
        _ => ("system_query", 0.3),
    }
}

pub struct CycleOrchestrator {
    executor: Option<Arc<dyn ActionExecutor>>,
    memory_store: Option<Arc<dyn HistoricalMemoryStore>>,
    delta_learner: Option<Arc<dyn DeltaLearner>>,
    feedback_processor: Arc<FeedbackProcessor>,

    active: DashMap<String, Cycle>,
    action_to_cycle: DashMap<String, String>,
    completed: Mutex<RingBuffer<Cycle>>,

    latency: Mutex<LatencyMetrics>,
    config: OrchestratorConfig,
}

impl CycleOrchestrator {
    pub fn new(
        feedback_processor: Arc<FeedbackProcessor>,
        executor: Option<Arc<dyn ActionExecutor>>,
        memory_store: Option<Arc<dyn HistoricalMemoryStore>>,
        delta_learner: Option<Arc<dyn DeltaLearner>>,
        config: OrchestratorConfig,
    ) -> Self {
        let capacity = config.completed_history_capacity;
        Self {
            executor,
            memory_store,
            delta_learner,
            feedback_processor,
            active: DashMap::new(),
            action_to_cycle: DashMap::new(),
            completed: Mutex::new(RingBuffer::new(capacity)),
            latency: Mutex::new(LatencyMetrics::default()),
            config,
        }
    }

    /// Opens a cycle for a dequeued perception and drives it through the
    /// cognitive and execute stages. Returns the cycle id.
    pub async fn begin_cycle(self: &Arc<Self>, perception: PerceptionEvent) -> String {
        let mut cycle = Cycle::open(perception.clone());
        let cycle_id = cycle.id.clone();
        let perception_kind = perception.kind;

        let decision = self.decide(&perception).await;
        cycle.decision = Some(decision.clone());
        cycle.state = CycleState::Decided;

        match self.dispatch(&decision).await {
            Ok(action_id) => {
                cycle.action_id = Some(action_id.clone());
                cycle.state = CycleState::Dispatched;
                self.action_to_cycle.insert(action_id, cycle_id.clone());
                self.active.insert(cycle_id.clone(), cycle);
            }
            Err(reason) => {
                warn!(target: "orchestrator", reason, "executor dispatch failed");
                cycle.execution_result = Some(ExecutionResult {
                    success: false,
                    data: Payload::new(),
                    error_message: Some(reason),
                });
                cycle.fail();
                self.active.insert(cycle_id.clone(), cycle);

                self.generate_feedback(&cycle_id, &cycle_id, &decision.action_kind, perception_kind, false)
                    .await;
                self.try_complete(&cycle_id).await;
            }
        }

        cycle_id
    }

    async fn decide(&self, perception: &PerceptionEvent) -> ActionDecision {
        let payload = &perception.payload;

        let context = if let Some(store) = &self.memory_store {
            store.get_relevant_context(payload).await.unwrap_or_default()
        } else {
            Payload::new()
        };

        if let Some(learner) = &self.delta_learner {
            if let Some(generated) = learner.generate_decision(payload, &context).await {
                let mut decision =
                    ActionDecision::new(perception.id.clone(), generated.action_type, generated.urgency, generated.confidence);
                decision.target = generated.target;
                decision.parameters = generated.parameters;
                decision.expected_outcome = generated.expected_outcome;
                return decision;
            }
        }

        let (action_kind, urgency) = fallback_decision(perception);
        ActionDecision::new(perception.id.clone(), action_kind, urgency, 0.5)
    }

    async fn dispatch(&self, decision: &ActionDecision) -> Result<String, String> {
        let Some(executor) = &self.executor else {
            return Err("no action executor configured".to_string());
        };
        let priority = (10.0 - decision.urgency * 10.0).round() as i32;
        executor
            .execute_action(ExecuteRequest {
                action_kind: decision.action_kind.clone(),
                parameters: decision.parameters.clone(),
                priority,
                trigger_source: "feedback_loop".to_string(),
                wait_for_completion: false,
            })
            .await
    }

    /// Invoked by the executor's post-execution callback. Unknown action
    /// ids are ignored (spec.md §7).
    pub async fn on_execution_result(self: &Arc<Self>, action_id: &str, success: bool, data: Payload, error_message: Option<String>) {
        let Some(cycle_id) = self.action_to_cycle.get(action_id).map(|e| e.clone()) else {
            debug!(target: "orchestrator", action_id, "post-execution callback for unknown action id, ignored");
            return;
        };

        let Some(mut cycle_ref) = self.active.get_mut(&cycle_id) else {
            return;
        };
        cycle_ref.execution_result = Some(ExecutionResult {
            success,
            data,
            error_message,
        });
        cycle_ref.state = CycleState::Resulted;
        let perception_kind = cycle_ref.perception.kind;
        let action_id_owned = action_id.to_string();
        drop(cycle_ref);

        let action_kind = self
            .active
            .get(&cycle_id)
            .and_then(|c| c.decision.as_ref().map(|d| d.action_kind.clone()))
            .unwrap_or_default();

        self.generate_feedback(&cycle_id, &action_id_owned, &action_kind, perception_kind, success)
            .await;
        self.try_complete(&cycle_id).await;
    }

    /// Synthesizes the four feedback signals per spec.md §4.6 stage 3, in
    /// fixed layer order, dispatching each to the feedback processor. Each
    /// signal carries `action_kind` in its payload so the processor can key
    /// per-action history by action kind rather than by the one-off action id.
    async fn generate_feedback(
        &self,
        cycle_id: &str,
        action_id: &str,
        action_kind: &str,
        perception_kind: PerceptionKind,
        success: bool,
    ) {
        let mut signals = vec![
            FeedbackSignal::new(action_id, FeedbackLayer::Physiological, FeedbackTiming::Immediate, if success { 1.0 } else { 0.0 }),
            FeedbackSignal::new(action_id, FeedbackLayer::Cognitive, FeedbackTiming::Delayed, if success { 0.8 } else { 0.2 }),
        ];

        let mut emotional = FeedbackSignal::new(action_id, FeedbackLayer::Emotional, FeedbackTiming::Immediate, if success { 0.7 } else { 0.3 });
        emotional
            .payload
            .insert("emotion".into(), json!(if success { "happy" } else { "disappointed" }));
        signals.push(emotional);

        if matches!(perception_kind, PerceptionKind::UserActivity | PerceptionKind::Voice) {
            signals.push(FeedbackSignal::new(
                action_id,
                FeedbackLayer::Social,
                FeedbackTiming::Delayed,
                if success { 0.6 } else { 0.4 },
            ));
        }

        for signal in &mut signals {
            signal.payload.insert("action_kind".into(), json!(action_kind));
        }

        if let Some(mut cycle) = self.active.get_mut(cycle_id) {
            cycle.feedback_signals.extend(signals.clone());
            cycle.state = CycleState::FeedbackAttached;
        }

        for signal in signals {
            self.feedback_processor.submit(signal, success).await;
        }
    }

    async fn try_complete(self: &Arc<Self>, cycle_id: &str) {
        let completable = self
            .active
            .get(cycle_id)
            .map(|c| c.is_completable())
            .unwrap_or(false);
        if !completable {
            return;
        }

        let Some((_, mut cycle)) = self.active.remove(cycle_id) else {
            return;
        };

        let action_id = cycle.action_id.clone().unwrap_or_default();
        let confidence = cycle.decision.as_ref().map(|d| d.confidence).unwrap_or(0.5);
        let success = cycle.execution_result.as_ref().map(|r| r.success).unwrap_or(false);

        let mut update = LearningUpdate::new(action_id.clone(), confidence, success);

        if let Some(learner) = &self.delta_learner {
            let payload = learning_update_payload(&update, success);
            let ok = learner.integrate_execution_feedback(&payload).await.is_ok();
            update.sink_status.push(crate::model::SinkStatus {
                sink: "delta_learner".into(),
                ok,
                error: if ok { None } else { Some("integrate_execution_feedback failed".into()) },
            });
        }
        if let Some(store) = &self.memory_store {
            let mut payload = Payload::new();
            payload.insert("action_type".into(), cycle.decision.as_ref().map(|d| d.action_kind.clone()).unwrap_or_default().into());
            payload.insert("outcome".into(), if success { "success" } else { "failure" }.into());
            payload.insert("score".into(), confidence.into());
            let ok = store.update_from_feedback(&payload).await.is_ok();
            update.sink_status.push(crate::model::SinkStatus {
                sink: "historical_store".into(),
                ok,
                error: if ok { None } else { Some("update_from_feedback failed".into()) },
            });
        }

        cycle.learning_update = Some(update);
        cycle.complete();

        if let Some(latency) = cycle.latency_ms {
            self.record_latency(latency).await;
        }

        self.completed.lock().await.push(cycle);
        self.action_to_cycle.remove(&action_id);
    }

    async fn record_latency(&self, latency_ms: f64) {
        let mut metrics = self.latency.lock().await;
        metrics.samples += 1;
        metrics.min_ms = if metrics.samples == 1 { latency_ms } else { metrics.min_ms.min(latency_ms) };
        metrics.max_ms = metrics.max_ms.max(latency_ms);
        metrics.avg_ms = (metrics.avg_ms * (metrics.samples - 1) as f64 + latency_ms) / metrics.samples as f64;
    }

    pub async fn latency_metrics(&self) -> LatencyMetrics {
        self.latency.lock().await.clone()
    }

    pub async fn completed_count(&self) -> usize {
        self.completed.lock().await.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Moves cycles older than `max_age` out of the active set into a
    /// `failed` terminal state. Nothing calls this automatically (spec.md §9
    /// Design Notes: "whether orphans should be swept on a timer is left
    /// open" — this crate exposes the prune API without auto-scheduling it).
    pub async fn sweep_orphans(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;
        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|e| e.start_time < cutoff)
            .map(|e| e.key().clone())
            .collect();

        let mut swept = 0;
        for id in stale {
            if let Some((_, mut cycle)) = self.active.remove(&id) {
                cycle.fail();
                if let Some(action_id) = &cycle.action_id {
                    self.action_to_cycle.remove(action_id);
                }
                self.completed.lock().await.push(cycle);
                swept += 1;
            }
        }
        swept
    }
}

fn learning_update_payload(update: &LearningUpdate, success: bool) -> Payload {
    let mut metrics = Payload::new();
    metrics.insert("prediction_error".into(), update.prediction_error.into());
    metrics.insert("performance_delta".into(), update.performance_delta.into());

    let mut payload = Payload::new();
    payload.insert("type".into(), "execution_feedback".into());
    payload.insert("metrics".into(), serde_json::Value::Object(metrics));
    payload.insert("success".into(), success.into());
    payload.insert("prediction_error".into(), update.prediction_error.into());
    payload.insert(
        "strategy_effectiveness".into(),
        update.strategy_adjustment.confidence_update.into(),
    );
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryActionExecutor;
    use crate::feedback::FeedbackConfig;

    fn perception(kind: PerceptionKind) -> PerceptionEvent {
        PerceptionEvent::new(kind, "test", Payload::new(), 3)
    }

    #[tokio::test]
    async fn executor_success_path_produces_four_signals_for_user_activity() {
        let executor = Arc::new(InMemoryActionExecutor::new());
        let feedback = Arc::new(FeedbackProcessor::new(FeedbackConfig::default(), None, None));
        let orchestrator = Arc::new(CycleOrchestrator::new(
            feedback.clone(),
            Some(executor.clone() as Arc<dyn ActionExecutor>),
            None,
            None,
            OrchestratorConfig::default(),
        ));

        let cycle_id = orchestrator.begin_cycle(perception(PerceptionKind::UserActivity)).await;
        let action_id = {
            let c = orchestrator.active.get(&cycle_id).unwrap();
            assert_eq!(c.decision.as_ref().unwrap().action_kind, "initiate_conversation");
            assert_eq!(c.decision.as_ref().unwrap().urgency, 0.6);
            c.action_id.clone().unwrap()
        };

        orchestrator.on_execution_result(&action_id, true, Payload::new(), None).await;

        assert_eq!(orchestrator.completed_count().await, 1);
        let completed = orchestrator.completed.lock().await;
        let cycle = completed.iter().next().unwrap();
        assert_eq!(cycle.feedback_signals.len(), 4);
        let update = cycle.learning_update.as_ref().unwrap();
        assert!((update.prediction_error - 0.5).abs() < 1e-9);
        assert!((update.performance_delta - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failure_path_omits_social_signal_for_cursor_events() {
        let executor = Arc::new(InMemoryActionExecutor::new());
        let feedback = Arc::new(FeedbackProcessor::new(FeedbackConfig::default(), None, None));
        let orchestrator = Arc::new(CycleOrchestrator::new(
            feedback,
            Some(executor.clone() as Arc<dyn ActionExecutor>),
            None,
            None,
            OrchestratorConfig::default(),
        ));

        let cycle_id = orchestrator.begin_cycle(perception(PerceptionKind::Cursor)).await;
        let action_id = orchestrator.active.get(&cycle_id).unwrap().action_id.clone().unwrap();
        orchestrator.on_execution_result(&action_id, false, Payload::new(), None).await;

        let completed = orchestrator.completed.lock().await;
        let cycle = completed.iter().next().unwrap();
        assert_eq!(cycle.feedback_signals.len(), 3);
        assert_eq!(cycle.feedback_signals[0].magnitude, 0.0);
        assert_eq!(cycle.feedback_signals[1].magnitude, 0.2);
        assert_eq!(cycle.feedback_signals[2].magnitude, 0.3);
    }

    #[tokio::test]
    async fn unknown_action_id_callback_is_ignored() {
        let executor = Arc::new(InMemoryActionExecutor::new());
        let feedback = Arc::new(FeedbackProcessor::new(FeedbackConfig::default(), None, None));
        let orchestrator = Arc::new(CycleOrchestrator::new(
            feedback,
            Some(executor as Arc<dyn ActionExecutor>),
            None,
            None,
            OrchestratorConfig::default(),
        ));
        orchestrator.on_execution_result("nonexistent", true, Payload::new(), None).await;
        assert_eq!(orchestrator.completed_count().await, 0);
    }
}
