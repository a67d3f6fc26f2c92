//! External interfaces consumed by the orchestrator and feedback processor:
//! the action executor, the historical memory store, and the delta learner.
//! All three are "probed feature-by-feature" (spec.md §9) — modeled here as
//! `async_trait`s with default no-op bodies, held behind `Option<Arc<dyn _>>`
//! by the orchestrator so a deployment may omit any of them.
//!
//! Grounded on `core/src/action_broker.rs` (`CapabilityProvider`, timeout +
//! metrics wrapped invoke) and `core/src/context/memory/store.rs`
//! (`MemoryStore`/`InMemoryStore`).

use crate::model::Payload;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub action_kind: String,
    pub parameters: Payload,
    pub priority: i32,
    pub trigger_source: String,
    pub wait_for_completion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub success: bool,
    pub data: Payload,
    pub error_message: Option<String>,
}

pub type PostExecutionCallback = Arc<dyn Fn(ActionOutcome) + Send + Sync>;

/// The executor dispatches an action and returns an id synchronously; the
/// real success/failure arrives later via the registered callback.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute_action(&self, request: ExecuteRequest) -> Result<String, String>;

    fn register_post_execution_callback(&self, callback: PostExecutionCallback);
}

/// Default no-op historical store used when a deployment doesn't wire one
/// in; every method is individually overridable.
#[async_trait]
pub trait HistoricalMemoryStore: Send + Sync {
    async fn get_relevant_context(&self, _payload: &Payload) -> Option<Payload> {
        None
    }

    async fn update_from_feedback(&self, _update: &Payload) -> Result<(), String> {
        Ok(())
    }

    async fn store_experience(&self, _update: &Payload) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDecision {
    pub action_type: String,
    pub target: Option<String>,
    pub urgency: f64,
    pub confidence: f64,
    pub parameters: Payload,
    pub expected_outcome: Option<String>,
}

#[async_trait]
pub trait DeltaLearner: Send + Sync {
    async fn generate_decision(&self, _payload: &Payload, _context: &Payload) -> Option<GeneratedDecision> {
        None
    }

    async fn integrate_execution_feedback(&self, _update: &Payload) -> Result<(), String> {
        Ok(())
    }

    async fn compute_delta(&self, _update: &Payload) -> Option<Payload> {
        None
    }

    async fn should_trigger_learning(&self, _delta: &Payload) -> bool {
        false
    }

    async fn integrate_knowledge(&self, _update: &Payload, _delta: &Payload) -> Result<(), String> {
        Ok(())
    }
}

/// In-process reference executor: runs a handler function synchronously and
/// immediately invokes the post-execution callback — useful for tests and
/// for deployments that don't need out-of-process dispatch.
pub struct InMemoryActionExecutor {
    next_id: AtomicU64,
    callback: std::sync::Mutex<Option<PostExecutionCallback>>,
    outcomes: DashMap<String, bool>,
}

impl InMemoryActionExecutor {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callback: std::sync::Mutex::new(None),
            outcomes: DashMap::new(),
        }
    }

    /// Test/ops hook: force the outcome the next dispatched action for this
    /// kind should resolve to, then deliver it via the registered callback.
    pub fn resolve(&self, action_id: &str, success: bool, data: Payload, error_message: Option<String>) {
        self.outcomes.insert(action_id.to_string(), success);
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(ActionOutcome {
                action_id: action_id.to_string(),
                success,
                data,
                error_message,
            });
        }
    }
}

impl Default for InMemoryActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for InMemoryActionExecutor {
    async fn execute_action(&self, _request: ExecuteRequest) -> Result<String, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("action-{id}"))
    }

    fn register_post_execution_callback(&self, callback: PostExecutionCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}

/// In-memory historical store, grounded on `InMemoryStore` — stores by
/// action kind rather than by session, since this crate's feedback loop is
/// keyed on action kind, not conversational sessions.
pub struct InMemoryHistoricalStore {
    experiences: DashMap<String, Vec<Payload>>,
}

impl InMemoryHistoricalStore {
    pub fn new() -> Self {
        Self {
            experiences: DashMap::new(),
        }
    }

    pub fn experiences_for(&self, action_type: &str) -> Vec<Payload> {
        self.experiences
            .get(action_type)
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryHistoricalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoricalMemoryStore for InMemoryHistoricalStore {
    async fn get_relevant_context(&self, payload: &Payload) -> Option<Payload> {
        let action_type = payload.get("action_type")?.as_str()?;
        let mut context = Payload::new();
        context.insert(
            "recent_experience_count".into(),
            self.experiences_for(action_type).len().into(),
        );
        Some(context)
    }

    async fn store_experience(&self, update: &Payload) -> Result<(), String> {
        let action_type = update
            .get("action_type")
            .and_then(|v| v.as_str())
            .ok_or("missing action_type")?
            .to_string();
        self.experiences.entry(action_type).or_default().push(update.clone());
        Ok(())
    }

    async fn update_from_feedback(&self, update: &Payload) -> Result<(), String> {
        self.store_experience(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_executor_assigns_distinct_ids() {
        let executor = InMemoryActionExecutor::new();
        let id1 = executor
            .execute_action(ExecuteRequest {
                action_kind: "system_query".into(),
                parameters: Payload::new(),
                priority: 9,
                trigger_source: "feedback_loop".into(),
                wait_for_completion: false,
            })
            .await
            .unwrap();
        let id2 = executor
            .execute_action(ExecuteRequest {
                action_kind: "system_query".into(),
                parameters: Payload::new(),
                priority: 9,
                trigger_source: "feedback_loop".into(),
                wait_for_completion: false,
            })
            .await
            .unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_experience() {
        let store = InMemoryHistoricalStore::new();
        let mut update = Payload::new();
        update.insert("action_type".into(), "file_operation".into());
        update.insert("outcome".into(), "success".into());
        store.update_from_feedback(&update).await.unwrap();
        assert_eq!(store.experiences_for("file_operation").len(), 1);
    }
}
