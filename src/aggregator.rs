//! Collapses bursts of same-type events within a time window into one
//! emitted event. Grounded on the original `EventAggregator` (window/max/
//! reducer per event type, one-shot timer task per type).

use crate::model::PerceptionEvent;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Combines an ordered burst of same-type events into a single emitted one.
pub trait Reducer: Send + Sync {
    fn reduce(&self, events: Vec<PerceptionEvent>) -> PerceptionEvent;
}

/// Keeps the latest event, attaching the full ordered position trail and a
/// count — the default mouse-move reducer named in spec.md §4.3.
pub struct LatestWithTrail;

impl Reducer for LatestWithTrail {
    fn reduce(&self, mut events: Vec<PerceptionEvent>) -> PerceptionEvent {
        let count = events.len();
        let mut latest = events.pop().expect("reduce called with no events");
        let trail: Vec<serde_json::Value> = events
            .iter()
            .chain(std::iter::once(&latest))
            .map(|e| serde_json::Value::Object(e.payload.clone()))
            .collect();
        latest.payload.insert("aggregated".into(), true.into());
        latest.payload.insert("event_count".into(), count.into());
        latest.payload.insert("positions".into(), trail.into());
        latest
    }
}

#[derive(Clone)]
pub struct AggregationRule {
    pub window_ms: u64,
    pub max_batch: usize,
    pub reducer: Arc<dyn Reducer>,
}

struct TypeState {
    pending: Vec<PerceptionEvent>,
    timer: Option<JoinHandle<()>>,
}

/// `add()` returns `Some(event)` immediately when no rule applies, or when a
/// batch/window boundary fires synchronously with this call; otherwise the
/// event is buffered and the caller receives nothing until the aggregator's
/// background timer emits on the output channel.
pub struct EventAggregator {
    rules: DashMap<String, AggregationRule>,
    state: DashMap<String, Arc<Mutex<TypeState>>>,
    output_tx: mpsc::UnboundedSender<PerceptionEvent>,
}

impl EventAggregator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PerceptionEvent>) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        (
            Self {
                rules: DashMap::new(),
                state: DashMap::new(),
                output_tx,
            },
            output_rx,
        )
    }

    pub fn configure(&self, event_type: impl Into<String>, rule: AggregationRule) {
        self.rules.insert(event_type.into(), rule);
    }

    /// Installs the source system's default rule: mouse-move, window=32ms,
    /// max=10.
    pub fn with_default_rules(self) -> Self {
        self.configure(
            "mouse_position",
            AggregationRule {
                window_ms: 32,
                max_batch: 10,
                reducer: Arc::new(LatestWithTrail),
            },
        );
        self
    }

    pub async fn add(self: &Arc<Self>, event: PerceptionEvent) -> Option<PerceptionEvent> {
        let event_type = event.kind.event_type().to_string();
        let rule = match self.rules.get(&event_type) {
            Some(r) => r.clone(),
            None => return Some(event),
        };

        let state = self
            .state
            .entry(event_type.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TypeState {
                    pending: Vec::new(),
                    timer: None,
                }))
            })
            .clone();

        let mut guard = state.lock().await;
        guard.pending.push(event);

        if guard.pending.len() >= rule.max_batch {
            let events = std::mem::take(&mut guard.pending);
            if let Some(handle) = guard.timer.take() {
                handle.abort();
            }
            drop(guard);
            return Some(rule.reducer.reduce(events));
        }

        if guard.timer.is_none() {
            let state_for_timer = state.clone();
            let rule_for_timer = rule.clone();
            let tx = self.output_tx.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(rule_for_timer.window_ms)).await;
                let mut guard = state_for_timer.lock().await;
                guard.timer = None;
                if guard.pending.is_empty() {
                    return;
                }
                let events = std::mem::take(&mut guard.pending);
                drop(guard);
                let emitted = rule_for_timer.reducer.reduce(events);
                let _ = tx.send(emitted);
            });
            guard.timer = Some(handle);
        }

        None
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, PerceptionKind};

    fn event() -> PerceptionEvent {
        PerceptionEvent::new(PerceptionKind::Cursor, "test", Payload::new(), 5)
    }

    #[tokio::test]
    async fn passes_through_events_with_no_rule() {
        let (agg, _rx) = EventAggregator::new();
        let agg = Arc::new(agg);
        let e = event();
        let id = e.id.clone();
        let out = agg.add(e).await.unwrap();
        assert_eq!(out.id, id);
    }

    #[tokio::test]
    async fn collapses_burst_at_max_batch() {
        let (agg, _rx) = EventAggregator::new();
        agg.configure(
            "mouse_position",
            AggregationRule {
                window_ms: 1000,
                max_batch: 3,
                reducer: Arc::new(LatestWithTrail),
            },
        );
        let agg = Arc::new(agg);
        assert!(agg.add(event()).await.is_none());
        assert!(agg.add(event()).await.is_none());
        let out = agg.add(event()).await.unwrap();
        assert_eq!(out.payload.get("event_count").unwrap(), &serde_json::json!(3));
    }

    #[tokio::test]
    async fn window_fires_on_timer() {
        let (agg, mut rx) = EventAggregator::new();
        agg.configure(
            "mouse_position",
            AggregationRule {
                window_ms: 20,
                max_batch: 100,
                reducer: Arc::new(LatestWithTrail),
            },
        );
        let agg = Arc::new(agg);
        assert!(agg.add(event()).await.is_none());
        let emitted = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .expect("timer should have fired")
            .expect("channel open");
        assert_eq!(emitted.payload.get("event_count").unwrap(), &serde_json::json!(1));
    }
}
