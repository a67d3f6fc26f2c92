//! Debounce and throttle rate shaping, consulted after aggregation and
//! before the event queue (spec.md §4.4). Grounded in spec.md's own fuller
//! prescriptive description rather than the original `DebounceThrottleManager`,
//! whose timer bodies are left as incomplete stubs in the source.

use crate::model::PerceptionEvent;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Clone, Copy)]
pub struct DebounceRule {
    pub delay_ms: u64,
    pub leading: bool,
    pub trailing: bool,
}

#[derive(Clone, Copy)]
pub struct ThrottleRule {
    pub interval_ms: u64,
    pub leading: bool,
    pub trailing: bool,
}

struct DebounceState {
    timer: Option<JoinHandle<()>>,
    pending: Option<PerceptionEvent>,
    timer_running: bool,
}

struct ThrottleState {
    last_emit: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    pending: Option<PerceptionEvent>,
}

/// A type may have neither, either, or both rules configured. Throttle is
/// consulted first; its output (pass-through or emission) then flows through
/// debounce if configured for the same type.
pub struct ShapingManager {
    debounce_rules: DashMap<String, DebounceRule>,
    throttle_rules: DashMap<String, ThrottleRule>,
    debounce_state: DashMap<String, Arc<Mutex<DebounceState>>>,
    throttle_state: DashMap<String, Arc<Mutex<ThrottleState>>>,
    output_tx: mpsc::UnboundedSender<PerceptionEvent>,
}

impl ShapingManager {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PerceptionEvent>) {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        (
            Self {
                debounce_rules: DashMap::new(),
                throttle_rules: DashMap::new(),
                debounce_state: DashMap::new(),
                throttle_state: DashMap::new(),
                output_tx,
            },
            output_rx,
        )
    }

    pub fn configure_debounce(&self, event_type: impl Into<String>, rule: DebounceRule) {
        self.debounce_rules.insert(event_type.into(), rule);
    }

    pub fn configure_throttle(&self, event_type: impl Into<String>, rule: ThrottleRule) {
        self.throttle_rules.insert(event_type.into(), rule);
    }

    /// Installs the source system's defaults: debounce(100ms, trailing) for
    /// "file_change", throttle(1000ms, leading+trailing) for "system_state".
    pub fn with_default_rules(self) -> Self {
        self.configure_debounce(
            "file_change",
            DebounceRule {
                delay_ms: 100,
                leading: false,
                trailing: true,
            },
        );
        self.configure_throttle(
            "system_state",
            ThrottleRule {
                interval_ms: 1000,
                leading: true,
                trailing: true,
            },
        );
        self
    }

    pub async fn process(self: &Arc<Self>, event: PerceptionEvent) -> Option<PerceptionEvent> {
        let event_type = event.kind.event_type().to_string();

        let after_throttle = if let Some(rule) = self.throttle_rules.get(&event_type).map(|r| *r) {
            self.apply_throttle(&event_type, rule, event).await
        } else {
            Some(event)
        };

        let event = after_throttle?;

        if let Some(rule) = self.debounce_rules.get(&event_type).map(|r| *r) {
            self.apply_debounce(&event_type, rule, event).await
        } else {
            Some(event)
        }
    }

    async fn apply_throttle(
        self: &Arc<Self>,
        event_type: &str,
        rule: ThrottleRule,
        event: PerceptionEvent,
    ) -> Option<PerceptionEvent> {
        let state = self
            .throttle_state
            .entry(event_type.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ThrottleState {
                    last_emit: None,
                    timer: None,
                    pending: None,
                }))
            })
            .clone();

        let mut guard = state.lock().await;
        let now = Instant::now();
        let ready = match guard.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= Duration::from_millis(rule.interval_ms),
        };

        if ready {
            guard.last_emit = Some(now);
            if let Some(handle) = guard.timer.take() {
                handle.abort();
            }
            guard.pending = None;
            return Some(event);
        }

        if rule.trailing {
            guard.pending = Some(event);
            if guard.timer.is_none() {
                let state_for_timer = state.clone();
                let tx = self.output_tx.clone();
                let wait = guard
                    .last_emit
                    .map(|last| Duration::from_millis(rule.interval_ms).saturating_sub(now.duration_since(last)))
                    .unwrap_or(Duration::from_millis(rule.interval_ms));
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    let mut guard = state_for_timer.lock().await;
                    guard.timer = None;
                    guard.last_emit = Some(Instant::now());
                    if let Some(pending) = guard.pending.take() {
                        let _ = tx.send(pending);
                    }
                });
                guard.timer = Some(handle);
            }
        }
        None
    }

    async fn apply_debounce(
        self: &Arc<Self>,
        event_type: &str,
        rule: DebounceRule,
        event: PerceptionEvent,
    ) -> Option<PerceptionEvent> {
        let state = self
            .debounce_state
            .entry(event_type.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DebounceState {
                    timer: None,
                    pending: None,
                    timer_running: false,
                }))
            })
            .clone();

        let mut guard = state.lock().await;

        if let Some(handle) = guard.timer.take() {
            handle.abort();
        }

        let was_running = guard.timer_running;
        guard.timer_running = true;
        guard.pending = Some(event.clone());

        let state_for_timer = state.clone();
        let tx = self.output_tx.clone();
        let trailing = rule.trailing;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
            let mut guard = state_for_timer.lock().await;
            guard.timer = None;
            guard.timer_running = false;
            if trailing {
                if let Some(pending) = guard.pending.take() {
                    let _ = tx.send(pending);
                }
            } else {
                guard.pending = None;
            }
        });
        guard.timer = Some(handle);

        if rule.leading && !was_running {
            Some(event)
        } else {
            None
        }
    }
}

impl Default for ShapingManager {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, PerceptionKind};

    fn file_event() -> PerceptionEvent {
        PerceptionEvent::new(PerceptionKind::Filesystem, "test", Payload::new(), 3)
    }

    #[tokio::test]
    async fn debounce_trailing_only_fires_once_after_quiet_gap() {
        let (mgr, mut rx) = ShapingManager::new();
        mgr.configure_debounce(
            "file_change",
            DebounceRule {
                delay_ms: 50,
                leading: false,
                trailing: true,
            },
        );
        let mgr = Arc::new(mgr);
        assert!(mgr.process(file_event()).await.is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mgr.process(file_event()).await.is_none());
        let emitted = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("should fire once quiet")
            .expect("channel open");
        assert_eq!(emitted.kind.event_type(), "file_change");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn throttle_leading_emits_immediately_then_caps_rate() {
        let (mgr, _rx) = ShapingManager::new();
        mgr.configure_throttle(
            "system_state",
            ThrottleRule {
                interval_ms: 1000,
                leading: true,
                trailing: true,
            },
        );
        let mgr = Arc::new(mgr);
        let e1 = PerceptionEvent::new(PerceptionKind::SystemState, "test", Payload::new(), 4);
        let e2 = PerceptionEvent::new(PerceptionKind::SystemState, "test", Payload::new(), 4);
        assert!(mgr.process(e1).await.is_some());
        assert!(mgr.process(e2).await.is_none());
    }
}
