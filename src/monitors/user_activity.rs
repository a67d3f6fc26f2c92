//! User-activity monitor: classifies into one of {idle, active, working,
//! gaming, reading, typing} from the rate of input events over the last 60s
//! and idle time. Grounded on `UserActivityMonitor` in the original
//! `real_time_monitor.py`; thresholds carried over verbatim.

use super::{EmitFn, Monitor};
use crate::cancel::CancellationToken;
use crate::model::{PerceptionEvent, PerceptionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Active,
    Working,
    Gaming,
    Reading,
    Typing,
    Unknown,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Idle => "idle",
            ActivityState::Active => "active",
            ActivityState::Working => "working",
            ActivityState::Gaming => "gaming",
            ActivityState::Reading => "reading",
            ActivityState::Typing => "typing",
            ActivityState::Unknown => "unknown",
        }
    }
}

pub struct UserActivityMonitor {
    tick_interval_ms: u64,
    events: Mutex<VecDeque<Instant>>,
    last_input_at: Mutex<Option<Instant>>,
    current_state: Mutex<ActivityState>,
}

impl UserActivityMonitor {
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms,
            events: Mutex::new(VecDeque::new()),
            last_input_at: Mutex::new(None),
            current_state: Mutex::new(ActivityState::Unknown),
        }
    }

    /// Record an input event (keystroke, click, etc.) observed by the host.
    pub async fn record_input(&self) {
        let now = Instant::now();
        self.events.lock().await.push_back(now);
        *self.last_input_at.lock().await = Some(now);
    }

    fn classify(events_per_minute: f64, idle_secs: f64) -> ActivityState {
        if idle_secs > 300.0 {
            ActivityState::Idle
        } else if events_per_minute > 100.0 {
            ActivityState::Gaming
        } else if events_per_minute > 50.0 {
            ActivityState::Typing
        } else if events_per_minute > 10.0 {
            ActivityState::Working
        } else if idle_secs > 30.0 {
            ActivityState::Reading
        } else {
            ActivityState::Active
        }
    }

    async fn tick_once(&self, emit: &EmitFn) {
        let now = Instant::now();
        let mut events = self.events.lock().await;
        while let Some(front) = events.front() {
            if now.duration_since(*front).as_secs_f64() > 60.0 {
                events.pop_front();
            } else {
                break;
            }
        }
        let events_per_minute = events.len() as f64;
        drop(events);

        let idle_secs = self
            .last_input_at
            .lock()
            .await
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(f64::MAX);

        let new_state = Self::classify(events_per_minute, idle_secs);
        let mut current = self.current_state.lock().await;
        if *current == new_state {
            return;
        }
        *current = new_state;
        drop(current);

        let mut payload = crate::model::Payload::new();
        payload.insert("state".into(), new_state.as_str().into());
        payload.insert("events_per_minute".into(), events_per_minute.into());
        emit(PerceptionEvent::new(
            PerceptionKind::UserActivity,
            "user_activity_monitor",
            payload,
            3,
        ));
    }

    pub async fn run(self: Arc<Self>, emit: EmitFn, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.tick_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick_once(&emit).await,
            }
        }
    }
}

#[async_trait]
impl Monitor for UserActivityMonitor {}
