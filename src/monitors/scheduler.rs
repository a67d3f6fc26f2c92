//! Scheduler monitor: a time-ordered set of scheduled events; each tick,
//! emits any whose trigger time has passed and re-queues recurring ones.
//! Grounded on `TimeMonitor` in the original `real_time_monitor.py`.

use super::{EmitFn, Monitor};
use crate::cancel::CancellationToken;
use crate::model::{PerceptionEvent, PerceptionKind};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub enum Recurrence {
    Once,
    Every(ChronoDuration),
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub id: String,
    pub label: String,
    pub trigger_at: DateTime<Utc>,
    pub recurrence: Recurrence,
}

pub struct SchedulerMonitor {
    tick_interval_ms: u64,
    scheduled: Mutex<Vec<ScheduledEvent>>,
}

impl SchedulerMonitor {
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick_interval_ms,
            scheduled: Mutex::new(Vec::new()),
        }
    }

    pub async fn schedule(&self, event: ScheduledEvent) {
        let mut scheduled = self.scheduled.lock().await;
        scheduled.push(event);
        scheduled.sort_by_key(|e| e.trigger_at);
    }

    async fn tick_once(&self, emit: &EmitFn) {
        let now = Utc::now();
        let mut scheduled = self.scheduled.lock().await;
        let mut remaining = Vec::with_capacity(scheduled.len());

        for mut event in scheduled.drain(..) {
            if event.trigger_at > now {
                remaining.push(event);
                continue;
            }

            let mut payload = crate::model::Payload::new();
            payload.insert("id".into(), event.id.clone().into());
            payload.insert("label".into(), event.label.clone().into());
            emit(PerceptionEvent::new(
                PerceptionKind::ScheduledTime,
                "scheduler_monitor",
                payload,
                4,
            ));

            if let Recurrence::Every(period) = event.recurrence {
                event.trigger_at = now + period;
                remaining.push(event);
            }
        }

        remaining.sort_by_key(|e| e.trigger_at);
        *scheduled = remaining;
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
impl Monitor for SchedulerMonitor {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn emits_and_removes_non_recurring_event_once_past() {
        let monitor = SchedulerMonitor::new(10);
        monitor
            .schedule(ScheduledEvent {
                id: "e1".into(),
                label: "test".into(),
                trigger_at: Utc::now() - ChronoDuration::seconds(1),
                recurrence: Recurrence::Once,
            })
            .await;

        let count = Arc::new(StdMutex::new(0));
        let count_clone = count.clone();
        let emit: EmitFn = Box::new(move |_event| {
            *count_clone.lock().unwrap() += 1;
        });

        monitor.tick_once(&emit).await;
        monitor.tick_once(&emit).await;

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(monitor.scheduled.lock().await.is_empty());
    }

    #[tokio::test]
    async fn recurring_event_is_requeued_with_new_trigger_time() {
        let monitor = SchedulerMonitor::new(10);
        monitor
            .schedule(ScheduledEvent {
                id: "e1".into(),
                label: "recurring".into(),
                trigger_at: Utc::now() - ChronoDuration::seconds(1),
                recurrence: Recurrence::Every(ChronoDuration::hours(1)),
            })
            .await;

        let emit: EmitFn = Box::new(|_event| {});
        monitor.tick_once(&emit).await;

        let scheduled = monitor.scheduled.lock().await;
        assert_eq!(scheduled.len(), 1);
        assert!(scheduled[0].trigger_at > Utc::now());
    }
}
