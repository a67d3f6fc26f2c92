//! Single cooperative consumer task: dequeues, filters, dispatches to a
//! registered handler, and tracks latency/throughput metrics. Grounded in
//! the original `EventLoopSystem` main loop and in `core/src/event.rs`'s
//! `#[tracing::instrument]`/metrics-snapshot style.

use crate::cancel::CancellationToken;
use crate::model::PerceptionEvent;
use crate::queue::EventQueue;
use crate::ring::RingBuffer;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// A handler may be synchronous business logic wrapped in `spawn_blocking`
/// by the caller, or natively asynchronous; both are represented uniformly
/// here as an async trait.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PerceptionEvent);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&PerceptionEvent) + Send + Sync + 'static,
{
    async fn handle(&self, event: &PerceptionEvent) {
        (self)(event)
    }
}

#[derive(Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<HashSet<String>>,
    pub min_priority: Option<u8>,
    pub sources: Option<HashSet<String>>,
    pub max_age: Option<Duration>,
}

impl EventFilter {
    /// Returns true if the event passes (should be kept).
    pub fn passes(&self, event: &PerceptionEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(event.kind.event_type()) {
                return false;
            }
        }
        if let Some(min_priority) = self.min_priority {
            // Priority 1 = highest; "minimum priority" means at least this
            // urgent, i.e. numerically at most min_priority.
            if event.priority > min_priority {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(max_age) = self.max_age {
            let age = Utc::now() - event.created_at;
            if age.to_std().unwrap_or(Duration::ZERO) > max_age {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct EventLoopMetrics {
    pub processed: u64,
    pub filtered: u64,
    pub aggregated: u64,
    pub debounced: u64,
    pub throttled: u64,
    pub errors: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
}

struct Counters {
    processed: AtomicU64,
    filtered: AtomicU64,
    aggregated: AtomicU64,
    debounced: AtomicU64,
    throttled: AtomicU64,
    errors: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            aggregated: AtomicU64::new(0),
            debounced: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

pub struct EventLoopConfig {
    pub latency_target_ms: u64,
    pub latency_window: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            latency_target_ms: 16,
            latency_window: 1000,
        }
    }
}

/// The cooperative core: consumes `queue`, routes to handlers by event type,
/// enforces the latency floor. Runs as one `tokio` task.
pub struct EventLoopCore {
    queue: Arc<EventQueue>,
    handlers: DashMap<String, Arc<dyn EventHandler>>,
    default_handler: Option<Arc<dyn EventHandler>>,
    filter: Mutex<EventFilter>,
    counters: Counters,
    latency_samples: Mutex<RingBuffer<f64>>,
    config: EventLoopConfig,
}

impl EventLoopCore {
    pub fn new(queue: Arc<EventQueue>, config: EventLoopConfig) -> Self {
        let window = config.latency_window;
        Self {
            queue,
            handlers: DashMap::new(),
            default_handler: None,
            filter: Mutex::new(EventFilter::default()),
            counters: Counters::default(),
            latency_samples: Mutex::new(RingBuffer::new(window)),
            config,
        }
    }

    pub fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn set_default_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.default_handler = Some(handler);
    }

    pub async fn set_filter(&self, filter: EventFilter) {
        *self.filter.lock().await = filter;
    }

    /// Applied before enqueue, per spec.md §4.5. Returns true if the event
    /// should be enqueued.
    pub async fn accepts(&self, event: &PerceptionEvent) -> bool {
        let passes = self.filter.lock().await.passes(event);
        if !passes {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
        }
        passes
    }

    pub async fn metrics(&self) -> EventLoopMetrics {
        let samples = self.latency_samples.lock().await;
        let values = samples.to_vec();
        let average = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        let max = values.iter().cloned().fold(0.0_f64, f64::max);
        EventLoopMetrics {
            processed: self.counters.processed.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            aggregated: self.counters.aggregated.load(Ordering::Relaxed),
            debounced: self.counters.debounced.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            average_latency_ms: average,
            max_latency_ms: max,
        }
    }

    pub fn note_aggregated(&self) {
        self.counters.aggregated.fetch_add(1, Ordering::Relaxed);
    }
    pub fn note_debounced(&self) {
        self.counters.debounced.fetch_add(1, Ordering::Relaxed);
    }
    pub fn note_throttled(&self) {
        self.counters.throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// One iteration of the loop: dequeue with a ~1ms timeout, dispatch,
    /// sleep off the remainder of the tick. Returns the event processed, if
    /// any, so callers (the orchestrator) can drive a cycle from it.
    pub async fn tick(&self) -> Option<PerceptionEvent> {
        let dequeue_timeout = Duration::from_millis(1);
        let poll_interval = Duration::from_micros(100);
        let event = match tokio::time::timeout(dequeue_timeout, async {
            loop {
                if let Some(event) = self.queue.dequeue().await {
                    return event;
                }
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await
        {
            Ok(event) => event,
            Err(_) => return None,
        };

        let start = Instant::now();
        let event_type = event.kind.event_type().to_string();

        let handler = self
            .handlers
            .get(&event_type)
            .map(|h| h.clone())
            .or_else(|| self.default_handler.clone());

        if let Some(handler) = handler {
            // A handler fault is caught here and never unwinds the loop: the
            // handler call is driven on its own task so a panic inside it
            // surfaces as a `JoinError`, not an unwind through this one.
            let event_for_handler = event.clone();
            let handler = handler.clone();
            let joined = tokio::spawn(async move { handler.handle(&event_for_handler).await }).await;
            if joined.is_err() {
                error!(target: "event_loop", event_type = %event_type, "handler panicked");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            debug!(target: "event_loop", event_type = %event_type, "no handler registered");
        }

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.latency_samples.lock().await.push(elapsed_ms);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        let target = Duration::from_millis(self.config.latency_target_ms);
        if elapsed < target {
            tokio::time::sleep(target - elapsed).await;
        } else if elapsed_ms > self.config.latency_target_ms as f64 * 2.0 {
            warn!(target: "event_loop", elapsed_ms, "tick overran latency target");
        }

        Some(event)
    }

    /// Runs ticks in a loop until `cancel` is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: "event_loop", "cancelled, stopping");
                    break;
                }
                _ = self.tick() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, PerceptionKind};
    use std::sync::atomic::AtomicBool;

    fn event() -> PerceptionEvent {
        PerceptionEvent::new(PerceptionKind::Cursor, "test", Payload::new(), 5)
    }

    #[test]
    fn filter_drops_by_event_type() {
        let mut types = HashSet::new();
        types.insert("file_change".to_string());
        let filter = EventFilter {
            event_types: Some(types),
            ..Default::default()
        };
        assert!(!filter.passes(&event()));
    }

    #[test]
    fn filter_min_priority_drops_lower_priority_numbers_are_kept() {
        let filter = EventFilter {
            min_priority: Some(3),
            ..Default::default()
        };
        let mut e = event();
        e.priority = 5;
        assert!(!filter.passes(&e));
        e.priority = 2;
        assert!(filter.passes(&e));
    }

    #[tokio::test]
    async fn tick_processes_an_enqueued_event_and_records_latency() {
        let queue = Arc::new(EventQueue::new(10));
        queue.enqueue(event()).await.unwrap();
        let core = EventLoopCore::new(queue, EventLoopConfig {
            latency_target_ms: 1,
            latency_window: 10,
        });
        let handled = Arc::new(AtomicBool::new(false));
        let handled_clone = handled.clone();
        struct Handler(Arc<AtomicBool>);
        #[async_trait]
        impl EventHandler for Handler {
            async fn handle(&self, _event: &PerceptionEvent) {
                self.0.store(true, Ordering::SeqCst);
            }
        }
        core.register_handler("mouse_position", Arc::new(Handler(handled_clone)));
        core.tick().await;
        assert!(handled.load(Ordering::SeqCst));
        let metrics = core.metrics().await;
        assert_eq!(metrics.processed, 1);
    }
}
