//! Cursor burst end-to-end: ten fast position samples through the monitor,
//! aggregator, and queue should collapse into one dispatched perception.

use async_trait::async_trait;
use perception_loop::cancel::CancellationToken;
use perception_loop::monitors::cursor::{CursorMonitor, CursorMonitorConfig, CursorPosition, CursorSampler};
use perception_loop::monitors::EmitFn;
use perception_loop::{AggregationRule, EventAggregator, EventQueue, LatestWithTrail};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SteppingSampler {
    step: AtomicU64,
}

#[async_trait]
impl CursorSampler for SteppingSampler {
    async fn sample(&self) -> Result<CursorPosition, String> {
        let n = self.step.fetch_add(1, Ordering::SeqCst) as f64 + 1.0;
        Ok(CursorPosition { x: n, y: n })
    }
}

#[tokio::test]
async fn ten_fast_samples_collapse_into_one_dispatch() {
    let queue = Arc::new(EventQueue::new(100));
    let (aggregator, mut agg_rx) = EventAggregator::new();
    aggregator.configure(
        "mouse_position",
        AggregationRule {
            window_ms: 32,
            max_batch: 10,
            reducer: Arc::new(LatestWithTrail),
        },
    );
    let aggregator = Arc::new(aggregator);

    let queue_for_timer = queue.clone();
    tokio::spawn(async move {
        while let Some(event) = agg_rx.recv().await {
            let _ = queue_for_timer.enqueue(event).await;
        }
    });

    let monitor = Arc::new(CursorMonitor::new(
        CursorMonitorConfig {
            dt_ms: 1,
            movement_threshold: 0.5,
            ..Default::default()
        },
        Arc::new(SteppingSampler { step: AtomicU64::new(0) }),
    ));

    let aggregator_for_emit = aggregator.clone();
    let queue_for_emit = queue.clone();
    let emit: EmitFn = Box::new(move |event| {
        let aggregator = aggregator_for_emit.clone();
        let queue = queue_for_emit.clone();
        tokio::spawn(async move {
            if let Some(event) = aggregator.add(event).await {
                let _ = queue.enqueue(event).await;
            }
        });
    });

    let cancel = CancellationToken::new();
    let run_handle = tokio::spawn(monitor.clone().run(emit, cancel.clone()));

    let started = std::time::Instant::now();
    loop {
        if queue.len().await >= 1 {
            break;
        }
        assert!(started.elapsed() < Duration::from_millis(500), "timed out waiting for dispatch");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cancel.cancel();
    let _ = run_handle.await;

    assert_eq!(queue.len().await, 1);
    let dispatched = queue.dequeue().await.expect("one event queued");
    assert_eq!(dispatched.payload.get("event_count").unwrap(), &serde_json::json!(10));

    let positions = dispatched.payload.get("positions").unwrap().as_array().unwrap();
    let last = positions.last().unwrap();
    assert_eq!(last.get("x").unwrap(), &serde_json::json!(10.0));
    assert_eq!(last.get("y").unwrap(), &serde_json::json!(10.0));
}
