//! Filesystem debounce end-to-end: three file-change events arriving close
//! together (each within the 100ms debounce window of the previous one)
//! should settle into exactly one dispatched perception.

use perception_loop::model::{Payload, PerceptionEvent, PerceptionKind};
use perception_loop::{DebounceRule, EventQueue, ShapingManager};
use std::sync::Arc;
use std::time::Duration;

fn file_event() -> PerceptionEvent {
    PerceptionEvent::new(PerceptionKind::Filesystem, "filesystem_monitor", Payload::new(), 4)
}

#[tokio::test]
async fn three_close_events_settle_into_one_dispatch() {
    let queue = Arc::new(EventQueue::new(100));
    let (shaping, mut shape_rx) = ShapingManager::new();
    shaping.configure_debounce(
        "file_change",
        DebounceRule {
            delay_ms: 100,
            leading: false,
            trailing: true,
        },
    );
    let shaping = Arc::new(shaping);

    let queue_for_timer = queue.clone();
    tokio::spawn(async move {
        while let Some(event) = shape_rx.recv().await {
            let _ = queue_for_timer.enqueue(event).await;
        }
    });

    assert!(shaping.process(file_event()).await.is_none());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(shaping.process(file_event()).await.is_none());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(shaping.process(file_event()).await.is_none());

    let started = std::time::Instant::now();
    loop {
        if queue.len().await >= 1 {
            break;
        }
        assert!(started.elapsed() < Duration::from_millis(500), "debounce never settled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(queue.len().await, 1);
    let dispatched = queue.dequeue().await.unwrap();
    assert_eq!(dispatched.kind.event_type(), "file_change");
    assert!(queue.is_empty().await);
}
