//! Priority preemption end-to-end: a lower-priority mouse-move enqueued
//! first must yield to a higher-priority file-change enqueued after it but
//! before either is dequeued.

use perception_loop::model::{Payload, PerceptionEvent, PerceptionKind};
use perception_loop::EventQueue;

#[tokio::test]
async fn higher_priority_event_dispatched_first_despite_later_arrival() {
    let queue = EventQueue::new(100);

    let mouse_move = PerceptionEvent::new(PerceptionKind::Cursor, "cursor_monitor", Payload::new(), 5);
    let file_change = PerceptionEvent::new(PerceptionKind::Filesystem, "filesystem_monitor", Payload::new(), 3);
    let file_change_id = file_change.id.clone();

    queue.enqueue(mouse_move).await.unwrap();
    queue.enqueue(file_change).await.unwrap();

    let first = queue.dequeue().await.unwrap();
    assert_eq!(first.id, file_change_id);
    assert_eq!(first.kind.event_type(), "file_change");

    let second = queue.dequeue().await.unwrap();
    assert_eq!(second.kind.event_type(), "mouse_position");
}
