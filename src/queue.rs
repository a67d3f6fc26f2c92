//! Priority event queue: ordered by (priority ascending, sequence ascending),
//! FIFO within priority, cancellable, deferrable. Grounded on the original
//! `EventQueue` (a `heapq` of `(priority.level, sequence, event)` tuples
//! guarded by an `asyncio.Lock`); reimplemented here over a `BinaryHeap`
//! guarded by a `tokio::sync::Mutex`.

use crate::error::{QueueError, QueueResult};
use crate::model::PerceptionEvent;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Cancelled,
    Deferred,
}

struct Entry {
    priority: u8,
    sequence: u64,
    event: PerceptionEvent,
    status: Status,
    deferred_until: Option<DateTime<Utc>>,
}

/// Min-heap ordering key: lower priority number and lower sequence sort first.
/// `BinaryHeap` is a max-heap, so `Ord` is reversed.
#[derive(PartialEq, Eq)]
struct HeapKey {
    priority: u8,
    sequence: u64,
    id: String,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<HeapKey>,
    entries: HashMap<String, Entry>,
    next_sequence: u64,
    max_size: usize,
}

/// Safe for concurrent producers and a single consumer; all state lives
/// behind one mutex, matching spec.md §4.2's "equivalently, executes under a
/// single mutex that protects heap and id-index".
pub struct EventQueue {
    inner: Mutex<Inner>,
}

impl EventQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                entries: HashMap::new(),
                next_sequence: 0,
                max_size,
            }),
        }
    }

    pub async fn enqueue(&self, event: PerceptionEvent) -> QueueResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.entries.len() >= inner.max_size {
            return Err(QueueError::Overflow {
                max_size: inner.max_size,
            });
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let priority = event.priority;
        let id = event.id.clone();
        inner.heap.push(HeapKey {
            priority,
            sequence,
            id: id.clone(),
        });
        inner.entries.insert(
            id,
            Entry {
                priority,
                sequence,
                event,
                status: Status::Pending,
                deferred_until: None,
            },
        );
        Ok(true)
    }

    /// Pops the minimal (priority, sequence) entry whose status is pending
    /// and whose deferred-until is in the past. A deferred-and-not-ready
    /// entry is pushed back onto the heap with its original priority and a
    /// fresh sequence (spec.md §3 invariant), not silently dropped.
    pub async fn dequeue(&self) -> Option<PerceptionEvent> {
        let mut inner = self.inner.lock().await;
        loop {
            let key = inner.heap.pop()?;
            let take = match inner.entries.get(&key.id) {
                Some(entry) if entry.sequence != key.sequence => continue,
                Some(entry) => match entry.status {
                    Status::Cancelled => {
                        inner.entries.remove(&key.id);
                        continue;
                    }
                    Status::Pending => true,
                    Status::Deferred => {
                        let ready = entry
                            .deferred_until
                            .map(|until| Utc::now() >= until)
                            .unwrap_or(true);
                        ready
                    }
                },
                None => continue,
            };

            if take {
                let entry = inner.entries.remove(&key.id).expect("checked above");
                return Some(entry.event);
            }

            // Not ready yet: re-enter the queue with a fresh sequence,
            // retaining original priority.
            let fresh_sequence = inner.next_sequence;
            inner.next_sequence += 1;
            let priority = key.priority;
            let id = key.id.clone();
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.sequence = fresh_sequence;
            }
            inner.heap.push(HeapKey {
                priority,
                sequence: fresh_sequence,
                id,
            });
            continue;
        }
    }

    pub async fn cancel(&self, event_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(event_id) {
            Some(entry) => {
                entry.status = Status::Cancelled;
                Ok(())
            }
            None => Err(QueueError::UnknownEvent(event_id.to_string())),
        }
    }

    pub async fn defer(&self, event_id: &str, until: DateTime<Utc>) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(event_id) {
            Some(entry) => {
                entry.status = Status::Deferred;
                entry.deferred_until = Some(until);
                Ok(())
            }
            None => Err(QueueError::UnknownEvent(event_id.to_string())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, PerceptionKind};

    fn event(priority: u8) -> PerceptionEvent {
        PerceptionEvent::new(PerceptionKind::Cursor, "test", Payload::new(), priority)
    }

    #[tokio::test]
    async fn dispatches_same_type_in_arrival_order() {
        let q = EventQueue::new(100);
        let e1 = event(5);
        let e2 = event(5);
        let id1 = e1.id.clone();
        let id2 = e2.id.clone();
        q.enqueue(e1).await.unwrap();
        q.enqueue(e2).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().id, id1);
        assert_eq!(q.dequeue().await.unwrap().id, id2);
    }

    #[tokio::test]
    async fn lower_priority_number_dispatched_first() {
        let q = EventQueue::new(100);
        let low_prio_event = event(5); // priority 5 enqueued first
        let high_prio_event = event(3); // priority 3 (more urgent) enqueued second
        let high_id = high_prio_event.id.clone();
        q.enqueue(low_prio_event).await.unwrap();
        q.enqueue(high_prio_event).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap().id, high_id);
    }

    #[tokio::test]
    async fn overflow_rejects_enqueue() {
        let q = EventQueue::new(1);
        q.enqueue(event(1)).await.unwrap();
        let err = q.enqueue(event(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::Overflow { .. }));
    }

    #[tokio::test]
    async fn cancelled_entry_never_dispatched() {
        let q = EventQueue::new(100);
        let e = event(1);
        let id = e.id.clone();
        q.enqueue(e).await.unwrap();
        q.cancel(&id).await.unwrap();
        assert!(q.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn deferred_entry_waits_until_ready() {
        let q = EventQueue::new(100);
        let e = event(1);
        let id = e.id.clone();
        q.enqueue(e).await.unwrap();
        q.defer(&id, Utc::now() + chrono::Duration::milliseconds(50))
            .await
            .unwrap();
        assert!(q.dequeue().await.is_none());
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(q.dequeue().await.unwrap().id, id);
    }
}
