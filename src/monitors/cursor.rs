//! Cursor monitor: samples position every `dt` ms, computes velocity and an
//! "is moving" flag, keeps a bounded history. Grounded on `MouseMonitor` in
//! the original `real_time_monitor.py`; the default thresholds (16ms cadence,
//! 5px movement threshold, 300ms idle timeout, 1000-sample history) are
//! carried over verbatim.

use super::{EmitFn, Monitor};
use crate::cancel::CancellationToken;
use crate::model::{PerceptionEvent, PerceptionKind};
use crate::ring::RingBuffer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// The OS-level sampler hook the spec assumes an implementation supplies
/// (see SPEC_FULL.md §9). Injected so monitor logic stays testable without
/// a real display server.
#[async_trait]
pub trait CursorSampler: Send + Sync {
    async fn sample(&self) -> Result<CursorPosition, String>;
}

/// Deterministic no-op sampler: always reports the origin. Useful for tests
/// and headless deployments; a real OS-backed sampler is a platform-specific
/// seam left for the host application to supply.
pub struct NullCursorSampler;

#[async_trait]
impl CursorSampler for NullCursorSampler {
    async fn sample(&self) -> Result<CursorPosition, String> {
        Ok(CursorPosition { x: 0.0, y: 0.0 })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CursorMonitorConfig {
    pub dt_ms: u64,
    pub movement_threshold: f64,
    pub idle_timeout_ms: u64,
    pub history_capacity: usize,
}

impl Default for CursorMonitorConfig {
    fn default() -> Self {
        Self {
            dt_ms: 16,
            movement_threshold: 5.0,
            idle_timeout_ms: 300,
            history_capacity: 1000,
        }
    }
}

struct State {
    history: RingBuffer<(CursorPosition, Instant)>,
    last_move_at: Option<Instant>,
    is_moving: bool,
}

pub struct CursorMonitor {
    config: CursorMonitorConfig,
    sampler: Arc<dyn CursorSampler>,
    state: Mutex<State>,
}

impl CursorMonitor {
    pub fn new(config: CursorMonitorConfig, sampler: Arc<dyn CursorSampler>) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            sampler,
            state: Mutex::new(State {
                history: RingBuffer::new(capacity),
                last_move_at: None,
                is_moving: false,
            }),
        }
    }

    /// Snapshot of recent positions, newest last.
    pub async fn history(&self) -> Vec<CursorPosition> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .map(|(pos, _)| *pos)
            .collect()
    }

    async fn sample_once(&self, emit: &EmitFn) {
        let position = match self.sampler.sample().await {
            Ok(p) => p,
            Err(reason) => {
                warn!(target: "monitor.cursor", reason, "sampling failed");
                return;
            }
        };
        let now = Instant::now();

        let mut state = self.state.lock().await;
        let (velocity, displacement) = match state.history.iter().last() {
            Some((prev, prev_at)) => {
                let dt = now.duration_since(*prev_at).as_secs_f64().max(1e-6);
                let dx = position.x - prev.x;
                let dy = position.y - prev.y;
                ((dx / dt, dy / dt), (dx * dx + dy * dy).sqrt())
            }
            None => ((0.0, 0.0), 0.0),
        };

        if displacement >= self.config.movement_threshold {
            state.is_moving = true;
            state.last_move_at = Some(now);
        } else if let Some(last_move) = state.last_move_at {
            if now.duration_since(last_move).as_millis() as u64 >= self.config.idle_timeout_ms {
                state.is_moving = false;
            }
        }

        state.history.push((position, now));
        let is_moving = state.is_moving;
        drop(state);

        let mut payload = crate::model::Payload::new();
        payload.insert("x".into(), position.x.into());
        payload.insert("y".into(), position.y.into());
        payload.insert("velocity_x".into(), velocity.0.into());
        payload.insert("velocity_y".into(), velocity.1.into());
        payload.insert("is_moving".into(), is_moving.into());

        emit(PerceptionEvent::new(PerceptionKind::Cursor, "cursor_monitor", payload, 5));
    }

    pub async fn run(self: Arc<Self>, emit: EmitFn, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.config.dt_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample_once(&emit).await,
            }
        }
    }
}

#[async_trait]
impl Monitor for CursorMonitor {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct SteppingSampler {
        step: AtomicU64,
    }

    #[async_trait]
    impl CursorSampler for SteppingSampler {
        async fn sample(&self) -> Result<CursorPosition, String> {
            let n = self.step.fetch_add(1, Ordering::SeqCst) as f64;
            Ok(CursorPosition { x: n, y: n })
        }
    }

    #[tokio::test]
    async fn flags_moving_on_sufficient_displacement() {
        let monitor = CursorMonitor::new(
            CursorMonitorConfig {
                movement_threshold: 1.0,
                ..Default::default()
            },
            Arc::new(SteppingSampler { step: AtomicU64::new(0) }),
        );
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted_clone = emitted.clone();
        let emit: EmitFn = Box::new(move |event| {
            let emitted_clone = emitted_clone.clone();
            tokio::spawn(async move { emitted_clone.lock().await.push(event) });
        });
        monitor.sample_once(&emit).await;
        monitor.sample_once(&emit).await;
        let history = monitor.history().await;
        assert_eq!(history.len(), 2);
    }
}
