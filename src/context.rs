//! `CoreContext`: explicit dependency passing replacing the source's
//! module-level singletons (spec.md §9 Design Notes). Constructed once at
//! startup via `CoreContextBuilder`, shut down deterministically. Grounded
//! on the teacher's `Loom` struct (`core/src/lib.rs`) and its
//! `new`/`start`/`shutdown` lifecycle.

use crate::aggregator::{AggregationRule, EventAggregator, LatestWithTrail};
use crate::cancel::CancellationToken;
use crate::config::RuntimeConfig;
use crate::event_loop::{EventHandler, EventLoopConfig, EventLoopCore};
use crate::external::{ActionExecutor, ActionOutcome, DeltaLearner, HistoricalMemoryStore};
use crate::feedback::{FeedbackConfig, FeedbackProcessor};
use crate::model::PerceptionEvent;
use crate::monitors::cursor::{CursorMonitor, CursorMonitorConfig, CursorSampler, NullCursorSampler};
use crate::monitors::filesystem::{FileSystemMonitor, FileSystemMonitorConfig};
use crate::monitors::scheduler::SchedulerMonitor;
use crate::monitors::system_state::{SystemStateMonitor, SystemStateMonitorConfig};
use crate::monitors::user_activity::UserActivityMonitor;
use crate::monitors::EmitFn;
use crate::orchestrator::{CycleOrchestrator, OrchestratorConfig};
use crate::queue::EventQueue;
use crate::shaping::{DebounceRule, ShapingManager, ThrottleRule};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Routes every perception dequeued by the event loop into a new cycle.
/// Installed as the loop's default handler so spec.md §2's central
/// Event Loop → Cycle Orchestrator data flow actually fires in production,
/// not just in orchestrator unit tests.
struct CycleHandler {
    orchestrator: Arc<CycleOrchestrator>,
}

#[async_trait]
impl EventHandler for CycleHandler {
    async fn handle(&self, event: &PerceptionEvent) {
        self.orchestrator.begin_cycle(event.clone()).await;
    }
}

pub struct CoreContext {
    pub config: RuntimeConfig,
    pub queue: Arc<EventQueue>,
    pub aggregator: Arc<EventAggregator>,
    pub shaping: Arc<ShapingManager>,
    pub event_loop: Arc<EventLoopCore>,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub feedback_processor: Arc<FeedbackProcessor>,
    pub cursor_monitor: Arc<CursorMonitor>,
    pub filesystem_monitor: Arc<FileSystemMonitor>,
    pub scheduler_monitor: Arc<SchedulerMonitor>,
    pub system_state_monitor: Arc<SystemStateMonitor>,
    pub user_activity_monitor: Arc<UserActivityMonitor>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct CoreContextBuilder {
    config: RuntimeConfig,
    executor: Option<Arc<dyn ActionExecutor>>,
    memory_store: Option<Arc<dyn HistoricalMemoryStore>>,
    delta_learner: Option<Arc<dyn DeltaLearner>>,
    cursor_sampler: Option<Arc<dyn CursorSampler>>,
}

impl CoreContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn HistoricalMemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn with_delta_learner(mut self, learner: Arc<dyn DeltaLearner>) -> Self {
        self.delta_learner = Some(learner);
        self
    }

    pub fn with_cursor_sampler(mut self, sampler: Arc<dyn CursorSampler>) -> Self {
        self.cursor_sampler = Some(sampler);
        self
    }

    pub fn build(self) -> CoreContext {
        let config = self.config;

        let queue = Arc::new(EventQueue::new(config.queue.max_size));

        let (aggregator, mut agg_rx) = EventAggregator::new();
        aggregator.configure(
            "mouse_position",
            AggregationRule {
                window_ms: config.aggregation.mouse_move_window_ms,
                max_batch: config.aggregation.mouse_move_max_batch,
                reducer: Arc::new(LatestWithTrail),
            },
        );
        let aggregator = Arc::new(aggregator);

        let (shaping, mut shape_rx) = ShapingManager::new();
        shaping.configure_debounce(
            "file_change",
            DebounceRule {
                delay_ms: config.shaping.file_change_debounce_ms,
                leading: false,
                trailing: true,
            },
        );
        shaping.configure_throttle(
            "system_state",
            ThrottleRule {
                interval_ms: config.shaping.system_state_throttle_ms,
                leading: true,
                trailing: true,
            },
        );
        let shaping = Arc::new(shaping);

        // Timer-fired emissions (a window closing, a debounce settling) land
        // on these channels rather than returning synchronously from
        // `add`/`process`; forward them straight to the queue.
        let queue_for_agg = queue.clone();
        tokio::spawn(async move {
            while let Some(event) = agg_rx.recv().await {
                let _ = queue_for_agg.enqueue(event).await;
            }
        });
        let queue_for_shape = queue.clone();
        tokio::spawn(async move {
            while let Some(event) = shape_rx.recv().await {
                let _ = queue_for_shape.enqueue(event).await;
            }
        });

        let feedback_processor = Arc::new(FeedbackProcessor::new(
            FeedbackConfig {
                recent_scores_capacity: config.feedback.recent_scores_capacity,
                strategy_adjustments_capacity: config.feedback.strategy_adjustments_capacity,
                recommendation_threshold: config.feedback.recommendation_threshold,
                min_feedback_for_adjustment: config.feedback.min_feedback_for_adjustment,
                min_feedback_for_recommendation: config.feedback.min_feedback_for_recommendation,
                min_scores_for_trend: config.feedback.min_scores_for_trend,
            },
            self.memory_store.clone(),
            self.delta_learner.clone(),
        ));

        let executor = self.executor.clone();
        let orchestrator = Arc::new(CycleOrchestrator::new(
            feedback_processor.clone(),
            self.executor,
            self.memory_store,
            self.delta_learner,
            OrchestratorConfig {
                completed_history_capacity: config.orchestrator.completed_history_capacity,
            },
        ));

        // Forward the executor's asynchronous post-execution callback into
        // the orchestrator's result handler — the other half of spec.md §2's
        // central data flow (Executor callback → feedback/learning).
        if let Some(executor) = &executor {
            let orchestrator_for_callback = orchestrator.clone();
            executor.register_post_execution_callback(Arc::new(move |outcome: ActionOutcome| {
                let orchestrator = orchestrator_for_callback.clone();
                tokio::spawn(async move {
                    orchestrator
                        .on_execution_result(&outcome.action_id, outcome.success, outcome.data, outcome.error_message)
                        .await;
                });
            }));
        }

        let mut event_loop_core = EventLoopCore::new(
            queue.clone(),
            EventLoopConfig {
                latency_target_ms: config.event_loop.latency_target_ms,
                latency_window: config.event_loop.latency_window,
            },
        );
        event_loop_core.set_default_handler(Arc::new(CycleHandler {
            orchestrator: orchestrator.clone(),
        }));
        let event_loop = Arc::new(event_loop_core);

        let cursor_monitor = Arc::new(CursorMonitor::new(
            CursorMonitorConfig {
                dt_ms: config.monitors.cursor_dt_ms,
                movement_threshold: config.monitors.cursor_movement_threshold,
                idle_timeout_ms: config.monitors.cursor_idle_timeout_ms,
                history_capacity: config.monitors.cursor_history_capacity,
            },
            self.cursor_sampler.unwrap_or_else(|| Arc::new(NullCursorSampler)),
        ));

        let filesystem_monitor = Arc::new(FileSystemMonitor::new(FileSystemMonitorConfig {
            paths: config.monitors.filesystem_paths.iter().map(Into::into).collect(),
            poll_interval_ms: config.monitors.filesystem_poll_interval_ms,
            ..Default::default()
        }));

        let scheduler_monitor = Arc::new(SchedulerMonitor::new(config.monitors.scheduler_tick_ms));

        let system_state_monitor = Arc::new(SystemStateMonitor::new(SystemStateMonitorConfig {
            interval_ms: config.monitors.system_state_interval_ms,
        }));

        let user_activity_monitor = Arc::new(UserActivityMonitor::new(config.monitors.user_activity_tick_ms));

        CoreContext {
            config,
            queue,
            aggregator,
            shaping,
            event_loop,
            orchestrator,
            feedback_processor,
            cursor_monitor,
            filesystem_monitor,
            scheduler_monitor,
            system_state_monitor,
            user_activity_monitor,
            cancel: CancellationToken::new(),
        }
    }
}

impl CoreContext {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Builds the `monitor -> aggregator -> shaping -> queue` pipeline entry
    /// point every monitor's `run()` is given as its `emit` callback.
    fn make_emit(&self) -> EmitFn {
        let aggregator = self.aggregator.clone();
        let shaping = self.shaping.clone();
        let queue = self.queue.clone();
        Box::new(move |event: PerceptionEvent| {
            let aggregator = aggregator.clone();
            let shaping = shaping.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let Some(event) = aggregator.add(event).await else {
                    return;
                };
                let Some(event) = shaping.process(event).await else {
                    return;
                };
                let _ = queue.enqueue(event).await;
            });
        })
    }

    /// Spawns every long-lived task (monitors, the loop tick) and returns
    /// immediately; shutdown is driven by `shutdown()`.
    pub fn start(&self) {
        info!(target: "core", "starting perception-action loop");

        tokio::spawn(self.cursor_monitor.clone().run(self.make_emit(), self.cancel.clone()));
        tokio::spawn(self.filesystem_monitor.clone().run(self.make_emit(), self.cancel.clone()));
        tokio::spawn(self.scheduler_monitor.clone().run(self.make_emit(), self.cancel.clone()));
        tokio::spawn(self.system_state_monitor.clone().run(self.make_emit(), self.cancel.clone()));
        tokio::spawn(self.user_activity_monitor.clone().run(self.make_emit(), self.cancel.clone()));

        tokio::spawn(self.event_loop.clone().run(self.cancel.clone()));
    }

    pub async fn shutdown(&self) {
        info!(target: "core", "shutting down perception-action loop");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_produces_wired_context() {
        let ctx = CoreContextBuilder::new().build();
        assert_eq!(ctx.queue.len().await, 0);
        assert_eq!(ctx.orchestrator.active_count(), 0);
    }
}
