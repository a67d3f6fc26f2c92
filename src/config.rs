//! Runtime configuration, nesting one struct per component. `Default`
//! reproduces every literal default named in the specification so a caller
//! can start from `RuntimeConfig::default()` without reading it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub cursor_dt_ms: u64,
    pub cursor_movement_threshold: f64,
    pub cursor_idle_timeout_ms: u64,
    pub cursor_history_capacity: usize,
    pub filesystem_poll_interval_ms: u64,
    pub filesystem_paths: Vec<String>,
    pub scheduler_tick_ms: u64,
    pub system_state_interval_ms: u64,
    pub user_activity_tick_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cursor_dt_ms: 16,
            cursor_movement_threshold: 5.0,
            cursor_idle_timeout_ms: 300,
            cursor_history_capacity: 1000,
            filesystem_poll_interval_ms: 1000,
            filesystem_paths: Vec::new(),
            scheduler_tick_ms: 1000,
            system_state_interval_ms: 5000,
            user_activity_tick_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 10_000 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventLoopSettings {
    pub latency_target_ms: u64,
    pub latency_window: usize,
}

impl Default for EventLoopSettings {
    fn default() -> Self {
        Self {
            latency_target_ms: 16,
            latency_window: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub completed_history_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            completed_history_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub mouse_move_window_ms: u64,
    pub mouse_move_max_batch: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            mouse_move_window_ms: 32,
            mouse_move_max_batch: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShapingConfig {
    pub file_change_debounce_ms: u64,
    pub system_state_throttle_ms: u64,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            file_change_debounce_ms: 100,
            system_state_throttle_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeedbackSettings {
    pub recent_scores_capacity: usize,
    pub strategy_adjustments_capacity: usize,
    pub recommendation_threshold: f64,
    pub min_feedback_for_adjustment: u64,
    pub min_feedback_for_recommendation: u64,
    pub min_scores_for_trend: usize,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            recent_scores_capacity: 100,
            strategy_adjustments_capacity: 100,
            recommendation_threshold: 0.7,
            min_feedback_for_adjustment: 3,
            min_feedback_for_recommendation: 5,
            min_scores_for_trend: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub monitors: MonitorConfig,
    pub queue: QueueConfig,
    pub aggregation: AggregationConfig,
    pub shaping: ShapingConfig,
    pub event_loop: EventLoopSettings,
    pub orchestrator: OrchestratorSettings,
    pub feedback: FeedbackSettings,
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
