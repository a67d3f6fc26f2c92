//! Tagged-union data model shared by every component: perception events in,
//! learning updates out, with a cycle tying the two together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Perception kind tag. The payload carries kind-specific fields as an
/// untyped map; handlers dispatch on this tag rather than the payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptionKind {
    Cursor,
    Filesystem,
    ScheduledTime,
    SystemState,
    UserActivity,
    AudioState,
    VisualState,
    Voice,
}

impl PerceptionKind {
    /// The string tag used on monitor outputs and event-type-keyed tables
    /// (aggregation/debounce/throttle rules, handler lookup).
    pub fn event_type(&self) -> &'static str {
        match self {
            PerceptionKind::Cursor => "mouse_position",
            PerceptionKind::Filesystem => "file_change",
            PerceptionKind::ScheduledTime => "time_event",
            PerceptionKind::SystemState => "system_state",
            PerceptionKind::UserActivity => "user_activity",
            PerceptionKind::AudioState => "audio_state",
            PerceptionKind::VisualState => "visual_state",
            PerceptionKind::Voice => "voice",
        }
    }
}

pub type Payload = Map<String, Value>;

/// A single perception ingested from a monitor. Consumed exactly once;
/// destroyed after the cycle it opens completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionEvent {
    pub id: String,
    pub kind: PerceptionKind,
    pub source: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    /// 1 = highest priority, 10 = lowest.
    pub priority: u8,
    pub processed: bool,
}

impl PerceptionEvent {
    pub fn new(kind: PerceptionKind, source: impl Into<String>, payload: Payload, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            payload,
            created_at: Utc::now(),
            priority,
            processed: false,
        }
    }
}

/// The action the cognitive stage (or its fallback) decided to take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub id: String,
    pub perception_id: String,
    pub action_kind: String,
    pub target: Option<String>,
    pub urgency: f64,
    pub confidence: f64,
    pub parameters: Payload,
    pub created_at: DateTime<Utc>,
    pub expected_outcome: Option<String>,
}

impl ActionDecision {
    pub fn new(perception_id: impl Into<String>, action_kind: impl Into<String>, urgency: f64, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            perception_id: perception_id.into(),
            action_kind: action_kind.into(),
            target: None,
            urgency,
            confidence,
            parameters: Payload::new(),
            created_at: Utc::now(),
            expected_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLayer {
    Physiological,
    Cognitive,
    Emotional,
    Social,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTiming {
    Immediate,
    Delayed,
    Predictive,
    Retrospective,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub id: String,
    pub action_id: String,
    pub layer: FeedbackLayer,
    pub timing: FeedbackTiming,
    /// In [0, 1].
    pub magnitude: f64,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackSignal {
    pub fn new(action_id: impl Into<String>, layer: FeedbackLayer, timing: FeedbackTiming, magnitude: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_id: action_id.into(),
            layer,
            timing,
            magnitude,
            payload: Payload::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-sink status recorded on a `LearningUpdate` once a best-effort update
/// call has been attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkStatus {
    pub sink: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAdjustmentSignals {
    pub urgency_modifier: f64,
    pub confidence_update: f64,
    pub pattern_reinforcement: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningUpdate {
    pub id: String,
    pub action_id: String,
    pub prediction_error: f64,
    pub performance_delta: f64,
    pub strategy_adjustment: StrategyAdjustmentSignals,
    pub timestamp: DateTime<Utc>,
    pub sink_status: Vec<SinkStatus>,
}

impl LearningUpdate {
    pub fn new(action_id: impl Into<String>, expected_confidence: f64, realized_success: bool) -> Self {
        let realized = if realized_success { 1.0 } else { 0.0 };
        let prediction_error = (expected_confidence - realized).abs();
        let performance_delta = realized - expected_confidence;
        Self {
            id: Uuid::new_v4().to_string(),
            action_id: action_id.into(),
            prediction_error,
            performance_delta,
            strategy_adjustment: StrategyAdjustmentSignals {
                urgency_modifier: if prediction_error > 0.5 { 0.1 } else { 0.0 },
                confidence_update: realized,
                pattern_reinforcement: realized > expected_confidence,
            },
            timestamp: Utc::now(),
            sink_status: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Payload,
    pub error_message: Option<String>,
}

/// Per-cycle state, mirroring `spec.md`'s `opened → decided → dispatched →
/// resulted → feedback-attached → completed` state machine, with an
/// absorbing `failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Opened,
    Decided,
    Dispatched,
    Resulted,
    FeedbackAttached,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: String,
    pub perception: PerceptionEvent,
    pub decision: Option<ActionDecision>,
    pub action_id: Option<String>,
    pub execution_result: Option<ExecutionResult>,
    pub feedback_signals: Vec<FeedbackSignal>,
    pub learning_update: Option<LearningUpdate>,
    pub state: CycleState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
}

impl Cycle {
    pub fn open(perception: PerceptionEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            perception,
            decision: None,
            action_id: None,
            execution_result: None,
            feedback_signals: Vec::new(),
            learning_update: None,
            state: CycleState::Opened,
            end_time: None,
            latency_ms: None,
        }
    }

    /// A cycle becomes completable once it has both an execution result and
    /// at least one feedback signal (spec.md §4.6 stage 4).
    pub fn is_completable(&self) -> bool {
        self.execution_result.is_some() && !self.feedback_signals.is_empty()
    }

    pub fn complete(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.latency_ms = Some((end - self.start_time).num_milliseconds() as f64);
        self.state = CycleState::Completed;
    }

    pub fn fail(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        self.latency_ms = Some((end - self.start_time).num_milliseconds() as f64);
        self.state = CycleState::Failed;
    }
}

/// Fixed-capacity FIFO of completed cycles, reusing [`crate::ring::RingBuffer`].
pub type CompletedHistory = crate::ring::RingBuffer<Cycle>;
