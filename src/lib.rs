// Perception-Action Loop
// Real-time perception-action feedback loop runtime for an AI companion

pub mod aggregator;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod external;
pub mod feedback;
pub mod model;
pub mod monitors;
pub mod orchestrator;
pub mod queue;
pub mod ring;
pub mod shaping;
pub mod telemetry;

pub use aggregator::{AggregationRule, EventAggregator, LatestWithTrail, Reducer};
pub use config::RuntimeConfig;
pub use context::{CoreContext, CoreContextBuilder};
pub use error::{FeedbackError, MonitorError, OrchestratorError, QueueError};
pub use event_loop::{EventFilter, EventHandler, EventLoopConfig, EventLoopCore, EventLoopMetrics};
pub use external::{ActionExecutor, DeltaLearner, HistoricalMemoryStore};
pub use feedback::{FeedbackConfig, FeedbackProcessor};
pub use model::{
    ActionDecision, Cycle, CycleState, ExecutionResult, FeedbackLayer, FeedbackSignal, FeedbackTiming, LearningUpdate,
    PerceptionEvent, PerceptionKind,
};
pub use orchestrator::{CycleOrchestrator, OrchestratorConfig};
pub use queue::EventQueue;
pub use ring::RingBuffer;
pub use shaping::{DebounceRule, ShapingManager, ThrottleRule};
pub use telemetry::{init_tracing, Metrics, MetricsCollector};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("queue error: {0}")]
    Queue(#[from] error::QueueError),

    #[error("monitor error: {0}")]
    Monitor(#[from] error::MonitorError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] error::OrchestratorError),

    #[error("feedback error: {0}")]
    Feedback(#[from] error::FeedbackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
