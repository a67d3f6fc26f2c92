//! Real-time monitors: five independently schedulable tasks, each producing
//! a stream of perception events of one kind. Grounded on the original
//! `real_time_monitor.py` (`MouseMonitor`, `FileSystemMonitor`, `TimeMonitor`,
//! `SystemStateMonitor`, `UserActivityMonitor`).

pub mod cursor;
pub mod filesystem;
pub mod scheduler;
pub mod system_state;
pub mod user_activity;

use crate::model::PerceptionEvent;
use async_trait::async_trait;

/// Common lifecycle every monitor exposes: explicit initialize/shutdown and
/// a callback registration point for emitted perception events.
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn initialize(&self) {}
    async fn shutdown(&self) {}
}

pub type EmitFn = Box<dyn Fn(PerceptionEvent) + Send + Sync>;
