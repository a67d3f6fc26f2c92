//! System-state monitor: samples CPU, memory, disk, network I/O, process
//! count, and load average at a configured cadence. Grounded on
//! `SystemStateMonitor` in the original `real_time_monitor.py` (which uses
//! `psutil`); `sysinfo` is this implementation's Rust analogue.

use super::{EmitFn, Monitor};
use crate::cancel::CancellationToken;
use crate::model::{PerceptionEvent, PerceptionKind};
use async_trait::async_trait;
use std::sync::Arc;
use sysinfo::{DiskExt, NetworkExt, System, SystemExt};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct SystemStateMonitorConfig {
    pub interval_ms: u64,
}

impl Default for SystemStateMonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

pub struct SystemStateMonitor {
    config: SystemStateMonitorConfig,
    system: Mutex<System>,
}

impl SystemStateMonitor {
    pub fn new(config: SystemStateMonitorConfig) -> Self {
        Self {
            config,
            system: Mutex::new(System::new_all()),
        }
    }

    async fn sample_once(&self, emit: &EmitFn) {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks();
        system.refresh_networks();
        system.refresh_processes();

        let cpu_percent = system.global_cpu_info().cpu_usage() as f64;
        let memory_percent = if system.total_memory() > 0 {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        } else {
            0.0
        };
        let disk_used: u64 = system
            .disks()
            .iter()
            .map(|d| d.total_space().saturating_sub(d.available_space()))
            .sum();
        let (bytes_received, bytes_transmitted) = system
            .networks()
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });
        let process_count = system.processes().len();
        let load_average = system.load_average();

        let mut payload = crate::model::Payload::new();
        payload.insert("cpu_percent".into(), cpu_percent.into());
        payload.insert("memory_percent".into(), memory_percent.into());
        payload.insert("disk_used_bytes".into(), disk_used.into());
        payload.insert("bytes_received".into(), bytes_received.into());
        payload.insert("bytes_transmitted".into(), bytes_transmitted.into());
        payload.insert("process_count".into(), process_count.into());
        payload.insert("load_average_1m".into(), load_average.one.into());

        emit(PerceptionEvent::new(
            PerceptionKind::SystemState,
            "system_state_monitor",
            payload,
            6,
        ));
    }

    pub async fn run(self: Arc<Self>, emit: EmitFn, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.config.interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample_once(&emit).await,
            }
        }
    }
}

#[async_trait]
impl Monitor for SystemStateMonitor {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn emits_one_perception_per_sample() {
        let monitor = SystemStateMonitor::new(SystemStateMonitorConfig { interval_ms: 10 });
        let count = Arc::new(StdMutex::new(0));
        let count_clone = count.clone();
        let emit: EmitFn = Box::new(move |event| {
            assert_eq!(event.kind.event_type(), "system_state");
            *count_clone.lock().unwrap() += 1;
        });
        monitor.sample_once(&emit).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
