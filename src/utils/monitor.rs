//! Host load sampling around job runs.

#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::Duration;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[cfg(feature = "cli")]
const MB: u64 = 1024 * 1024;

/// Host figures relevant to whether another simulation fits.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub load_one: f64,
    pub available_memory_mb: u64,
    pub total_memory_mb: u64,
    pub tracker_memory_mb: u64,
    /// Direct children of the tracker, i.e. the `sh -c` of each running job.
    pub tool_processes: usize,
    pub tool_memory_mb: u64,
}

impl HostSnapshot {
    pub fn memory_pressure(&self) -> f32 {
        if self.total_memory_mb == 0 {
            return 0.0;
        }
        let used = self.total_memory_mb.saturating_sub(self.available_memory_mb);
        used as f32 / self.total_memory_mb as f32 * 100.0
    }
}

#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Tool process sampling unavailable: {}", e);
                None
            }
        };

        let mut system = System::new();
        if enabled {
            // CPU usage is a delta, so prime it once.
            system.refresh_cpu_usage();
        }

        Self {
            system: Mutex::new(system),
            pid,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn snapshot(&self) -> Option<HostSnapshot> {
        if !self.enabled {
            return None;
        }
        let mut system = self.system.lock().ok()?;
        system.refresh_cpu_usage();
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let (tracker_memory, tool_processes, tool_memory) = match self.pid {
            Some(pid) => {
                let tracker = system.process(pid).map_or(0, |p| p.memory());
                let children: Vec<u64> = system
                    .processes()
                    .values()
                    .filter(|p| p.parent() == Some(pid))
                    .map(|p| p.memory())
                    .collect();
                (tracker, children.len(), children.iter().sum())
            }
            None => (0, 0, 0),
        };

        Some(HostSnapshot {
            cpu_percent: system.global_cpu_usage(),
            load_one: System::load_average().one,
            available_memory_mb: system.available_memory() / MB,
            total_memory_mb: system.total_memory() / MB,
            tracker_memory_mb: tracker_memory / MB,
            tool_processes,
            tool_memory_mb: tool_memory / MB,
        })
    }

    pub fn job_started(&self, job_id: &str) {
        if let Some(host) = self.snapshot() {
            tracing::info!(
                job_id,
                "📊 Host before job - CPU: {:.1}%, load: {:.2}, memory: {:.0}% used ({}MB free), {} tool process(es)",
                host.cpu_percent,
                host.load_one,
                host.memory_pressure(),
                host.available_memory_mb,
                host.tool_processes
            );
        }
    }

    pub fn job_finished(&self, job_id: &str, elapsed: Duration) {
        if let Some(host) = self.snapshot() {
            tracing::info!(
                job_id,
                "📊 Job took {:?} - CPU: {:.1}%, tracker: {}MB, tools still running: {} ({}MB)",
                elapsed,
                host.cpu_percent,
                host.tracker_memory_mb,
                host.tool_processes,
                host.tool_memory_mb
            );
        }
    }
}

#[cfg(feature = "cli")]
impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn is_enabled(&self) -> bool {
        false
    }

    pub fn snapshot(&self) -> Option<HostSnapshot> {
        None
    }

    pub fn job_started(&self, _job_id: &str) {}

    pub fn job_finished(&self, _job_id: &str, _elapsed: std::time::Duration) {}
}
