use std::time::{Duration, Instant};

#[cfg(feature = "cli")]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PhaseStats {
    pub phase: String,
    pub elapsed: Duration,
    pub cpu_usage: Option<f32>,
    pub memory_usage_mb: Option<u64>,
    pub peak_memory_mb: Option<u64>,
}

#[cfg(feature = "cli")]
struct ProcessProbe {
    system: Mutex<System>,
    pid: Pid,
    peak_memory: Mutex<u64>,
}

#[cfg(feature = "cli")]
impl ProcessProbe {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::everything()),
        );
        Some(Self {
            system: Mutex::new(system),
            pid,
            peak_memory: Mutex::new(0),
        })
    }

    /// (cpu %, memory MB, peak MB)
    fn sample(&self) -> Option<(f32, u64, u64)> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = system.process(self.pid)?;
        let memory_mb = process.memory() / 1024 / 1024;

        let mut peak = self.peak_memory.lock().unwrap_or_else(PoisonError::into_inner);
        *peak = (*peak).max(memory_mb);
        Some((process.cpu_usage(), memory_mb, *peak))
    }
}

/// 依部署階段（deploy、start、stop）記錄耗時；`cli` feature 下另外記錄行程 CPU 與記憶體
pub struct PhaseMonitor {
    enabled: bool,
    started_at: Instant,
    phase_started_at: Instant,
    history: Vec<PhaseStats>,
    #[cfg(feature = "cli")]
    probe: Option<Arc<ProcessProbe>>,
}

impl PhaseMonitor {
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            started_at: now,
            phase_started_at: now,
            history: Vec::new(),
            #[cfg(feature = "cli")]
            probe: if enabled {
                ProcessProbe::new().map(Arc::new)
            } else {
                None
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn begin(&mut self, phase: &str) {
        self.phase_started_at = Instant::now();
        if self.enabled {
            tracing::debug!("⏱️ Phase `{}` begins", phase);
        }
    }

    /// 結束目前階段並記錄統計；未啟用時不做任何事
    pub fn finish(&mut self, phase: &str) -> Option<PhaseStats> {
        if !self.enabled {
            return None;
        }

        #[cfg(feature = "cli")]
        let sample = self.probe.as_ref().and_then(|probe| probe.sample());
        #[cfg(not(feature = "cli"))]
        let sample: Option<(f32, u64, u64)> = None;

        let stats = PhaseStats {
            phase: phase.to_string(),
            elapsed: self.phase_started_at.elapsed(),
            cpu_usage: sample.map(|(cpu, _, _)| cpu),
            memory_usage_mb: sample.map(|(_, memory, _)| memory),
            peak_memory_mb: sample.map(|(_, _, peak)| peak),
        };

        match (stats.cpu_usage, stats.memory_usage_mb, stats.peak_memory_mb) {
            (Some(cpu), Some(memory), Some(peak)) => tracing::info!(
                "📊 {} - CPU: {:.1}%, Memory: {}MB, Peak: {}MB, Time: {:?}",
                phase,
                cpu,
                memory,
                peak,
                stats.elapsed
            ),
            _ => tracing::info!("📊 {} - Time: {:?}", phase, stats.elapsed),
        }

        self.history.push(stats.clone());
        Some(stats)
    }

    pub fn history(&self) -> &[PhaseStats] {
        &self.history
    }

    pub fn log_final_stats(&self) {
        if !self.enabled {
            return;
        }
        let peak = self.history.iter().filter_map(|s| s.peak_memory_mb).max();
        match peak {
            Some(peak) => tracing::info!(
                "📊 Final Stats - Total Time: {:?}, Peak Memory: {}MB",
                self.started_at.elapsed(),
                peak
            ),
            None => tracing::info!("📊 Final Stats - Total Time: {:?}", self.started_at.elapsed()),
        }
    }
}

impl Default for PhaseMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_monitor_records_nothing() {
        let mut monitor = PhaseMonitor::default();
        monitor.begin("deploy");
        assert!(monitor.finish("deploy").is_none());
        assert!(monitor.history().is_empty());
    }

    #[test]
    fn test_enabled_monitor_keeps_history() {
        let mut monitor = PhaseMonitor::new(true);
        monitor.begin("deploy");
        let stats = monitor.finish("deploy").unwrap();
        assert_eq!(stats.phase, "deploy");

        monitor.begin("start");
        monitor.finish("start");
        let phases: Vec<_> = monitor.history().iter().map(|s| s.phase.as_str()).collect();
        assert_eq!(phases, vec!["deploy", "start"]);
    }
}
