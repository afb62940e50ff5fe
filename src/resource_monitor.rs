//! Host resource pressure classification
//!
//! Samples CPU and memory utilisation and classifies the host as
//! NORMAL / WARNING / CRITICAL. The verdict is cached for a short
//! window so the monitor can be consulted before every discretionary
//! action without re-sampling each time.

use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Host resource pressure verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Plenty of headroom; all discretionary work allowed
    Normal,
    /// Under pressure; keepalive is paused, tasks still run
    Warning,
    /// Overloaded; only emergency eviction may touch the pool
    Critical,
}

/// Threshold set for one dimension (percent utilisation)
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning: f32,
    pub critical: f32,
}

struct MonitorState {
    sys: System,
    cached: ResourceState,
    sampled_at: Option<Instant>,
    read_failure_logged: bool,
}

/// Resource monitor with a cached verdict
pub struct ResourceMonitor {
    cpu: Thresholds,
    mem: Thresholds,
    sample_window: Duration,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(cpu: Thresholds, mem: Thresholds, sample_window: Duration) -> Self {
        Self {
            cpu,
            mem,
            sample_window,
            state: Mutex::new(MonitorState {
                sys: System::new(),
                cached: ResourceState::Normal,
                sampled_at: None,
                read_failure_logged: false,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &crate::config::CollectorConfig) -> Self {
        let (cpu_warn, cpu_crit) = config.cpu_thresholds();
        let (mem_warn, mem_crit) = config.mem_thresholds();
        Self::new(
            Thresholds {
                warning: cpu_warn,
                critical: cpu_crit,
            },
            Thresholds {
                warning: mem_warn,
                critical: mem_crit,
            },
            config.resource_sample_window(),
        )
    }

    /// Classify current host pressure.
    ///
    /// Returns the cached verdict when the last sample is younger than
    /// the sample window; otherwise takes a fresh two-point CPU sample
    /// and a memory reading. The worst of the two dimensions wins.
    pub async fn classify(&self) -> ResourceState {
        let mut state = self.state.lock().await;

        if let Some(at) = state.sampled_at {
            if at.elapsed() < self.sample_window {
                return state.cached;
            }
        }

        // Two-point delta: sysinfo derives utilisation from the counter
        // difference between consecutive refreshes.
        state.sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        state.sys.refresh_cpu_usage();
        let cpu_pct = state.sys.global_cpu_usage();

        state.sys.refresh_memory();
        let total = state.sys.total_memory();
        let mem_pct = if total == 0 {
            if !state.read_failure_logged {
                warn!("memory counters unreadable, degrading memory dimension to 0%");
                state.read_failure_logged = true;
            }
            0.0
        } else {
            let available = state.sys.available_memory();
            100.0 * (1.0 - available as f32 / total as f32)
        };

        let verdict = classify_utilisation(cpu_pct, mem_pct, self.cpu, self.mem);
        debug!(
            cpu_pct = cpu_pct,
            mem_pct = mem_pct,
            ?verdict,
            "resource sample"
        );

        state.cached = verdict;
        state.sampled_at = Some(Instant::now());
        verdict
    }

    /// Keepalive is discretionary: only run with full headroom
    pub async fn safe_for_keepalive(&self) -> bool {
        self.classify().await == ResourceState::Normal
    }

    /// Tasks tolerate warnings but never critical pressure
    pub async fn safe_for_task(&self) -> bool {
        self.classify().await != ResourceState::Critical
    }
}

/// Pure classification: worst dimension wins
#[must_use]
pub fn classify_utilisation(
    cpu_pct: f32,
    mem_pct: f32,
    cpu: Thresholds,
    mem: Thresholds,
) -> ResourceState {
    let cpu_state = classify_dimension(cpu_pct, cpu);
    let mem_state = classify_dimension(mem_pct, mem);
    worst(cpu_state, mem_state)
}

fn classify_dimension(pct: f32, thresholds: Thresholds) -> ResourceState {
    if pct >= thresholds.critical {
        ResourceState::Critical
    } else if pct >= thresholds.warning {
        ResourceState::Warning
    } else {
        ResourceState::Normal
    }
}

fn worst(a: ResourceState, b: ResourceState) -> ResourceState {
    use ResourceState::*;
    match (a, b) {
        (Critical, _) | (_, Critical) => Critical,
        (Warning, _) | (_, Warning) => Warning,
        _ => Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU: Thresholds = Thresholds {
        warning: 50.0,
        critical: 70.0,
    };
    const MEM: Thresholds = Thresholds {
        warning: 60.0,
        critical: 80.0,
    };

    #[test]
    fn normal_when_both_dimensions_low() {
        assert_eq!(
            classify_utilisation(10.0, 20.0, CPU, MEM),
            ResourceState::Normal
        );
    }

    #[test]
    fn worst_dimension_wins() {
        assert_eq!(
            classify_utilisation(55.0, 20.0, CPU, MEM),
            ResourceState::Warning
        );
        assert_eq!(
            classify_utilisation(10.0, 85.0, CPU, MEM),
            ResourceState::Critical
        );
        assert_eq!(
            classify_utilisation(75.0, 65.0, CPU, MEM),
            ResourceState::Critical
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(
            classify_utilisation(50.0, 0.0, CPU, MEM),
            ResourceState::Warning
        );
        assert_eq!(
            classify_utilisation(70.0, 0.0, CPU, MEM),
            ResourceState::Critical
        );
    }

    #[tokio::test]
    async fn verdict_is_cached_within_window() {
        let monitor = ResourceMonitor::new(CPU, MEM, Duration::from_secs(3600));
        let first = monitor.classify().await;
        // Second call must be served from cache (no second sample delay)
        let started = Instant::now();
        let second = monitor.classify().await;
        assert_eq!(first, second);
        assert!(started.elapsed() < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    }
}
