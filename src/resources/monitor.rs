//! Host memory and disk introspection for worker sizing.
//!
//! Every probe degrades to "unknown" instead of failing: an unknown memory
//! reading drops the memory bound, an unknown disk reading counts as enough
//! space.

use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Estimated resident memory of one worker's scan session.
pub const MB_PER_WORKER: u64 = 400;

/// Worker count beyond which extra workers stop paying off.
pub const MAX_PRACTICAL_WORKERS: usize = 8;

/// Default host memory use that triggers a reduce recommendation.
pub const DEFAULT_MEMORY_LIMIT_PERCENT: f64 = 80.0;

/// Factor applied to the worker count under memory pressure.
const REDUCTION_FACTOR: f64 = 0.75;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// A host memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub total_mb: u64,
    pub available_mb: u64,
}

impl MemoryInfo {
    /// Percentage of host memory in use.
    pub fn used_percent(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        let used = self.total_mb.saturating_sub(self.available_mb);
        used as f64 / self.total_mb as f64 * 100.0
    }
}

/// A constraint that set the recommended worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingLimit {
    /// The operator's requested count.
    Requested,
    /// Available memory divided by the per-worker estimate.
    Memory,
    /// The fixed practical ceiling.
    PracticalCeiling,
    /// Fewer jobs than workers.
    Workload,
}

impl fmt::Display for SizingLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SizingLimit::Requested => "requested",
            SizingLimit::Memory => "memory",
            SizingLimit::PracticalCeiling => "practical ceiling",
            SizingLimit::Workload => "workload",
        };
        f.write_str(label)
    }
}

/// A worker count and the constraints that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSizing {
    pub workers: usize,
    /// Every constraint equal to the result. Empty only when the floor of one applied.
    pub limited_by: Vec<SizingLimit>,
}

/// Disk space at a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiskSpace {
    pub has_space: bool,
    pub available_gb: f64,
    pub total_gb: f64,
}

#[derive(Debug, Clone, Copy)]
enum MemorySource {
    Host,
    Fixed(Option<MemoryInfo>),
}

/// Reads host resources and turns them into sizing decisions.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    memory_limit_percent: f64,
    source: MemorySource,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT_PERCENT)
    }
}

impl ResourceMonitor {
    /// Creates a monitor reading the host, flagging pressure above `memory_limit_percent`.
    pub fn new(memory_limit_percent: f64) -> Self {
        Self {
            memory_limit_percent,
            source: MemorySource::Host,
        }
    }

    /// Uses a fixed memory reading instead of the host. `None` simulates a failed probe.
    pub fn with_fixed_memory(mut self, memory: Option<MemoryInfo>) -> Self {
        self.source = MemorySource::Fixed(memory);
        self
    }

    pub fn memory_limit_percent(&self) -> f64 {
        self.memory_limit_percent
    }

    /// Current memory reading, if available.
    pub fn memory(&self) -> Option<MemoryInfo> {
        match self.source {
            MemorySource::Host => read_host_memory(),
            MemorySource::Fixed(memory) => memory,
        }
    }

    /// Recommended worker count: `max(1, min(requested, memory bound, ceiling, workload))`.
    pub fn recommended_workers(&self, requested: usize, workload: usize) -> usize {
        self.recommend(requested, workload).workers
    }

    /// Like [`recommended_workers`](Self::recommended_workers), reporting which limits applied.
    pub fn recommend(&self, requested: usize, workload: usize) -> WorkerSizing {
        let memory_bound = self
            .memory()
            .map(|m| (m.available_mb / MB_PER_WORKER) as usize);

        let candidates = [
            (SizingLimit::Requested, Some(requested)),
            (SizingLimit::Memory, memory_bound),
            (SizingLimit::PracticalCeiling, Some(MAX_PRACTICAL_WORKERS)),
            (SizingLimit::Workload, Some(workload)),
        ];

        let bound = candidates
            .iter()
            .filter_map(|(_, value)| *value)
            .min()
            .unwrap_or(MAX_PRACTICAL_WORKERS);
        let workers = bound.max(1);

        let limited_by = candidates
            .iter()
            .filter(|(_, value)| *value == Some(workers))
            .map(|(limit, _)| *limit)
            .collect();

        WorkerSizing {
            workers,
            limited_by,
        }
    }

    /// Recommends a lower worker count when host memory use exceeds the limit.
    pub fn should_reduce_workers(&self, current: usize) -> Option<usize> {
        let memory = self.memory()?;
        if memory.used_percent() <= self.memory_limit_percent {
            return None;
        }
        Some(((current as f64 * REDUCTION_FACTOR) as usize).max(1))
    }

    /// One-line description of the host used in startup logs.
    pub fn system_info(&self) -> String {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.memory() {
            Some(m) => format!(
                "System: {} CPU cores, {:.1}GB RAM ({:.1}GB available)",
                cores,
                m.total_mb as f64 / 1024.0,
                m.available_mb as f64 / 1024.0
            ),
            None => format!("System: {} CPU cores, memory unknown", cores),
        }
    }
}

/// Checks whether `path` has at least `min_gb` free.
///
/// Returns `has_space = true` with zero sizes when the filesystem cannot be read.
pub fn has_space(path: &Path, min_gb: f64) -> DiskSpace {
    match disk_usage(path) {
        Some((available, total)) => {
            let available_gb = available as f64 / GIB;
            DiskSpace {
                has_space: available_gb >= min_gb,
                available_gb,
                total_gb: total as f64 / GIB,
            }
        }
        None => DiskSpace {
            has_space: true,
            available_gb: 0.0,
            total_gb: 0.0,
        },
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[cfg(unix)]
fn disk_usage(path: &Path) -> Option<(u64, u64)> {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => {
            let fragment = stat.fragment_size() as u64;
            Some((
                stat.blocks_available() as u64 * fragment,
                stat.blocks() as u64 * fragment,
            ))
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "statvfs failed");
            None
        }
    }
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> Option<(u64, u64)> {
    None
}

fn read_host_memory() -> Option<MemoryInfo> {
    let text = std::fs::read_to_string(MEMINFO_PATH).ok()?;
    parse_meminfo(&text)
}

/// Parses `MemTotal` and `MemAvailable` (kB) out of `/proc/meminfo` text.
fn parse_meminfo(text: &str) -> Option<MemoryInfo> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };

    Some(MemoryInfo {
        total_mb: field("MemTotal:")? / 1024,
        available_mb: field("MemAvailable:")? / 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(available_mb: u64, total_mb: u64) -> ResourceMonitor {
        ResourceMonitor::default().with_fixed_memory(Some(MemoryInfo {
            total_mb,
            available_mb,
        }))
    }

    #[test]
    fn test_recommendation_takes_minimum() {
        // 2000MB / 400MB = 5 workers
        let monitor = monitor_with(2000, 16000);
        let sizing = monitor.recommend(10, 100);
        assert_eq!(sizing.workers, 5);
        assert_eq!(sizing.limited_by, vec![SizingLimit::Memory]);

        assert_eq!(monitor.recommended_workers(3, 100), 3);
        assert_eq!(monitor.recommended_workers(10, 2), 2);
    }

    #[test]
    fn test_practical_ceiling() {
        let monitor = monitor_with(64_000, 128_000);
        let sizing = monitor.recommend(32, 1000);
        assert_eq!(sizing.workers, MAX_PRACTICAL_WORKERS);
        assert_eq!(sizing.limited_by, vec![SizingLimit::PracticalCeiling]);
    }

    #[test]
    fn test_never_below_one() {
        let monitor = monitor_with(100, 16000);
        let sizing = monitor.recommend(4, 10);
        assert_eq!(sizing.workers, 1);
        assert!(sizing.limited_by.is_empty());

        assert_eq!(monitor_with(8000, 16000).recommended_workers(0, 0), 1);
    }

    #[test]
    fn test_failed_memory_probe_drops_memory_bound() {
        let monitor = ResourceMonitor::default().with_fixed_memory(None);
        assert_eq!(monitor.recommended_workers(6, 100), 6);
        assert_eq!(monitor.should_reduce_workers(6), None);
        assert!(monitor.system_info().contains("memory unknown"));
    }

    #[test]
    fn test_ties_report_every_limit() {
        let monitor = monitor_with(3200, 16000);
        let sizing = monitor.recommend(8, 8);
        assert_eq!(sizing.workers, 8);
        assert_eq!(
            sizing.limited_by,
            vec![
                SizingLimit::Requested,
                SizingLimit::Memory,
                SizingLimit::PracticalCeiling,
                SizingLimit::Workload
            ]
        );
    }

    #[test]
    fn test_should_reduce_under_pressure() {
        // 90% used
        let monitor = monitor_with(1000, 10_000);
        assert_eq!(monitor.should_reduce_workers(8), Some(6));
        assert_eq!(monitor.should_reduce_workers(1), Some(1));

        // 50% used
        assert_eq!(monitor_with(5000, 10_000).should_reduce_workers(8), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:       16318128 kB\nMemFree:         1234567 kB\nMemAvailable:    8159064 kB\n";
        let info = parse_meminfo(text).unwrap();
        assert_eq!(info.total_mb, 15935);
        assert_eq!(info.available_mb, 7967);
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
    }

    #[test]
    fn test_has_space() {
        let dir = tempfile::tempdir().unwrap();
        let roomy = has_space(dir.path(), 0.0);
        assert!(roomy.has_space);

        let missing = has_space(Path::new("/definitely/not/a/real/path"), 1.0);
        assert!(missing.has_space);
        assert_eq!(missing.available_gb, 0.0);
    }
}
