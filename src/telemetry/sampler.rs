//! Host CPU and memory utilization.

use std::sync::{Mutex, PoisonError};

use sysinfo::{CpuRefreshKind, RefreshKind, System};

/// Source of point-in-time host readings.
pub trait Sampler: Send + Sync {
    /// CPU load as integer percentage points.
    fn cpu_percent(&self) -> i64;

    /// Physical memory in use, percentage with two decimals.
    fn memory_percent(&self) -> f64;
}

/// [`Sampler`] reading the current machine through `sysinfo`.
pub struct HostSampler {
    cores: usize,
    system: Mutex<System>,
}

impl HostSampler {
    /// Create a new [`HostSampler`].
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()),
        );

        Self {
            cores: system.cpus().len(),
            system: Mutex::new(system),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for HostSampler {
    fn cpu_percent(&self) -> i64 {
        cpu_percent(System::load_average().one, self.cores)
    }

    fn memory_percent(&self) -> f64 {
        let mut system =
            self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();

        memory_reading(&system)
    }
}

/// Page cache and buffers are reclaimable, so they count as free.
fn memory_reading(system: &System) -> f64 {
    memory_percent(system.total_memory(), system.available_memory())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `load / cores` is rounded to two decimals *before* scaling, so anything
/// below a whole percentage point is lost. Dashboards rely on this scale.
pub fn cpu_percent(load_one: f64, cores: usize) -> i64 {
    if cores == 0 || !load_one.is_finite() {
        return 0;
    }

    let ratio = round2(load_one / cores as f64);
    (ratio * 100.0).round() as i64
}

/// `used = total - free`, as a percentage of `total`.
///
/// `free` is memory the kernel can hand out right now (available, not
/// strictly unused).
pub fn memory_percent(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let used = total.saturating_sub(free);
    round2(used as f64 / total as f64 * 100.0)
}

#[cfg(test)]
pub(crate) struct FixedSampler {
    pub cpu: i64,
    pub memory: f64,
}

#[cfg(test)]
impl Sampler for FixedSampler {
    fn cpu_percent(&self) -> i64 {
        self.cpu
    }

    fn memory_percent(&self) -> f64 {
        self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_percent() {
        assert_eq!(cpu_percent(2.0, 4), 50);
        assert_eq!(cpu_percent(0.0, 8), 0);
        // 1.37 / 4 = 0.3425 -> 0.34 -> 34.
        assert_eq!(cpu_percent(1.37, 4), 34);
        // overloaded host.
        assert_eq!(cpu_percent(6.0, 2), 300);
    }

    #[test]
    fn test_cpu_percent_without_cores() {
        assert_eq!(cpu_percent(1.5, 0), 0);
        assert_eq!(cpu_percent(f64::NAN, 4), 0);
    }

    #[test]
    fn test_memory_percent() {
        assert_eq!(memory_percent(1000, 250), 75.0);
        assert_eq!(memory_percent(3, 2), 33.33);
        assert_eq!(memory_percent(1000, 1000), 0.0);
        assert_eq!(memory_percent(1000, 0), 100.0);
        assert_eq!(memory_percent(0, 0), 0.0);
    }

    #[test]
    fn test_memory_percent_bounds() {
        for (total, free) in
            [(1, 0), (1, 1), (7, 3), (u64::MAX, 1), (16 << 30, 5 << 30)]
        {
            let percent = memory_percent(total, free);
            assert!((0.0..=100.0).contains(&percent), "{percent}");
        }
    }

    #[test]
    fn test_memory_counts_reclaimable_as_free() {
        let mut system = System::new();
        system.refresh_memory();

        assert_eq!(
            memory_reading(&system),
            memory_percent(system.total_memory(), system.available_memory())
        );

        // MemTotal 32 GiB, MemFree 3.4 GiB, MemAvailable 28.5 GiB (kB).
        let total = 32 * 1024 * 1024;
        assert_eq!(memory_percent(total, 29_875_272), 10.96);
        assert_ne!(memory_percent(total, 3_565_158), 10.96);
    }

    #[test]
    fn test_host_sampler() {
        let sampler = HostSampler::new();
        assert!(sampler.cpu_percent() >= 0);
        assert!((0.0..=100.0).contains(&sampler.memory_percent()));
    }
}
