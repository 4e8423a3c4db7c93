//! One-shot container resource readings and percentage derivation

/// A single resource reading for a running container.
///
/// CPU usage is cumulative, so a percentage needs the previous reading too;
/// the Docker daemon returns both in one stats response (`precpu_stats`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSample {
    /// Cumulative container CPU time (nanoseconds)
    pub cpu_total_usage: u64,
    /// Cumulative container CPU time at the previous reading
    pub precpu_total_usage: u64,
    /// Cumulative host CPU time (nanoseconds)
    pub system_cpu_usage: u64,
    /// Cumulative host CPU time at the previous reading
    pub presystem_cpu_usage: u64,
    /// Number of CPUs available to the container
    pub online_cpus: u32,
    /// Current memory usage in bytes
    pub memory_usage: u64,
    /// Memory limit in bytes
    pub memory_limit: u64,
}

impl StatsSample {
    /// CPU usage percentage across all available CPUs.
    ///
    /// `(container delta / system delta) * online CPUs * 100`, clamped to
    /// `[0, online CPUs * 100]`.
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self.cpu_total_usage as f64 - self.precpu_total_usage as f64;
        let system_delta = self.system_cpu_usage as f64 - self.presystem_cpu_usage as f64;
        if cpu_delta <= 0.0 || system_delta <= 0.0 || self.online_cpus == 0 {
            return 0.0;
        }
        let pct = (cpu_delta / system_delta) * self.online_cpus as f64 * 100.0;
        pct.clamp(0.0, self.online_cpus as f64 * 100.0)
    }

    /// Memory usage percentage of the container limit.
    pub fn ram_percent(&self) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        (self.memory_usage as f64 / self.memory_limit as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatsSample {
        StatsSample {
            cpu_total_usage: 2_000_000_000,
            precpu_total_usage: 1_000_000_000,
            system_cpu_usage: 20_000_000_000,
            presystem_cpu_usage: 10_000_000_000,
            online_cpus: 4,
            memory_usage: 512 * 1024 * 1024,
            memory_limit: 2048 * 1024 * 1024,
        }
    }

    #[test]
    fn test_cpu_percent() {
        // 1e9 of 1e10 delta across 4 CPUs = 40%
        assert!((sample().cpu_percent() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_percent_zero_deltas() {
        let mut s = sample();
        s.cpu_total_usage = s.precpu_total_usage;
        assert_eq!(s.cpu_percent(), 0.0);

        let mut s = sample();
        s.system_cpu_usage = s.presystem_cpu_usage;
        assert_eq!(s.cpu_percent(), 0.0);
    }

    #[test]
    fn test_cpu_percent_clamped_to_cpu_count() {
        let s = StatsSample {
            cpu_total_usage: 100_000_000_000,
            precpu_total_usage: 0,
            system_cpu_usage: 1_000_000_000,
            presystem_cpu_usage: 0,
            online_cpus: 2,
            ..Default::default()
        };
        assert_eq!(s.cpu_percent(), 200.0);
    }

    #[test]
    fn test_ram_percent() {
        assert!((sample().ram_percent() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ram_percent_no_limit() {
        let s = StatsSample {
            memory_usage: 1024,
            memory_limit: 0,
            ..Default::default()
        };
        assert_eq!(s.ram_percent(), 0.0);
    }
}
