use sysinfo::System;

/// Reported when the host load cannot be sampled
pub const DEFAULT_LOAD: f64 = 0.5;

/// Source of a normalized host load signal in [0, 1]
pub trait LoadSampler: Send + Sync {
    fn system_load(&self) -> f64;
}

/// One-minute load average divided by the number of available cores
pub struct SystemLoadSampler {
    cores: usize,
}

impl SystemLoadSampler {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        SystemLoadSampler { cores }
    }
}

impl Default for SystemLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SystemLoadSampler {
    fn system_load(&self) -> f64 {
        normalize_load(System::load_average().one, self.cores)
    }
}

fn normalize_load(one_minute: f64, cores: usize) -> f64 {
    if !one_minute.is_finite() || one_minute < 0.0 || cores == 0 {
        return DEFAULT_LOAD;
    }
    (one_minute / cores as f64).clamp(0.0, 1.0)
}

/// Constant load, for hosts without a load average and for tests
pub struct FixedLoad(pub f64);

impl LoadSampler for FixedLoad {
    fn system_load(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_load() {
        assert_eq!(normalize_load(2.0, 4), 0.5);
        assert_eq!(normalize_load(12.0, 4), 1.0);
        assert_eq!(normalize_load(0.0, 8), 0.0);
    }

    #[test]
    fn test_unusable_samples_fall_back() {
        assert_eq!(normalize_load(f64::NAN, 4), DEFAULT_LOAD);
        assert_eq!(normalize_load(-1.0, 4), DEFAULT_LOAD);
        assert_eq!(normalize_load(1.0, 0), DEFAULT_LOAD);
    }

    #[test]
    fn test_system_sampler_in_range() {
        let load = SystemLoadSampler::new().system_load();
        assert!((0.0..=1.0).contains(&load));
    }

    #[test]
    fn test_fixed_load_is_clamped() {
        assert_eq!(FixedLoad(3.0).system_load(), 1.0);
        assert_eq!(FixedLoad(0.25).system_load(), 0.25);
    }
}
