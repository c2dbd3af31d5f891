//! Reduction tunables
//!
//! Defaults come from the device class, `ROCMSTAT_*` variables override
//! them, and the result is clamped to what the device can launch.

use crate::backend::{DeviceClass, DeviceLimits};
use crate::error::{StatError, StatResult};
use crate::reduction::kernels::MAX_RECORD_WIDTH;

/// Launch-geometry tunables of the reduction pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionTuning {
    /// Workers per group in the chunked pass (`G`)
    pub group_size: usize,
    /// Upper bound on groups in the chunked pass, and the width of the
    /// single tree-reduce group (`M`)
    pub num_groups: usize,
    /// Tile width for tiled kernels; carried and clamped, unused by the reduction
    pub tile_size: usize,
    /// Size threshold for kernel selection; carried, unused by the reduction
    pub threshold: usize,
}

impl Default for ReductionTuning {
    fn default() -> Self {
        Self::for_class(DeviceClass::Gpu)
    }
}

impl ReductionTuning {
    /// Defaults for a device class
    pub fn for_class(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Gpu => ReductionTuning {
                group_size: 256,
                num_groups: 128,
                tile_size: 16,
                threshold: 32768,
            },
            DeviceClass::Cpu => ReductionTuning {
                group_size: 64,
                num_groups: 32,
                tile_size: 4,
                threshold: 4096,
            },
        }
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    pub fn with_num_groups(mut self, num_groups: usize) -> Self {
        self.num_groups = num_groups;
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Class defaults with `ROCMSTAT_GROUP_SIZE`, `ROCMSTAT_NUM_GROUPS`,
    /// `ROCMSTAT_TILE_SIZE` and `ROCMSTAT_THRESHOLD` applied
    pub fn from_env(class: DeviceClass) -> StatResult<Self> {
        let mut tuning = Self::for_class(class);
        if let Some(value) = env_usize("ROCMSTAT_GROUP_SIZE")? {
            tuning.group_size = value;
        }
        if let Some(value) = env_usize("ROCMSTAT_NUM_GROUPS")? {
            tuning.num_groups = value;
        }
        if let Some(value) = env_usize("ROCMSTAT_TILE_SIZE")? {
            tuning.tile_size = value;
        }
        if let Some(value) = env_usize("ROCMSTAT_THRESHOLD")? {
            tuning.threshold = value;
        }
        tuning.validate()?;
        Ok(tuning)
    }

    /// Reject zero-sized geometry
    pub fn validate(&self) -> StatResult<()> {
        for (name, value) in [
            ("group_size", self.group_size),
            ("num_groups", self.num_groups),
            ("tile_size", self.tile_size),
        ] {
            if value == 0 {
                return Err(StatError::InvalidConfiguration(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Fit the tunables to `limits`.
    ///
    /// Both reduction groups keep one record per worker in local scratch, so
    /// a group may not be wider than the device's group width nor than the
    /// number of widest records that fit in shared memory.
    pub fn clamped(&self, limits: &DeviceLimits) -> Self {
        let record_bytes = MAX_RECORD_WIDTH * std::mem::size_of::<f64>();
        let by_scratch = (limits.shared_mem_per_block as usize / record_bytes).max(1);
        let widest = (limits.max_group_width() as usize).min(by_scratch).max(1);

        let group_size = self.group_size.clamp(1, widest);
        let clamped = ReductionTuning {
            group_size,
            num_groups: self.num_groups.clamp(1, widest),
            tile_size: self.tile_size.clamp(1, group_size),
            threshold: self.threshold,
        };

        if clamped != *self {
            tracing::debug!(
                "ReductionTuning clamped to device limits: {:?} -> {:?}",
                self,
                clamped
            );
        }
        clamped
    }
}

fn env_usize(name: &str) -> StatResult<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<usize>().map(Some).map_err(|e| {
            StatError::InvalidConfiguration(format!("{}='{}': {}", name, raw, e))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::sim_limits;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "ROCMSTAT_GROUP_SIZE",
        "ROCMSTAT_NUM_GROUPS",
        "ROCMSTAT_TILE_SIZE",
        "ROCMSTAT_THRESHOLD",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_class_defaults() {
        let gpu = ReductionTuning::for_class(DeviceClass::Gpu);
        assert_eq!((gpu.group_size, gpu.num_groups, gpu.tile_size, gpu.threshold), (256, 128, 16, 32768));
        let cpu = ReductionTuning::for_class(DeviceClass::Cpu);
        assert_eq!((cpu.group_size, cpu.num_groups, cpu.tile_size, cpu.threshold), (64, 32, 4, 4096));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("ROCMSTAT_GROUP_SIZE", "32");
        std::env::set_var("ROCMSTAT_THRESHOLD", " 100 ");
        let tuning = ReductionTuning::from_env(DeviceClass::Cpu).unwrap();
        clear_env();

        assert_eq!(tuning.group_size, 32);
        assert_eq!(tuning.num_groups, 32);
        assert_eq!(tuning.threshold, 100);
    }

    #[test]
    #[serial]
    fn test_env_rejects_garbage_and_zero() {
        clear_env();
        std::env::set_var("ROCMSTAT_NUM_GROUPS", "lots");
        let err = ReductionTuning::from_env(DeviceClass::Gpu).unwrap_err();
        assert!(err.to_string().contains("ROCMSTAT_NUM_GROUPS"));

        std::env::set_var("ROCMSTAT_NUM_GROUPS", "0");
        let err = ReductionTuning::from_env(DeviceClass::Gpu).unwrap_err();
        assert!(err.is_user_error());
        clear_env();
    }

    #[test]
    fn test_clamp_to_group_width() {
        let tuning = ReductionTuning::default().with_group_size(4096).with_num_groups(2048);
        let clamped = tuning.clamped(&DeviceLimits::default());
        assert_eq!(clamped.group_size, 1024);
        assert_eq!(clamped.num_groups, 1024);
    }

    #[test]
    fn test_clamp_to_shared_memory() {
        let limits = DeviceLimits {
            shared_mem_per_block: 40 * 100,
            ..DeviceLimits::default()
        };
        let clamped = ReductionTuning::default().clamped(&limits);
        assert_eq!(clamped.group_size, 100);
        assert_eq!(clamped.num_groups, 100);
    }

    #[test]
    fn test_tile_never_exceeds_group() {
        let tuning = ReductionTuning::for_class(DeviceClass::Cpu)
            .with_group_size(2)
            .with_tile_size(8);
        let clamped = tuning.clamped(&sim_limits());
        assert_eq!(clamped.tile_size, 2);
    }

    #[test]
    fn test_defaults_fit_sim_device() {
        let cpu = ReductionTuning::for_class(DeviceClass::Cpu);
        assert_eq!(cpu.clamped(&sim_limits()), cpu);
    }
}
