//! Typed settings consumed by observers, monitors and the allocator.
//!
//! The binary builds these from CLI flags, the config file and the
//! `--options` string; the library never parses flags itself.

use std::time::Duration;

pub const DEFAULT_HALF_LIFE_SECONDS: f64 = 30.0;
pub const DEFAULT_PSI_AVG_METRIC: &str = "avg10";
pub const DEFAULT_PSI_MEDIUM_TRIGGER: &str = "some 150000 1000000";
pub const DEFAULT_PSI_CRITICAL_TRIGGER: &str = "full 100000 1000000";
pub const DEFAULT_PSI_TRIGGER_TIMEOUT_SECONDS: u64 = 5;

/// Per-observer toggles and tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    /// Report `SReclaimable` as `mem_reclaim`.
    pub show_reclaimable: bool,
    /// Report `Inactive(file)` as `mem_inactive`.
    pub show_inactive: bool,
    /// Skip the first fault-rate delta instead of averaging against zero.
    pub average_only_current: bool,
    /// Half-life of the fault-rate low-pass filter.
    pub low_pass_half_life_seconds: f64,
    /// PSI averaging token, e.g. `avg10`, `avg60`, `avg300`.
    pub psi_avg_metric: String,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            show_reclaimable: false,
            show_inactive: false,
            average_only_current: false,
            low_pass_half_life_seconds: DEFAULT_HALF_LIFE_SECONDS,
            psi_avg_metric: DEFAULT_PSI_AVG_METRIC.to_string(),
        }
    }
}

/// PSI trigger monitor settings; trigger strings are validated when armed.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiTriggerOptions {
    pub medium_trigger: String,
    pub critical_trigger: String,
    pub timeout: Duration,
}

impl Default for PsiTriggerOptions {
    fn default() -> Self {
        Self {
            medium_trigger: DEFAULT_PSI_MEDIUM_TRIGGER.to_string(),
            critical_trigger: DEFAULT_PSI_CRITICAL_TRIGGER.to_string(),
            timeout: Duration::from_secs(DEFAULT_PSI_TRIGGER_TIMEOUT_SECONDS),
        }
    }
}

/// Stress allocator settings. Sizes are in megabytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorOptions {
    pub initial_size_mb: u64,
    /// 0 disables the periodic allocation.
    pub block_size_mb: u64,
    pub period: Duration,
    /// 0 means unbounded.
    pub limit_mb: u64,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            initial_size_mb: 0,
            block_size_mb: 128,
            period: Duration::from_secs(1),
            limit_mb: 0,
        }
    }
}
