//! Swap activity observer.
//!
//! Two independent signals are produced each cycle:
//! - the major page fault rate per second of user CPU time, smoothed by an
//!   EWMA whose coefficient adapts to the elapsed time (half-life based)
//! - the swap tendency heuristic: `mapped_ratio / 2 + swappiness`
//!
//! The fault rate is required; the tendency is best-effort and silently
//! omitted when its inputs cannot be read.

use std::sync::Arc;
use tracing::{info, warn};

use super::{MetricSet, ObserverError};
use crate::options::ObserverOptions;
use crate::reader::Reader;
use crate::tracker::MetricValue;

pub const VMSTAT_PATH: &str = "/proc/vmstat";
pub const STAT_PATH: &str = "/proc/stat";
pub const MEMINFO_PATH: &str = "/proc/meminfo";
pub const SWAPPINESS_PATH: &str = "/proc/sys/vm/swappiness";

pub const FAULTS_SEC_KEY: &str = "swp_flts_sec";
pub const FAULTS_SEC_FILTERED_KEY: &str = "swp_flts_sec_f";
pub const FAULTS_MULTIPLIER_KEY: &str = "swp_flts_mult";
pub const TENDENCY_KEY: &str = "swp_tend";

/// Persisted state of the fault-rate low-pass filter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultFilter {
    /// Raw rate of the last interval, faults per second.
    pub sampled_rate: f64,
    /// Low-pass filtered rate, faults per second.
    pub filtered_rate: f64,
    pub last_fault_count: i64,
    pub last_cpu_seconds: f64,
    /// Filtered rate relative to the lifetime average rate.
    pub multiplier: f64,
    has_baseline: bool,
}

impl FaultFilter {
    /// Filter state as if a previous sample had already been taken.
    pub fn with_baseline(filtered_rate: f64, sampled_rate: f64, fault_count: i64, cpu_seconds: f64) -> Self {
        Self {
            sampled_rate,
            filtered_rate,
            last_fault_count: fault_count,
            last_cpu_seconds: cpu_seconds,
            multiplier: 0.0,
            has_baseline: true,
        }
    }

    /// Computes the next filter state from cumulative counters.
    ///
    /// A zero or negative time delta carries the previous rates forward.
    /// With `skip_first`, a filter without a baseline treats the first
    /// sample as having no elapsed time.
    pub fn advance(&self, faults: i64, cpu_seconds: f64, half_life_seconds: f64, skip_first: bool) -> Self {
        let mut delta_time = cpu_seconds - self.last_cpu_seconds;
        let delta_faults = (faults - self.last_fault_count) as f64;

        if !self.has_baseline && skip_first {
            delta_time = 0.0;
        }

        let (sampled_rate, filtered_rate) = if delta_time > 0.0 {
            let sampled = delta_faults / delta_time;
            let coef = 1.0 - (-delta_time / half_life_seconds).exp2();
            (sampled, coef * sampled + (1.0 - coef) * self.filtered_rate)
        } else {
            (self.sampled_rate, self.filtered_rate)
        };

        let average_rate = if cpu_seconds > 0.0 {
            faults as f64 / cpu_seconds
        } else {
            0.0
        };
        let multiplier = if average_rate > 0.0 {
            filtered_rate / average_rate
        } else {
            0.0
        };

        Self {
            sampled_rate,
            filtered_rate,
            last_fault_count: faults,
            last_cpu_seconds: cpu_seconds,
            multiplier,
            has_baseline: true,
        }
    }
}

/// Swap tendency: half the mapped-memory percentage plus swappiness.
pub fn swap_tendency(mapped_pages: i64, page_size: usize, mem_total_bytes: i64, swappiness: i64) -> f64 {
    let mapped_ratio = (mapped_pages as f64 * page_size as f64 * 100.0) / mem_total_bytes as f64;
    mapped_ratio / 2.0 + swappiness as f64
}

pub struct SwapObserver {
    reader: Arc<dyn Reader>,
    page_size: usize,
    clock_ticks: u64,
    half_life_seconds: f64,
    average_only_current: bool,
    filter: FaultFilter,
}

impl SwapObserver {
    pub fn new(reader: Arc<dyn Reader>, page_size: usize, clock_ticks: u64, options: &ObserverOptions) -> Self {
        info!("System timer frequency is {} Hz", clock_ticks);
        info!(
            "Using lowPassHalfLife = {} seconds",
            options.low_pass_half_life_seconds
        );
        Self {
            reader,
            page_size,
            clock_ticks,
            half_life_seconds: options.low_pass_half_life_seconds,
            average_only_current: options.average_only_current,
            filter: FaultFilter::default(),
        }
    }

    pub fn filter(&self) -> &FaultFilter {
        &self.filter
    }

    /// Cumulative user CPU time in seconds.
    fn user_time_seconds(&self) -> Result<f64, ObserverError> {
        if self.clock_ticks == 0 {
            return Err(ObserverError::InvalidConstant("clock ticks per second"));
        }
        let ticks = self.reader.read_int(STAT_PATH, "cpu")?;
        Ok(ticks as f64 / self.clock_ticks as f64)
    }

    fn tendency(&self) -> Result<f64, ObserverError> {
        let mapped_pages = self.reader.read_int(VMSTAT_PATH, "nr_mapped")?;
        let mem_total_kb = self.reader.read_int(MEMINFO_PATH, "MemTotal")?;
        let swappiness = self.reader.read_whole_int(SWAPPINESS_PATH)?;
        Ok(swap_tendency(mapped_pages, self.page_size, mem_total_kb * 1024, swappiness))
    }

    pub fn observe(&mut self) -> Result<MetricSet, ObserverError> {
        let faults = self.reader.read_int(VMSTAT_PATH, "pgmajfault")?;
        let cpu_seconds = self.user_time_seconds()?;

        self.filter = self.filter.advance(
            faults,
            cpu_seconds,
            self.half_life_seconds,
            self.average_only_current,
        );

        let mut result = MetricSet::new();
        result.insert(FAULTS_SEC_KEY.to_string(), MetricValue::Float(self.filter.sampled_rate));
        result.insert(
            FAULTS_SEC_FILTERED_KEY.to_string(),
            MetricValue::Float(self.filter.filtered_rate),
        );
        result.insert(
            FAULTS_MULTIPLIER_KEY.to_string(),
            MetricValue::Float(self.filter.multiplier),
        );

        match self.tendency() {
            Ok(tendency) => {
                result.insert(TENDENCY_KEY.to_string(), MetricValue::Float(tendency));
            }
            Err(e) => warn!("Swap tendency unavailable: {}", e),
        }

        Ok(result)
    }
}
