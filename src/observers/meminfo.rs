//! Memory usage observer backed by `/proc/meminfo` and `/proc/zoneinfo`.
//!
//! Besides the kernel's own `MemAvailable`, this observer re-derives the
//! availability estimate the way `si_mem_available()` does it, using the sum
//! of the per-zone low watermarks as the reserve.

use std::sync::Arc;
use tracing::{debug, info};

use super::{MetricSet, ObserverError};
use crate::options::ObserverOptions;
use crate::reader::Reader;
use crate::tracker::MetricValue;

pub const MEMINFO_PATH: &str = "/proc/meminfo";
pub const ZONEINFO_PATH: &str = "/proc/zoneinfo";

pub const TOTAL_KEY: &str = "mem_total";
pub const AVAILABLE_KEY: &str = "mem_avail";
pub const AVAILABLE_ESTIMATED_KEY: &str = "mem_avail_est";
pub const PERCENT_KEY: &str = "mem_pcnt";
pub const SWAP_PERCENT_KEY: &str = "swp_pcnt";
pub const SWAP_FREE_KEY: &str = "swp_free";
pub const SWAP_TOTAL_KEY: &str = "swp_total";
pub const RECLAIMABLE_KEY: &str = "mem_reclaim";
pub const INACTIVE_FILE_KEY: &str = "mem_inactive";

const KB_IN_MB: f64 = 1024.0;

/// Raw `/proc/meminfo` fields the estimate needs, in KB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeminfoSample {
    pub mem_free_kb: f64,
    pub active_file_kb: f64,
    pub inactive_file_kb: f64,
    pub slab_reclaimable_kb: f64,
}

/// Kernel-style available memory estimate in KB.
///
/// `low_watermark_pages` is the sum of the "low" watermark across all zones.
pub fn estimate_available_kb(sample: &MeminfoSample, low_watermark_pages: u64, page_size: usize) -> f64 {
    let low_watermark_kb = low_watermark_pages as f64 * page_size as f64 / 1024.0;

    let mut available = sample.mem_free_kb - low_watermark_kb;

    let mut page_cache = sample.active_file_kb + sample.inactive_file_kb;
    page_cache -= (page_cache / 2.0).min(low_watermark_kb);
    available += page_cache;

    let mut reclaimable = sample.slab_reclaimable_kb;
    reclaimable -= (reclaimable / 2.0).min(low_watermark_kb);
    available += reclaimable;

    available
}

pub struct MeminfoObserver {
    reader: Arc<dyn Reader>,
    page_size: usize,
    show_reclaimable: bool,
    show_inactive: bool,
}

impl MeminfoObserver {
    pub fn new(reader: Arc<dyn Reader>, page_size: usize, options: &ObserverOptions) -> Self {
        info!("System page size is {} bytes", page_size);
        Self {
            reader,
            page_size,
            show_reclaimable: options.show_reclaimable,
            show_inactive: options.show_inactive,
        }
    }

    /// Sum of the "low" watermark page counts across all memory zones.
    pub fn low_watermark_pages(&self) -> Result<u64, ObserverError> {
        let values = self.reader.read_all_ints(ZONEINFO_PATH, "low")?;
        Ok(values.iter().map(|&v| v.max(0) as u64).sum())
    }

    pub fn observe(&mut self) -> Result<MetricSet, ObserverError> {
        let data = self.reader.read_float_map(MEMINFO_PATH)?;
        let field = |name: &'static str| {
            data.get(name).copied().ok_or(ObserverError::MissingField {
                path: MEMINFO_PATH,
                field: name,
            })
        };

        let sample = MeminfoSample {
            mem_free_kb: field("MemFree")?,
            active_file_kb: field("Active(file)")?,
            inactive_file_kb: field("Inactive(file)")?,
            slab_reclaimable_kb: field("SReclaimable")?,
        };
        let mem_total_kb = field("MemTotal")?;
        if mem_total_kb <= 0.0 {
            return Err(ObserverError::MissingField {
                path: MEMINFO_PATH,
                field: "MemTotal",
            });
        }

        let low_pages = self.low_watermark_pages()?;
        let estimated_kb = estimate_available_kb(&sample, low_pages, self.page_size);

        let mut result = MetricSet::new();
        let mut put = |key: &str, value: f64| {
            result.insert(key.to_string(), MetricValue::Float(value));
        };

        let available_kb = match data.get("MemAvailable") {
            Some(&native_kb) => {
                put(AVAILABLE_ESTIMATED_KEY, estimated_kb / KB_IN_MB);
                put(AVAILABLE_KEY, native_kb / KB_IN_MB);
                native_kb
            }
            None => {
                // Kernels before 3.14 have no MemAvailable
                debug!("MemAvailable missing, using the estimate");
                put(AVAILABLE_KEY, estimated_kb / KB_IN_MB);
                estimated_kb
            }
        };

        if self.show_reclaimable {
            put(RECLAIMABLE_KEY, sample.slab_reclaimable_kb / KB_IN_MB);
        }
        if self.show_inactive {
            put(INACTIVE_FILE_KEY, sample.inactive_file_kb / KB_IN_MB);
        }

        put(TOTAL_KEY, mem_total_kb / KB_IN_MB);
        put(PERCENT_KEY, (mem_total_kb - available_kb) * 100.0 / mem_total_kb);

        let swap_total_kb = data.get("SwapTotal").copied().unwrap_or(0.0);
        if swap_total_kb > 0.0 {
            let swap_free_kb = data.get("SwapFree").copied().unwrap_or(0.0);
            put(SWAP_TOTAL_KEY, swap_total_kb / KB_IN_MB);
            put(SWAP_FREE_KEY, swap_free_kb / KB_IN_MB);
            put(
                SWAP_PERCENT_KEY,
                (swap_total_kb - swap_free_kb) * 100.0 / swap_total_kb,
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_matches_kernel_walkthrough() {
        // wmark_low = (11 + 2656 + 67067 + 0 + 0) * 4096 / 1024 = 278936
        // available = 13506444 - 278936 = 13227508
        // pagecache = 6418124 + 5018440 - min(5718282, 278936) = 11157628
        // reclaimable = 2069212 - min(1034606, 278936) = 1790276
        // total = 13227508 + 11157628 + 1790276 = 26175412
        let sample = MeminfoSample {
            mem_free_kb: 13506444.0,
            active_file_kb: 6418124.0,
            inactive_file_kb: 5018440.0,
            slab_reclaimable_kb: 2069212.0,
        };
        let estimate = estimate_available_kb(&sample, 11 + 2656 + 67067, 4096);
        assert_eq!(estimate as i64, 26175412);
    }

    #[test]
    fn test_estimate_caps_reserve_at_half() {
        // Watermark larger than half of the page cache: only half is subtracted
        let sample = MeminfoSample {
            mem_free_kb: 10000.0,
            active_file_kb: 1000.0,
            inactive_file_kb: 1000.0,
            slab_reclaimable_kb: 400.0,
        };
        // 1000 pages * 4096 / 1024 = 4000 KB
        let estimate = estimate_available_kb(&sample, 1000, 4096);
        assert_eq!(estimate, 10000.0 - 4000.0 + 1000.0 + 200.0);
    }
}
