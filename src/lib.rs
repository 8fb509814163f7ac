//! mempressure library
//!
//! Observes Linux memory-pressure signals and optionally generates memory
//! pressure, aggregating everything into one fixed-schema time series.
//!
//! # Components
//!
//! - **Tracker**: thread-safe latest-value store with a frozen print schema
//! - **Polled observers**: meminfo, swap fault rate / tendency, PSI averages
//! - **Pressure monitors**: cgroup v1 eventfd notifications, PSI triggers
//! - **Allocator**: page-touching stress allocator
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mempressure::{FileReader, MeminfoObserver, ObserverOptions, Tracker};
//!
//! let tracker = Arc::new(Tracker::new());
//! let reader = Arc::new(FileReader::new());
//! let mut meminfo = MeminfoObserver::new(reader, 4096, &ObserverOptions::default());
//!
//! let metrics = meminfo.observe().expect("meminfo readable");
//! tracker.merge_set(metrics);
//!
//! let snapshot = tracker.snapshot();
//! println!("{}", snapshot.header());
//! println!("{}", snapshot.row());
//! ```

pub mod allocator;
pub mod monitors;
pub mod observers;
pub mod options;
pub mod os;
pub mod reader;
pub mod tracker;

// Re-export main types for convenience
pub use allocator::{AllocationError, Allocator};
pub use monitors::{
    wake_channel, CgroupsMonitor, CgroupsPaths, MonitorError, PressureMonitor, PressureReporter,
    PsiTriggerMonitor, TriggerSpec, WakeSender,
};
pub use observers::{
    MeminfoObserver, MetricSet, ObserverError, PolledObserver, PsiObserver, SwapObserver,
};
pub use options::{AllocatorOptions, ObserverOptions, PsiTriggerOptions};
pub use reader::{FileReader, ReadError, Reader};
pub use tracker::{MetricValue, Snapshot, Tracker};
