//! Polled observers.
//!
//! Each observer turns a handful of pseudo-file reads into a `MetricSet`
//! when the orchestrator asks for it:
//! - `meminfo`: total/available memory, kernel-style availability estimate, swap usage
//! - `swap`: low-pass filtered major fault rate and swap tendency
//! - `psi`: pressure stall averages

pub mod meminfo;
pub mod psi;
pub mod swap;

use ahash::AHashMap as HashMap;

use crate::reader::ReadError;
use crate::tracker::MetricValue;

pub use meminfo::MeminfoObserver;
pub use psi::{parse_psi_value, PsiObserver};
pub use swap::{FaultFilter, SwapObserver};

/// Metric key to value, produced by one observer invocation.
pub type MetricSet = HashMap<String, MetricValue>;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("Required field '{field}' missing from {path}")]
    MissingField { path: &'static str, field: &'static str },

    #[error("Invalid system constant: {0}")]
    InvalidConstant(&'static str),
}

/// The polled execution discipline: invoked synchronously by the orchestrator.
pub enum PolledObserver {
    Meminfo(MeminfoObserver),
    Swap(SwapObserver),
    Psi(PsiObserver),
}

impl PolledObserver {
    pub fn name(&self) -> &'static str {
        match self {
            PolledObserver::Meminfo(_) => "meminfo",
            PolledObserver::Swap(_) => "swap",
            PolledObserver::Psi(_) => "psi",
        }
    }

    /// Whether a failure of this observer means the platform is unsupported.
    pub fn is_required(&self) -> bool {
        match self {
            PolledObserver::Meminfo(_) | PolledObserver::Swap(_) => true,
            PolledObserver::Psi(_) => false,
        }
    }

    /// Runs one observation cycle.
    pub fn observe(&mut self) -> Result<MetricSet, ObserverError> {
        match self {
            PolledObserver::Meminfo(o) => o.observe(),
            PolledObserver::Swap(o) => o.observe(),
            PolledObserver::Psi(o) => o.observe(),
        }
    }
}
