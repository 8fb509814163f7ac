//! Stress allocator.
//!
//! Generates memory pressure by allocating blocks that are never released.
//! Every page of a new block is written so the kernel has to back it with
//! physical memory instead of leaving it as a lazy mapping.

use rand::Rng;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::options::AllocatorOptions;
use crate::tracker::Tracker;

pub const ALLOCATED_KEY: &str = "alloctd";

const BYTES_IN_MB: u64 = 1024 * 1024;

/// Largest block a single region can hold (`isize::MAX` bytes).
pub const MAX_BLOCK_SIZE_MB: u64 = isize::MAX as u64 / BYTES_IN_MB;

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Block of {size_mb} MB exceeds the maximum of {} MB", MAX_BLOCK_SIZE_MB)]
    TooLarge { size_mb: u64 },

    #[error("Failed to spawn allocator thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Byte length of a `size_mb` block, if a single region can hold it.
fn block_len(size_mb: u64) -> Result<usize, AllocationError> {
    size_mb
        .checked_mul(BYTES_IN_MB)
        .filter(|&bytes| bytes <= isize::MAX as u64)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or(AllocationError::TooLarge { size_mb })
}

pub struct Allocator {
    tracker: Arc<Tracker>,
    page_size: usize,
    regions: Vec<Vec<u8>>,
    total_mb: u64,
}

impl Allocator {
    /// Creates an empty allocator and reports `alloctd = 0`.
    pub fn new(tracker: Arc<Tracker>, page_size: usize) -> Self {
        tracker.merge_one(ALLOCATED_KEY, 0u64);
        Self {
            tracker,
            page_size: page_size.max(1),
            regions: Vec::new(),
            total_mb: 0,
        }
    }

    pub fn total_mb(&self) -> u64 {
        self.total_mb
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Allocates `size_mb` megabytes and touches one byte per page.
    ///
    /// Blocks for as long as the kernel takes to fault the pages in, so it
    /// must not run on an async worker.
    pub fn allocate_block(&mut self, size_mb: u64) -> Result<(), AllocationError> {
        let size = block_len(size_mb)?;

        let mut region = vec![0u8; size];
        let mut rng = rand::thread_rng();
        for offset in (0..size).step_by(self.page_size) {
            region[offset] = rng.gen();
        }

        self.regions.push(region);
        self.total_mb = self.total_mb.saturating_add(size_mb);
        self.tracker.merge_one(ALLOCATED_KEY, self.total_mb);
        Ok(())
    }

    /// Performs the optional up-front allocation.
    pub fn initialize(&mut self, initial_size_mb: u64) -> Result<(), AllocationError> {
        if initial_size_mb == 0 {
            return Ok(());
        }
        info!("Pre-allocating initial block");
        self.allocate_block(initial_size_mb)?;
        info!("Allocated, size is {} MB", initial_size_mb);
        Ok(())
    }

    /// Allocates one block per period until the total reaches `limit_mb`
    /// (0 = unbounded). Periods are measured from the start of each
    /// allocation.
    pub fn grow_loop(&mut self, block_size_mb: u64, period: Duration, limit_mb: u64) {
        while limit_mb == 0 || self.total_mb < limit_mb {
            let next = Instant::now() + period;
            if let Err(e) = self.allocate_block(block_size_mb) {
                error!("{}, stopping allocation process", e);
                return;
            }
            debug!("Allocated {} MB in total", self.total_mb);
            thread::sleep(next.saturating_duration_since(Instant::now()));
        }

        info!(
            "Allocated {} MB, maximum limit is set to {} MB, stopping allocation process",
            self.total_mb, limit_mb
        );
    }

    /// Runs the initial allocation and starts the grow loop on its own
    /// thread. Returns `None` when periodic allocation is disabled
    /// (`block_size_mb == 0`).
    pub fn spawn(mut self, options: &AllocatorOptions) -> Result<Option<JoinHandle<()>>, AllocationError> {
        self.initialize(options.initial_size_mb)?;
        if options.block_size_mb == 0 {
            debug!("Periodic allocation disabled");
            return Ok(None);
        }

        let options = options.clone();
        let handle = thread::Builder::new()
            .name("allocator".to_string())
            .spawn(move || {
                self.grow_loop(options.block_size_mb, options.period, options.limit_mb);
            })
            .map_err(AllocationError::Spawn)?;
        Ok(Some(handle))
    }
}
