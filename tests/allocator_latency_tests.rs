//! Scheduling test for the stress allocator.
//!
//! Growing a large block must not stall timers on a single-worker runtime,
//! the layout the orchestrator gets on a one-CPU host. Kept apart from the
//! resident-set test so the two do not disturb each other's measurements.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mempressure::os::PAGE_SIZE;
use mempressure::{Allocator, AllocatorOptions, Tracker};

#[test]
fn test_timer_keeps_ticking_while_allocating() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("runtime");

    let max_gap = runtime.block_on(async {
        let tracker = Arc::new(Tracker::new());
        let allocator = Allocator::new(Arc::clone(&tracker), *PAGE_SIZE);
        let options = AllocatorOptions {
            initial_size_mb: 0,
            block_size_mb: 384,
            period: Duration::from_millis(10),
            limit_mb: 384,
        };
        let handle = allocator
            .spawn(&options)
            .expect("spawn")
            .expect("grow loop started");

        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        ticker.tick().await;
        let mut last = Instant::now();
        let mut max_gap = Duration::ZERO;
        while !handle.is_finished() {
            ticker.tick().await;
            let now = Instant::now();
            max_gap = max_gap.max(now - last);
            last = now;
        }
        max_gap
    });

    assert!(
        max_gap < Duration::from_millis(150),
        "timer stalled for {:?} during allocation",
        max_gap
    );
}
