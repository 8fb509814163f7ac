//! Physical backing test for the stress allocator.
//!
//! Kept in its own test binary so the measured resident set belongs to a
//! process no other test allocates in.

use std::sync::Arc;

use mempressure::os::PAGE_SIZE;
use mempressure::{Allocator, Tracker};

/// Reads VmRSS of the current process in KB.
fn resident_kb() -> u64 {
    let status = std::fs::read_to_string("/proc/self/status").expect("read /proc/self/status");
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|value| value.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
        .expect("VmRSS present")
}

#[test]
fn test_allocated_block_is_resident() {
    const BLOCK_MB: u64 = 64;

    let tracker = Arc::new(Tracker::new());
    let mut allocator = Allocator::new(tracker, *PAGE_SIZE);

    let before = resident_kb();
    allocator.allocate_block(BLOCK_MB).expect("allocation");
    let after = resident_kb();

    let grown_kb = after.saturating_sub(before);
    assert!(
        grown_kb >= BLOCK_MB * 1024,
        "RSS grew by {} KB, expected at least {} KB",
        grown_kb,
        BLOCK_MB * 1024
    );
}
