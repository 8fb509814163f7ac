//! Event-driven pressure monitors.
//!
//! Unlike the polled observers, a monitor owns its own background thread
//! blocked on a kernel notification primitive:
//! - `cgroups`: cgroup v1 `memory.pressure_level` notifications over eventfd
//! - `psi_trigger`: PSI trigger thresholds waited on with epoll
//!
//! Both publish a pressure bitmask into the tracker and pulse the
//! orchestrator so it prints a row early. The bitmask is only published when
//! it changes.

pub mod cgroups;
pub mod psi_trigger;

use std::io;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::tracker::Tracker;

pub use cgroups::{CgroupsMonitor, CgroupsPaths};
pub use psi_trigger::{PsiTriggerMonitor, StallType, TriggerSpec};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Failed to create {what}: {source}")]
    Descriptor {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to register {level} pressure notification: {source}")]
    Register {
        level: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Invalid PSI trigger '{spec}': {reason}")]
    InvalidTrigger { spec: String, reason: String },

    #[error("Failed to spawn monitor thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Producer half of the wake channel.
///
/// The channel holds at most one pending pulse; pulses sent while one is
/// pending are dropped and the sender never blocks.
#[derive(Debug, Clone)]
pub struct WakeSender {
    tx: mpsc::Sender<()>,
}

impl WakeSender {
    pub fn pulse(&self) {
        if self.tx.try_send(()).is_err() {
            debug!("Wake pulse already pending, dropped");
        }
    }
}

/// Creates the wake channel shared by all monitors and the orchestrator.
pub fn wake_channel() -> (WakeSender, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (WakeSender { tx }, rx)
}

/// Combines per-level flags into a bitmask, level N at bit N.
pub fn combine_levels(levels: &[bool]) -> u32 {
    levels
        .iter()
        .enumerate()
        .fold(0, |mask, (bit, &elevated)| if elevated { mask | (1 << bit) } else { mask })
}

/// Publishes a monitor's bitmask under one tracker key, deduplicating
/// unchanged values.
pub struct PressureReporter {
    tracker: Arc<Tracker>,
    key: &'static str,
    wake: WakeSender,
    last: Mutex<Option<u32>>,
}

impl PressureReporter {
    pub fn new(tracker: Arc<Tracker>, key: &'static str, wake: WakeSender) -> Self {
        Self {
            tracker,
            key,
            wake,
            last: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Stores the idle mask so the column exists before the first row.
    pub fn publish_initial(&self) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(0);
        self.tracker.merge_one(self.key, 0u32);
    }

    /// Publishes `mask` and pulses the orchestrator if it differs from the
    /// last published value. Returns whether anything was published.
    pub fn report(&self, mask: u32) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(mask) {
            return false;
        }
        *last = Some(mask);
        self.tracker.merge_one(self.key, mask);
        drop(last);

        debug!("{} pressure changed to {:#b}", self.key, mask);
        self.wake.pulse();
        true
    }
}

/// The event-driven execution discipline: started once, runs for the
/// process lifetime.
pub enum PressureMonitor {
    Cgroups(CgroupsMonitor),
    PsiTrigger(PsiTriggerMonitor),
}

impl PressureMonitor {
    pub fn name(&self) -> &'static str {
        match self {
            PressureMonitor::Cgroups(_) => "cgroups",
            PressureMonitor::PsiTrigger(_) => "psi_trig",
        }
    }

    /// True when no severity level could be armed.
    pub fn is_inert(&self) -> bool {
        match self {
            PressureMonitor::Cgroups(m) => m.is_inert(),
            PressureMonitor::PsiTrigger(m) => m.is_inert(),
        }
    }

    /// Spawns the monitor's background thread(s).
    pub fn start(self) -> Result<Vec<JoinHandle<()>>, MonitorError> {
        match self {
            PressureMonitor::Cgroups(m) => m.start(),
            PressureMonitor::PsiTrigger(m) => m.start().map(|handle| handle.into_iter().collect()),
        }
    }
}
