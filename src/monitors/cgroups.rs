//! cgroup v1 memory pressure notifications.
//!
//! For each severity level an eventfd is bound to `memory.pressure_level` by
//! writing `"<eventfd> <pressure_level fd> <level>"` to `cgroup.event_control`.
//! The kernel then increments the eventfd counter whenever the cgroup hits
//! that pressure level.
//!
//! Bitmask published under `cgroups`: bit0 = low, bit1 = medium, bit2 = critical.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::{combine_levels, MonitorError, PressureReporter, WakeSender};
use crate::os::EventFd;
use crate::tracker::Tracker;

pub const PRESSURE_LEVEL_PATH: &str = "/sys/fs/cgroup/memory/memory.pressure_level";
pub const EVENT_CONTROL_PATH: &str = "/sys/fs/cgroup/memory/cgroup.event_control";
pub const PRESSURE_KEY: &str = "cgroups";

/// Severity levels in bit order.
pub const LEVELS: [&str; 3] = ["low", "medium", "critical"];

#[derive(Debug, Clone)]
pub struct CgroupsPaths {
    pub pressure_level: PathBuf,
    pub event_control: PathBuf,
}

impl Default for CgroupsPaths {
    fn default() -> Self {
        Self {
            pressure_level: PathBuf::from(PRESSURE_LEVEL_PATH),
            event_control: PathBuf::from(EVENT_CONTROL_PATH),
        }
    }
}

struct ArmedLevel {
    index: usize,
    name: &'static str,
    eventfd: EventFd,
    // Held open for as long as the notification is in use
    _pressure_file: Option<File>,
}

pub struct CgroupsMonitor {
    reporter: Arc<PressureReporter>,
    levels: Arc<Mutex<[bool; 3]>>,
    armed: Vec<ArmedLevel>,
}

fn register_level(paths: &CgroupsPaths, level: &'static str) -> Result<(EventFd, File), MonitorError> {
    let eventfd = EventFd::new().map_err(|source| MonitorError::Descriptor {
        what: "eventfd",
        source,
    })?;

    let pressure_file = File::open(&paths.pressure_level).map_err(|source| MonitorError::Open {
        path: paths.pressure_level.display().to_string(),
        source,
    })?;

    let mut control = OpenOptions::new()
        .write(true)
        .open(&paths.event_control)
        .map_err(|source| MonitorError::Open {
            path: paths.event_control.display().to_string(),
            source,
        })?;

    let command = format!(
        "{} {} {}",
        eventfd.as_raw_fd(),
        pressure_file.as_raw_fd(),
        level
    );
    control
        .write_all(command.as_bytes())
        .map_err(|source| MonitorError::Register { level, source })?;

    Ok((eventfd, pressure_file))
}

impl CgroupsMonitor {
    /// Registers every severity level. Levels that fail are logged and left
    /// unmonitored; with none registered the monitor is inert.
    pub fn new(paths: &CgroupsPaths, tracker: Arc<Tracker>, wake: WakeSender) -> Self {
        let mut armed = Vec::new();
        for (index, &name) in LEVELS.iter().enumerate() {
            match register_level(paths, name) {
                Ok((eventfd, file)) => {
                    debug!("Registered cgroup '{}' pressure notification", name);
                    armed.push(ArmedLevel {
                        index,
                        name,
                        eventfd,
                        _pressure_file: Some(file),
                    });
                }
                Err(e) => warn!("{}", e),
            }
        }

        Self::with_levels(armed, tracker, wake)
    }

    fn with_levels(armed: Vec<ArmedLevel>, tracker: Arc<Tracker>, wake: WakeSender) -> Self {
        let reporter = Arc::new(PressureReporter::new(tracker, PRESSURE_KEY, wake));
        if armed.is_empty() {
            warn!("No cgroup pressure level could be registered, cgroups monitor disabled");
        } else {
            info!(
                "cgroups monitor armed for levels: {}",
                armed.iter().map(|l| l.name).collect::<Vec<_>>().join(", ")
            );
            reporter.publish_initial();
        }

        Self {
            reporter,
            levels: Arc::new(Mutex::new([false; 3])),
            armed,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn armed_levels(&self) -> Vec<&'static str> {
        self.armed.iter().map(|l| l.name).collect()
    }

    /// Spawns one blocking reader thread per armed level.
    pub fn start(self) -> Result<Vec<JoinHandle<()>>, MonitorError> {
        let mut handles = Vec::with_capacity(self.armed.len());
        for level in self.armed {
            let reporter = Arc::clone(&self.reporter);
            let levels = Arc::clone(&self.levels);
            let handle = thread::Builder::new()
                .name(format!("cgroups-{}", level.name))
                .spawn(move || watch_level(level, levels, reporter))
                .map_err(MonitorError::Spawn)?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn watch_level(level: ArmedLevel, levels: Arc<Mutex<[bool; 3]>>, reporter: Arc<PressureReporter>) {
    loop {
        let counter = match level.eventfd.read_counter() {
            Ok(counter) => counter,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(
                    "Reading cgroup '{}' pressure eventfd failed, level no longer monitored: {}",
                    level.name, e
                );
                return;
            }
        };

        // Report under the state lock so masks are published in order
        let mut state = levels.lock().unwrap_or_else(|e| e.into_inner());
        state[level.index] = counter > 0;
        reporter.report(combine_levels(&state[..]));
    }
}
