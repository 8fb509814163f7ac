//! PSI trigger notifications.
//!
//! A trigger is armed by writing `"<some|full> <stall_us> <window_us>\0"` to
//! `/proc/pressure/memory` opened read-write and non-blocking. The kernel
//! then raises `EPOLLPRI` on that descriptor whenever the stall threshold is
//! exceeded within the window.
//!
//! Bitmask published under `psi_trig`: bit0 = medium, bit1 = critical. Levels
//! are not latched: each wait iteration reports only what fired during it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{combine_levels, MonitorError, PressureReporter, WakeSender};
use crate::options::PsiTriggerOptions;
use crate::os::{Epoll, EMPTY_EPOLL_EVENT};
use crate::tracker::Tracker;

pub const PSI_TRIGGER_PATH: &str = "/proc/pressure/memory";
pub const PRESSURE_KEY: &str = "psi_trig";

/// Severity levels in bit order.
pub const LEVELS: [&str; 2] = ["medium", "critical"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallType {
    /// At least one task stalled.
    Some,
    /// All non-idle tasks stalled.
    Full,
}

impl StallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StallType::Some => "some",
            StallType::Full => "full",
        }
    }
}

/// Parsed PSI trigger, e.g. `some 150000 1000000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSpec {
    pub stall: StallType,
    pub threshold_us: u64,
    pub window_us: u64,
}

impl TriggerSpec {
    /// The NUL-terminated form the kernel expects.
    pub fn to_bytes_with_nul(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(0);
        bytes
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.stall.as_str(), self.threshold_us, self.window_us)
    }
}

impl FromStr for TriggerSpec {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MonitorError::InvalidTrigger {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = s.split_whitespace().collect();
        let [stall, threshold, window] = fields[..] else {
            return Err(invalid("expected '<some|full> <stall_us> <window_us>'"));
        };

        let stall = match stall {
            "some" => StallType::Some,
            "full" => StallType::Full,
            _ => return Err(invalid("stall type must be 'some' or 'full'")),
        };
        let threshold_us: u64 = threshold
            .parse()
            .map_err(|_| invalid("stall threshold is not an integer"))?;
        let window_us: u64 = window
            .parse()
            .map_err(|_| invalid("window is not an integer"))?;

        if threshold_us == 0 {
            return Err(invalid("stall threshold must be positive"));
        }
        if threshold_us > window_us {
            return Err(invalid("stall threshold exceeds window"));
        }

        Ok(Self {
            stall,
            threshold_us,
            window_us,
        })
    }
}

struct ArmedTrigger {
    index: usize,
    name: &'static str,
    file: File,
}

fn arm_trigger(path: &Path, spec: &TriggerSpec, level: &'static str) -> Result<File, MonitorError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| MonitorError::Open {
            path: path.display().to_string(),
            source,
        })?;

    file.write_all(&spec.to_bytes_with_nul())
        .map_err(|source| MonitorError::Register { level, source })?;
    Ok(file)
}

/// Mask of the levels whose tokens were reported ready.
pub fn ready_mask(tokens: &[u64]) -> u32 {
    let mut levels = [false; LEVELS.len()];
    for &token in tokens {
        if let Some(flag) = levels.get_mut(token as usize) {
            *flag = true;
        }
    }
    combine_levels(&levels)
}

pub struct PsiTriggerMonitor {
    reporter: Arc<PressureReporter>,
    timeout: Duration,
    armed: Vec<ArmedTrigger>,
}

impl PsiTriggerMonitor {
    /// Arms the medium and critical triggers on `path`. A trigger that fails
    /// to parse or arm is logged and skipped.
    pub fn new(
        path: impl Into<PathBuf>,
        options: &PsiTriggerOptions,
        tracker: Arc<Tracker>,
        wake: WakeSender,
    ) -> Self {
        let path = path.into();
        let specs = [&options.medium_trigger, &options.critical_trigger];

        let mut armed = Vec::new();
        for (index, (&name, spec)) in LEVELS.iter().zip(specs).enumerate() {
            let result = spec
                .parse::<TriggerSpec>()
                .and_then(|spec| arm_trigger(&path, &spec, name));
            match result {
                Ok(file) => {
                    debug!("Armed {} PSI trigger '{}'", name, spec);
                    armed.push(ArmedTrigger { index, name, file });
                }
                Err(e) => warn!("Error while creating {} PSI trigger: {}", name, e),
            }
        }

        let reporter = Arc::new(PressureReporter::new(tracker, PRESSURE_KEY, wake));
        if armed.is_empty() {
            warn!("No PSI trigger could be armed, PSI trigger monitor disabled");
        } else {
            info!(
                "PSI trigger monitor armed for levels: {}",
                armed.iter().map(|t| t.name).collect::<Vec<_>>().join(", ")
            );
            reporter.publish_initial();
        }

        Self {
            reporter,
            timeout: options.timeout,
            armed,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn armed_levels(&self) -> Vec<&'static str> {
        self.armed.iter().map(|t| t.name).collect()
    }

    /// Registers the armed triggers on an epoll set and spawns the wait loop.
    /// An inert monitor spawns nothing.
    pub fn start(self) -> Result<Option<JoinHandle<()>>, MonitorError> {
        if self.armed.is_empty() {
            return Ok(None);
        }

        let epoll = Epoll::new().map_err(|source| MonitorError::Descriptor {
            what: "epoll instance",
            source,
        })?;
        for trigger in &self.armed {
            if let Err(e) = epoll.add_priority(trigger.file.as_raw_fd(), trigger.index as u64) {
                warn!("Failed to watch {} PSI trigger: {}", trigger.name, e);
            }
        }

        let handle = thread::Builder::new()
            .name("psi-trigger".to_string())
            .spawn(move || {
                // Trigger files stay open for as long as the loop runs
                let _triggers = self.armed;
                wait_loop(&epoll, self.timeout, &self.reporter);
            })
            .map_err(MonitorError::Spawn)?;
        Ok(Some(handle))
    }
}

fn wait_loop(epoll: &Epoll, timeout: Duration, reporter: &PressureReporter) {
    let mut events = [EMPTY_EPOLL_EVENT; LEVELS.len()];
    let mut tokens = [0u64; LEVELS.len()];
    loop {
        let ready = match epoll.wait(timeout, &mut events) {
            Ok(ready) => ready,
            Err(e) => {
                error!("epoll_wait failed, PSI trigger monitor stopped: {}", e);
                return;
            }
        };
        for (token, event) in tokens.iter_mut().zip(&events[..ready]) {
            *token = event.u64;
        }
        reporter.report(ready_mask(&tokens[..ready]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::wake_channel;
    use crate::tracker::MetricValue;
    use tempfile::tempdir;

    #[test]
    fn test_parse_default_triggers() {
        let medium: TriggerSpec = "some 150000 1000000".parse().unwrap();
        assert_eq!(medium.stall, StallType::Some);
        assert_eq!(medium.threshold_us, 150000);
        assert_eq!(medium.window_us, 1000000);

        let critical: TriggerSpec = "  full   100000 1000000 ".parse().unwrap();
        assert_eq!(critical.stall, StallType::Full);
        assert_eq!(critical.to_string(), "full 100000 1000000");
    }

    #[test]
    fn test_trigger_bytes_are_nul_terminated() {
        let spec: TriggerSpec = "some 150000 1000000".parse().unwrap();
        assert_eq!(spec.to_bytes_with_nul(), b"some 150000 1000000\0".to_vec());
    }

    #[test]
    fn test_reject_invalid_triggers() {
        for spec in [
            "",
            "some 150000",
            "partial 150000 1000000",
            "some abc 1000000",
            "some 0 1000000",
            "full 2000000 1000000",
            "some 1 2 3",
        ] {
            assert!(
                matches!(spec.parse::<TriggerSpec>(), Err(MonitorError::InvalidTrigger { .. })),
                "'{}' should be rejected",
                spec
            );
        }
    }

    #[test]
    fn test_ready_mask() {
        assert_eq!(ready_mask(&[]), 0);
        assert_eq!(ready_mask(&[0]), 0b01);
        assert_eq!(ready_mask(&[1]), 0b10);
        assert_eq!(ready_mask(&[1, 0]), 0b11);
        // Unknown tokens are ignored
        assert_eq!(ready_mask(&[7]), 0);
    }

    #[test]
    fn test_inert_without_psi_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let tracker = Arc::new(Tracker::new());
        let (wake, _rx) = wake_channel();

        let monitor = PsiTriggerMonitor::new(
            dir.path().join("memory"),
            &PsiTriggerOptions::default(),
            tracker.clone(),
            wake,
        );
        assert!(monitor.is_inert());
        assert!(tracker.get(PRESSURE_KEY).is_none());
        assert!(monitor.start().expect("start").is_none());
    }

    #[test]
    fn test_invalid_trigger_skips_only_that_level() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("memory");
        std::fs::write(&path, "").unwrap();
        let tracker = Arc::new(Tracker::new());
        let (wake, _rx) = wake_channel();

        let options = PsiTriggerOptions {
            medium_trigger: "bogus".to_string(),
            ..PsiTriggerOptions::default()
        };
        let monitor = PsiTriggerMonitor::new(&path, &options, tracker.clone(), wake);
        assert_eq!(monitor.armed_levels(), vec!["critical"]);
        assert!(tracker.get(PRESSURE_KEY).is_some());

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, b"full 100000 1000000\0".to_vec());
    }

    #[test]
    fn test_idle_wait_loop_keeps_mask_clear() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("memory");
        std::fs::write(&path, "").unwrap();
        let tracker = Arc::new(Tracker::new());
        let (wake, mut rx) = wake_channel();

        let options = PsiTriggerOptions {
            timeout: Duration::from_millis(10),
            ..PsiTriggerOptions::default()
        };
        let monitor = PsiTriggerMonitor::new(&path, &options, tracker.clone(), wake);
        assert_eq!(monitor.armed_levels(), vec!["medium", "critical"]);

        // Regular files never raise EPOLLPRI, so every wait times out idle
        let handle = monitor.start().expect("start").expect("wait loop started");
        assert_eq!(handle.thread().name(), Some("psi-trigger"));
        thread::sleep(Duration::from_millis(100));

        assert!(!handle.is_finished(), "idle waits must not end the loop");
        assert_eq!(tracker.get(PRESSURE_KEY), Some(MetricValue::Int(0)));
        assert!(rx.try_recv().is_err(), "idle waits must not pulse");
    }
}
