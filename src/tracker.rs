//! Thread-safe metric aggregation and snapshot rendering.
//!
//! The `Tracker` is the single point of convergence for every producer:
//! polled observers merge whole metric sets, event-driven monitors and the
//! allocator merge single values. One consumer takes snapshots.
//!
//! The printed schema is frozen by the first snapshot: keys present at that
//! moment become the columns, sorted lexicographically. Keys merged later are
//! stored but never printed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::observers::MetricSet;

/// Key under which the elapsed seconds since start are stored.
pub const TIME_KEY: &str = "time";

/// A single metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Float(v) => write!(f, "{:.2}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Int(i64::from(v))
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

#[derive(Default)]
struct TrackerState {
    actual: BTreeMap<String, MetricValue>,
    fields: Option<Vec<String>>,
}

/// Latest value per metric key, guarded by one mutex.
pub struct Tracker {
    state: Mutex<TrackerState>,
    start_time: Instant,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Creates a tracker and records `time = 0`.
    pub fn new() -> Self {
        let tracker = Self {
            state: Mutex::new(TrackerState::default()),
            start_time: Instant::now(),
        };
        tracker.save_time();
        tracker
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A panicking producer cannot leave the map half-written; keep going
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores one value, replacing the previous one for `key`.
    pub fn merge_one(&self, key: &str, value: impl Into<MetricValue>) {
        let value = value.into();
        let mut state = self.lock();
        state.actual.insert(key.to_string(), value);
    }

    /// Stores every value of `set` under a single lock acquisition.
    pub fn merge_set(&self, set: MetricSet) {
        let mut state = self.lock();
        for (key, value) in set {
            state.actual.insert(key, value);
        }
    }

    /// Records whole seconds elapsed since the tracker was created.
    pub fn save_time(&self) {
        let elapsed = self.start_time.elapsed().as_secs();
        self.merge_one(TIME_KEY, elapsed);
    }

    /// Returns the latest value stored for `key`, printed or not.
    pub fn get(&self, key: &str) -> Option<MetricValue> {
        self.lock().actual.get(key).cloned()
    }

    /// Returns the frozen column set and current values.
    ///
    /// The first call fixes the columns to the keys known at that moment.
    pub fn snapshot(&self) -> Snapshot {
        let mut state = self.lock();
        if state.fields.is_none() {
            let fields: Vec<String> = state.actual.keys().cloned().collect();
            state.fields = Some(fields);
        }

        let state = &*state;
        let columns = state
            .fields
            .iter()
            .flatten()
            .map(|k| (k.clone(), state.actual.get(k).cloned()))
            .collect();

        Snapshot { columns }
    }
}

/// Point-in-time view over the frozen schema.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub columns: Vec<(String, Option<MetricValue>)>,
}

impl Snapshot {
    /// Column names, each followed by `", "`.
    pub fn header(&self) -> String {
        let mut out = String::new();
        for (name, _) in &self.columns {
            out.push_str(name);
            out.push_str(", ");
        }
        out
    }

    /// Values right-aligned to the width of their column name.
    pub fn row(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.columns {
            let width = name.len();
            let cell = match value {
                Some(MetricValue::Float(v)) => format!("{:>width$.2}", v, width = width),
                Some(other) => format!("{:>width$}", other.to_string(), width = width),
                None => format!("{:>width$}", "", width = width),
            };
            out.push_str(&cell);
            out.push_str(", ");
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.columns
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_ref())
    }
}
