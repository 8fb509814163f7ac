//! Integration tests for the polled observers.
//!
//! Each test writes a small `/proc` fixture tree into a temp dir and points
//! a `FileReader` at it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mempressure::observers::{meminfo, psi, swap};
use mempressure::{
    FileReader, MeminfoObserver, MetricValue, ObserverOptions, PolledObserver, PsiObserver,
    Reader, SwapObserver, Tracker,
};
use tempfile::{tempdir, TempDir};

const MEMINFO: &str = "MemTotal:       32803948 kB
MemFree:        13506444 kB
MemAvailable:   26190788 kB
Buffers:          910532 kB
Cached:          9900196 kB
SwapCached:            0 kB
Active:          9785292 kB
Inactive:        7203008 kB
Active(anon):    3367168 kB
Inactive(anon):  2184568 kB
Active(file):    6418124 kB
Inactive(file):  5018440 kB
SwapTotal:       2097148 kB
SwapFree:        1048574 kB
Slab:            2440416 kB
SReclaimable:    2069212 kB
SUnreclaim:       371204 kB
";

const ZONEINFO: &str = "Node 0, zone      DMA
  per-node stats
      nr_inactive_anon 546142
  pages free     3840
        min      7
        low      11
        high     15
Node 0, zone    DMA32
  pages free     409371
        min      1594
        low      2656
        high     3718
Node 0, zone   Normal
  pages free     2964110
        min      40240
        low      67067
        high     93894
Node 0, zone  Movable
  pages free     0
        min      0
        low      0
        high     0
Node 0, zone   Device
  pages free     0
        min      0
        low      0
        high     0
";

const VMSTAT: &str = "nr_free_pages 3376611
nr_mapped 262144
pgfault 91823751
pgmajfault 1000
";

const PRESSURE: &str = "some avg10=1.50 avg60=0.75 avg300=0.10 total=123456
full avg10=0.50 avg60=0.25 avg300=0.00 total=65432
";

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path.trim_start_matches('/'));
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

/// Fixture tree with 8 GiB of `MemTotal` for the tendency math.
fn proc_tree() -> TempDir {
    let dir = tempdir().expect("Failed to create temp dir");
    write(dir.path(), meminfo::MEMINFO_PATH, MEMINFO);
    write(dir.path(), meminfo::ZONEINFO_PATH, ZONEINFO);
    write(dir.path(), swap::VMSTAT_PATH, VMSTAT);
    write(dir.path(), swap::STAT_PATH, "cpu  1000 356 584 3699 23 23 0 0 0 0\n");
    write(dir.path(), swap::SWAPPINESS_PATH, "60\n");
    write(dir.path(), psi::PSI_MEMORY_PATH, PRESSURE);
    dir
}

fn float(value: Option<&MetricValue>) -> f64 {
    match value {
        Some(MetricValue::Float(v)) => *v,
        other => panic!("expected float, got {:?}", other),
    }
}

#[test]
fn test_meminfo_metrics_in_mb() {
    let dir = proc_tree();
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let options = ObserverOptions {
        show_reclaimable: true,
        show_inactive: true,
        ..ObserverOptions::default()
    };
    let mut observer = MeminfoObserver::new(reader, 4096, &options);

    let metrics = observer.observe().expect("meminfo observed");

    assert_eq!(float(metrics.get(meminfo::AVAILABLE_ESTIMATED_KEY)) * 1024.0, 26175412.0);
    assert_eq!(float(metrics.get(meminfo::AVAILABLE_KEY)) * 1024.0, 26190788.0);
    assert_eq!(float(metrics.get(meminfo::TOTAL_KEY)) * 1024.0, 32803948.0);
    assert_eq!(float(metrics.get(meminfo::RECLAIMABLE_KEY)) * 1024.0, 2069212.0);
    assert_eq!(float(metrics.get(meminfo::INACTIVE_FILE_KEY)) * 1024.0, 5018440.0);

    let expected_pcnt = (32803948.0 - 26190788.0) * 100.0 / 32803948.0;
    assert!((float(metrics.get(meminfo::PERCENT_KEY)) - expected_pcnt).abs() < 1e-9);
    assert!((float(metrics.get(meminfo::SWAP_PERCENT_KEY)) - 50.0).abs() < 0.01);
}

#[test]
fn test_meminfo_without_native_available() {
    let dir = proc_tree();
    let without: String = MEMINFO
        .lines()
        .filter(|line| !line.starts_with("MemAvailable") && !line.starts_with("Swap"))
        .map(|line| format!("{}\n", line))
        .collect();
    write(dir.path(), meminfo::MEMINFO_PATH, &without);

    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let mut observer = MeminfoObserver::new(reader, 4096, &ObserverOptions::default());
    let metrics = observer.observe().expect("meminfo observed");

    assert_eq!(float(metrics.get(meminfo::AVAILABLE_KEY)) * 1024.0, 26175412.0);
    assert!(metrics.get(meminfo::AVAILABLE_ESTIMATED_KEY).is_none());
    assert!(metrics.get(meminfo::SWAP_TOTAL_KEY).is_none());
    assert!(metrics.get(meminfo::RECLAIMABLE_KEY).is_none());
}

#[test]
fn test_meminfo_missing_required_field_fails() {
    let dir = proc_tree();
    write(dir.path(), meminfo::MEMINFO_PATH, "MemTotal: 1000 kB\nMemFree: 500 kB\n");
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let mut observer = MeminfoObserver::new(reader, 4096, &ObserverOptions::default());
    assert!(observer.observe().is_err());
}

#[test]
fn test_swap_observer_rates_across_cycles() {
    let dir = proc_tree();
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let options = ObserverOptions {
        low_pass_half_life_seconds: 1.0,
        ..ObserverOptions::default()
    };
    // 100 ticks per second: 1000 ticks = 10 s of user time
    let mut observer = SwapObserver::new(reader, 4096, 100, &options);

    let first = observer.observe().expect("swap observed");
    assert!((float(first.get(swap::FAULTS_SEC_KEY)) - 100.0).abs() < 1e-9);

    // 262144 * 4096 * 100 / (32803948 * 1024) / 2 + 60
    let expected_tendency = 262144.0 * 4096.0 * 100.0 / (32803948.0 * 1024.0) / 2.0 + 60.0;
    assert!((float(first.get(swap::TENDENCY_KEY)) - expected_tendency).abs() < 1e-9);

    // One more second of user time with 50 more faults
    write(dir.path(), swap::VMSTAT_PATH, &VMSTAT.replace("pgmajfault 1000", "pgmajfault 1050"));
    write(dir.path(), swap::STAT_PATH, "cpu  1100 356 584 3699 23 23 0 0 0 0\n");

    let second = observer.observe().expect("swap observed");
    assert!((float(second.get(swap::FAULTS_SEC_KEY)) - 50.0).abs() < 1e-9);
    // Half-life of 1 s: halfway from the previous filtered value
    let previous = float(first.get(swap::FAULTS_SEC_FILTERED_KEY));
    let expected = 0.5 * 50.0 + 0.5 * previous;
    assert!((float(second.get(swap::FAULTS_SEC_FILTERED_KEY)) - expected).abs() < 1e-9);
    assert_eq!(observer.filter().last_fault_count, 1050);
}

#[test]
fn test_swap_tendency_omitted_on_partial_failure() {
    let dir = proc_tree();
    fs::remove_file(dir.path().join("proc/sys/vm/swappiness")).unwrap();
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let mut observer = SwapObserver::new(reader, 4096, 100, &ObserverOptions::default());

    let metrics = observer.observe().expect("fault rate still observed");
    assert!(metrics.contains_key(swap::FAULTS_SEC_KEY));
    assert!(!metrics.contains_key(swap::TENDENCY_KEY));
}

#[test]
fn test_swap_missing_faults_is_fatal() {
    let dir = proc_tree();
    write(dir.path(), swap::VMSTAT_PATH, "nr_mapped 262144\n");
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let mut observer = SwapObserver::new(reader, 4096, 100, &ObserverOptions::default());
    assert!(observer.observe().is_err());
}

#[test]
fn test_psi_observer_selects_metric() {
    let dir = proc_tree();
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));

    let mut observer = PsiObserver::new(Arc::clone(&reader), "avg60");
    let metrics = observer.observe().expect("psi observed");
    assert_eq!(float(metrics.get(psi::SOME_AVG_KEY)), 0.75);
    assert_eq!(float(metrics.get(psi::FULL_AVG_KEY)), 0.25);

    let mut observer = PsiObserver::new(reader, "avg120");
    let metrics = observer.observe().expect("psi observed");
    assert!(float(metrics.get(psi::SOME_AVG_KEY)).is_nan());
}

#[test]
fn test_full_cycle_header_and_row() {
    let dir = proc_tree();
    fs::remove_file(dir.path().join("proc/pressure/memory")).unwrap();
    let reader: Arc<dyn Reader> = Arc::new(FileReader::with_root(dir.path()));
    let options = ObserverOptions::default();
    let tracker = Tracker::new();

    let mut observers = vec![
        PolledObserver::Meminfo(MeminfoObserver::new(Arc::clone(&reader), 4096, &options)),
        PolledObserver::Swap(SwapObserver::new(Arc::clone(&reader), 4096, 100, &options)),
        PolledObserver::Psi(PsiObserver::new(Arc::clone(&reader), &options.psi_avg_metric)),
    ];
    for observer in observers.iter_mut() {
        match observer.observe() {
            Ok(metrics) => tracker.merge_set(metrics),
            Err(e) => assert!(!observer.is_required(), "{}: {}", observer.name(), e),
        }
    }

    let snapshot = tracker.snapshot();
    let header = snapshot.header();
    assert!(header.starts_with("mem_avail, mem_avail_est, mem_pcnt, mem_total, "));
    assert!(header.ends_with("swp_tend, swp_total, time, "));
    assert!(!header.contains("psi_some"));

    let row = snapshot.row();
    assert_eq!(row.matches(", ").count(), header.matches(", ").count());
}
