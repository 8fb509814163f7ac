//! Check command implementation.
//!
//! Verifies the kernel interfaces the observers and monitors depend on.

use std::path::Path;

use mempressure::monitors::{cgroups, psi_trigger};
use mempressure::observers::{meminfo, swap};
use mempressure::os::{CLK_TCK, PAGE_SIZE};
use mempressure::{FileReader, Reader};
use nix::unistd::geteuid;

use crate::config::{validate_effective_config, Config};

/// Required `(path, key)` pairs; an empty key only checks the file.
const REQUIRED_KEYS: [(&str, &str); 9] = [
    (meminfo::MEMINFO_PATH, "MemTotal"),
    (meminfo::MEMINFO_PATH, "MemFree"),
    (meminfo::MEMINFO_PATH, "Active(file)"),
    (meminfo::MEMINFO_PATH, "Inactive(file)"),
    (meminfo::MEMINFO_PATH, "SReclaimable"),
    (meminfo::ZONEINFO_PATH, "low"),
    (swap::VMSTAT_PATH, "pgmajfault"),
    (swap::STAT_PATH, "cpu"),
    (swap::SWAPPINESS_PATH, ""),
];

fn check_key(reader: &FileReader, path: &str, key: &str) -> Result<(), String> {
    let result = if key.is_empty() {
        reader.read_whole_int(path).map(|_| ())
    } else if key == "low" {
        reader.read_all_ints(path, key).and_then(|values| {
            if values.is_empty() {
                Err(mempressure::ReadError::KeyNotFound {
                    path: path.to_string(),
                    key: key.to_string(),
                })
            } else {
                Ok(())
            }
        })
    } else {
        reader.read_text(path, key).map(|_| ())
    };
    result.map_err(|e| e.to_string())
}

/// Validates system requirements and configuration.
pub fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 mempressure - System Check");
    println!("=============================");

    let mut all_ok = true;
    let reader = FileReader::new();

    println!("\n📁 Checking required kernel interfaces...");
    for (path, key) in REQUIRED_KEYS {
        match check_key(&reader, path, key) {
            Ok(()) if key.is_empty() => println!("   ✅ {}", path),
            Ok(()) => println!("   ✅ {} ({})", path, key),
            Err(e) => {
                println!("   ❌ {}", e);
                all_ok = false;
            }
        }
    }

    println!("\n⚙️  System constants...");
    println!("   ✅ Page size: {} bytes", *PAGE_SIZE);
    println!("   ✅ Clock ticks: {} Hz", *CLK_TCK);

    println!("\n📊 Checking optional pressure sources...");
    match reader.read_text(psi_trigger::PSI_TRIGGER_PATH, "some") {
        Ok(_) => println!("   ✅ PSI available ({})", psi_trigger::PSI_TRIGGER_PATH),
        Err(_) => println!("   ⚠️  PSI not available - psi_some/psi_full/psi_trig disabled"),
    }
    let cgroup_files = [cgroups::PRESSURE_LEVEL_PATH, cgroups::EVENT_CONTROL_PATH];
    if cgroup_files.iter().all(|p| Path::new(p).exists()) {
        println!("   ✅ cgroup v1 memory pressure notifications available");
    } else {
        println!("   ⚠️  cgroup v1 memory controller not found - cgroups monitor disabled");
    }
    if geteuid().is_root() {
        println!("   ✅ Running as root");
    } else {
        println!("   ⚠️  Not running as root - cgroup notifications may fail to register");
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => {
            println!("   ✅ Configuration is valid");
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - this platform is not supported");
        std::process::exit(1);
    }
}
