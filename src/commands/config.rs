//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(match format {
            ConfigFormat::Json => "mempressure.json",
            ConfigFormat::Toml => "mempressure.toml",
            ConfigFormat::Yaml => "mempressure.yaml",
        }),
    };

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# mempressure Configuration
# ==========================
#
# Allocator
# ---------
# block_size_mb: 128             # Block allocated every interval (0 = passive mode)
# initial_size_mb: 0             # Block allocated before monitoring starts
# alloc_interval_seconds: 1      # Delay between allocations
# limit_mb: 0                    # Stop allocating at this total (0 = no limit)
#
# Output
# ------
# print_interval_seconds: 5      # Delay between printed rows
#
# Observers
# ---------
# show_reclaimable: false        # Add mem_reclaim (SReclaimable) column
# show_inactive: false           # Add mem_inactive (Inactive(file)) column
# average_only_current: false    # Skip the first fault-rate sample
# low_pass_half_life_seconds: 30 # Half-life of the fault-rate filter
# psi_avg_metric: "avg10"        # avg10, avg60 or avg300
#
# Pressure Monitors
# -----------------
# psi_medium_trigger: "some 150000 1000000"   # <some|full> <stall_us> <window_us>
# psi_critical_trigger: "full 100000 1000000"
# psi_trig_timeout_seconds: 5
# enable_cgroups_monitor: true   # cgroup v1 memory.pressure_level notifications
# enable_psi_trigger: true
#
# Logging is selected with --log-level on the command line.
"#;

    format!("{comments}\n{yaml}")
}
