//! CLI arguments and subcommands for mempressure.
//!
//! Monitoring flags are `Option`s so that values from the config file apply
//! when a flag is not given on the command line.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "mempressure",
    about = "Linux memory pressure monitor and stress generator",
    long_about = "Linux memory pressure monitor and stress generator.\n\n\
                  Prints a periodic time series of memory availability, swap activity, \
                  PSI averages and kernel pressure notifications, optionally while \
                  allocating memory at a controlled rate.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Size of each periodically allocated block in MB (0 disables allocation)
    #[arg(long)]
    pub block_size: Option<u64>,

    /// Size of the block allocated at startup in MB
    #[arg(long)]
    pub initial_size: Option<u64>,

    /// Seconds between block allocations
    #[arg(long)]
    pub alloc_interval: Option<u64>,

    /// Seconds between printed rows
    #[arg(long)]
    pub print_interval: Option<u64>,

    /// Stop allocating once this many MB are allocated (0 = unbounded)
    #[arg(long)]
    pub limit: Option<u64>,

    /// Observer options, e.g. "showReclaimable=true,lowPassHalfLifeSeconds=10"
    #[arg(long)]
    pub options: Option<String>,

    /// PSI medium trigger "<some|full> <stall_us> <window_us>"
    #[arg(long)]
    pub psi_medium_trigger: Option<String>,

    /// PSI critical trigger "<some|full> <stall_us> <window_us>"
    #[arg(long)]
    pub psi_critical_trigger: Option<String>,

    /// PSI trigger wait timeout in seconds
    #[arg(long)]
    pub psi_trig_timeout: Option<u64>,

    /// Do not register cgroup v1 pressure notifications
    #[arg(long)]
    pub disable_cgroups_monitor: bool,

    /// Do not arm PSI triggers
    #[arg(long)]
    pub disable_psi_trigger: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the kernel interfaces used for monitoring are available
    Check,

    /// Generate a configuration file
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments describing every option (YAML only)
        #[arg(long)]
        commented: bool,
    },
}
