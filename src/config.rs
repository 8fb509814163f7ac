//! Configuration management for mempressure.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat};
use ahash::AHashMap as HashMap;
use mempressure::options::{
    AllocatorOptions, ObserverOptions, PsiTriggerOptions, DEFAULT_HALF_LIFE_SECONDS,
    DEFAULT_PSI_AVG_METRIC, DEFAULT_PSI_CRITICAL_TRIGGER, DEFAULT_PSI_MEDIUM_TRIGGER,
    DEFAULT_PSI_TRIGGER_TIMEOUT_SECONDS,
};
use mempressure::allocator::MAX_BLOCK_SIZE_MB;
use mempressure::TriggerSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

// Default configuration constants
pub const DEFAULT_BLOCK_SIZE_MB: u64 = 128;
pub const DEFAULT_INITIAL_SIZE_MB: u64 = 0;
pub const DEFAULT_ALLOC_INTERVAL_SECONDS: u64 = 1;
pub const DEFAULT_PRINT_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_LIMIT_MB: u64 = 0;

/// Enhanced configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Allocator
    #[serde(alias = "block-size")]
    pub block_size_mb: Option<u64>,
    #[serde(alias = "initial-size")]
    pub initial_size_mb: Option<u64>,
    #[serde(alias = "alloc-interval")]
    pub alloc_interval_seconds: Option<u64>,
    #[serde(alias = "limit")]
    pub limit_mb: Option<u64>,

    // Output
    #[serde(alias = "print-interval")]
    pub print_interval_seconds: Option<u64>,

    // Observer options
    #[serde(alias = "showReclaimable")]
    pub show_reclaimable: Option<bool>,
    #[serde(alias = "showInactive")]
    pub show_inactive: Option<bool>,
    #[serde(alias = "averageOnlyCurrent")]
    pub average_only_current: Option<bool>,
    #[serde(alias = "lowPassHalfLifeSeconds")]
    pub low_pass_half_life_seconds: Option<f64>,
    #[serde(alias = "psiAvgMetric")]
    pub psi_avg_metric: Option<String>,

    // Pressure monitors
    #[serde(alias = "psi-medium-trigger")]
    pub psi_medium_trigger: Option<String>,
    #[serde(alias = "psi-critical-trigger")]
    pub psi_critical_trigger: Option<String>,
    #[serde(alias = "psi-trig-timeout")]
    pub psi_trig_timeout_seconds: Option<u64>,
    #[serde(alias = "enable-cgroups-monitor")]
    pub enable_cgroups_monitor: Option<bool>,
    #[serde(alias = "enable-psi-trigger")]
    pub enable_psi_trigger: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size_mb: Some(DEFAULT_BLOCK_SIZE_MB),
            initial_size_mb: Some(DEFAULT_INITIAL_SIZE_MB),
            alloc_interval_seconds: Some(DEFAULT_ALLOC_INTERVAL_SECONDS),
            limit_mb: Some(DEFAULT_LIMIT_MB),
            print_interval_seconds: Some(DEFAULT_PRINT_INTERVAL_SECONDS),
            show_reclaimable: Some(false),
            show_inactive: Some(false),
            average_only_current: Some(false),
            low_pass_half_life_seconds: Some(DEFAULT_HALF_LIFE_SECONDS),
            psi_avg_metric: Some(DEFAULT_PSI_AVG_METRIC.into()),
            psi_medium_trigger: Some(DEFAULT_PSI_MEDIUM_TRIGGER.into()),
            psi_critical_trigger: Some(DEFAULT_PSI_CRITICAL_TRIGGER.into()),
            psi_trig_timeout_seconds: Some(DEFAULT_PSI_TRIGGER_TIMEOUT_SECONDS),
            enable_cgroups_monitor: Some(true),
            enable_psi_trigger: Some(true),
        }
    }
}

impl Config {
    pub fn observer_options(&self) -> ObserverOptions {
        ObserverOptions {
            show_reclaimable: self.show_reclaimable.unwrap_or(false),
            show_inactive: self.show_inactive.unwrap_or(false),
            average_only_current: self.average_only_current.unwrap_or(false),
            low_pass_half_life_seconds: self
                .low_pass_half_life_seconds
                .unwrap_or(DEFAULT_HALF_LIFE_SECONDS),
            psi_avg_metric: self
                .psi_avg_metric
                .clone()
                .unwrap_or_else(|| DEFAULT_PSI_AVG_METRIC.to_string()),
        }
    }

    pub fn psi_trigger_options(&self) -> PsiTriggerOptions {
        PsiTriggerOptions {
            medium_trigger: self
                .psi_medium_trigger
                .clone()
                .unwrap_or_else(|| DEFAULT_PSI_MEDIUM_TRIGGER.to_string()),
            critical_trigger: self
                .psi_critical_trigger
                .clone()
                .unwrap_or_else(|| DEFAULT_PSI_CRITICAL_TRIGGER.to_string()),
            timeout: Duration::from_secs(
                self.psi_trig_timeout_seconds
                    .unwrap_or(DEFAULT_PSI_TRIGGER_TIMEOUT_SECONDS),
            ),
        }
    }

    pub fn allocator_options(&self) -> AllocatorOptions {
        AllocatorOptions {
            initial_size_mb: self.initial_size_mb.unwrap_or(DEFAULT_INITIAL_SIZE_MB),
            block_size_mb: self.block_size_mb.unwrap_or(DEFAULT_BLOCK_SIZE_MB),
            period: Duration::from_secs(
                self.alloc_interval_seconds
                    .unwrap_or(DEFAULT_ALLOC_INTERVAL_SECONDS),
            ),
            limit_mb: self.limit_mb.unwrap_or(DEFAULT_LIMIT_MB),
        }
    }

    pub fn print_interval(&self) -> Duration {
        Duration::from_secs(
            self.print_interval_seconds
                .unwrap_or(DEFAULT_PRINT_INTERVAL_SECONDS),
        )
    }
}

/// Splits an observer option string (`key=value,key=value`) into pairs.
/// Entries that are not exactly one `key=value` pair are skipped.
pub fn parse_option_string(options: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for option in options.split(',') {
        let pair: Vec<&str> = option.split('=').collect();
        if let [key, value] = pair[..] {
            result.insert(key.trim().to_string(), value.trim().to_string());
        } else if !option.trim().is_empty() {
            debug!("Skipping malformed option '{}'", option);
        }
    }
    result
}

/// Applies parsed observer options on top of `config`.
pub fn apply_observer_options(config: &mut Config, params: &HashMap<String, String>) {
    for (key, value) in params {
        match key.as_str() {
            "showReclaimable" => config.show_reclaimable = Some(value == "true"),
            "showInactive" => config.show_inactive = Some(value == "true"),
            "averageOnlyCurrent" => config.average_only_current = Some(value == "true"),
            "lowPassHalfLifeSeconds" => match value.parse::<f64>() {
                Ok(seconds) => config.low_pass_half_life_seconds = Some(seconds),
                Err(e) => warn!("Ignoring lowPassHalfLifeSeconds '{}': {}", value, e),
            },
            // Single-character values are ignored
            "psiAvgMetric" if value.len() > 1 => config.psi_avg_metric = Some(value.clone()),
            "psiAvgMetric" => debug!("Ignoring psiAvgMetric '{}'", value),
            other => debug!("Unknown observer option '{}' ignored", other),
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.print_interval_seconds == Some(0) {
        return Err("print_interval_seconds must be greater than 0".into());
    }
    if cfg.alloc_interval_seconds == Some(0) {
        return Err("alloc_interval_seconds must be greater than 0".into());
    }

    let sizes = [
        ("block_size_mb", cfg.block_size_mb),
        ("initial_size_mb", cfg.initial_size_mb),
    ];
    for (name, size) in sizes {
        if let Some(size) = size.filter(|&s| s > MAX_BLOCK_SIZE_MB) {
            return Err(format!(
                "{} must be at most {} MB, got {}",
                name, MAX_BLOCK_SIZE_MB, size
            )
            .into());
        }
    }

    if let Some(half_life) = cfg.low_pass_half_life_seconds {
        if !(half_life > 0.0) {
            return Err(format!(
                "low_pass_half_life_seconds must be greater than 0, got {}",
                half_life
            )
            .into());
        }
    }

    if cfg.enable_psi_trigger.unwrap_or(true) {
        let triggers = [
            ("psi_medium_trigger", cfg.psi_medium_trigger.as_deref()),
            ("psi_critical_trigger", cfg.psi_critical_trigger.as_deref()),
        ];
        for (name, trigger) in triggers {
            if let Some(trigger) = trigger {
                trigger
                    .parse::<TriggerSpec>()
                    .map_err(|e| format!("{}: {}", name, e))?;
            }
        }

        if cfg.psi_trig_timeout_seconds == Some(0) {
            return Err("psi_trig_timeout_seconds must be greater than 0".into());
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    // Allocator and output settings
    if let Some(size) = args.block_size {
        config.block_size_mb = Some(size);
    }
    if let Some(size) = args.initial_size {
        config.initial_size_mb = Some(size);
    }
    if let Some(seconds) = args.alloc_interval {
        config.alloc_interval_seconds = Some(seconds);
    }
    if let Some(seconds) = args.print_interval {
        config.print_interval_seconds = Some(seconds);
    }
    if let Some(limit) = args.limit {
        config.limit_mb = Some(limit);
    }

    // Observer option string
    if let Some(options) = &args.options {
        apply_observer_options(&mut config, &parse_option_string(options));
    }

    // Pressure monitors
    if let Some(trigger) = &args.psi_medium_trigger {
        config.psi_medium_trigger = Some(trigger.clone());
    }
    if let Some(trigger) = &args.psi_critical_trigger {
        config.psi_critical_trigger = Some(trigger.clone());
    }
    if let Some(seconds) = args.psi_trig_timeout {
        config.psi_trig_timeout_seconds = Some(seconds);
    }
    if args.disable_cgroups_monitor {
        config.enable_cgroups_monitor = Some(false);
    }
    if args.disable_psi_trigger {
        config.enable_psi_trigger = Some(false);
    }

    Ok(config)
}

/// Enhanced configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/mempressure/config.yaml",
            "/etc/mempressure/config.yml",
            "/etc/mempressure/config.json",
            "./mempressure.yaml",
            "./mempressure.yml",
            "./mempressure.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Renders configuration in the requested format.
pub fn render_config(config: &Config, format: &ConfigFormat) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = render_config(config, &format)?;
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn test_parse_option_string() {
        let params = parse_option_string("showReclaimable=true,lowPassHalfLifeSeconds=10,broken,a=b=c");
        assert_eq!(params.len(), 2);
        assert_eq!(params["showReclaimable"], "true");
        assert_eq!(params["lowPassHalfLifeSeconds"], "10");
    }

    #[test]
    fn test_parse_empty_option_string() {
        assert!(parse_option_string("").is_empty());
    }

    #[test]
    fn test_apply_observer_options() {
        let mut config = Config::default();
        let params = parse_option_string(
            "showReclaimable=true,showInactive=yes,averageOnlyCurrent=true,lowPassHalfLifeSeconds=12.5,psiAvgMetric=avg60",
        );
        apply_observer_options(&mut config, &params);

        let options = config.observer_options();
        assert!(options.show_reclaimable);
        assert!(!options.show_inactive);
        assert!(options.average_only_current);
        assert_eq!(options.low_pass_half_life_seconds, 12.5);
        assert_eq!(options.psi_avg_metric, "avg60");
    }

    #[test]
    fn test_short_psi_metric_ignored() {
        let mut config = Config::default();
        apply_observer_options(&mut config, &parse_option_string("psiAvgMetric=a"));
        assert_eq!(config.observer_options().psi_avg_metric, "avg10");
    }

    #[test]
    fn test_malformed_half_life_keeps_default() {
        let mut config = Config::default();
        apply_observer_options(&mut config, &parse_option_string("lowPassHalfLifeSeconds=soon"));
        assert_eq!(config.observer_options().low_pass_half_life_seconds, 30.0);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_effective_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = Config {
            print_interval_seconds: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());

        let config = Config {
            low_pass_half_life_seconds: Some(-1.0),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());

        let config = Config {
            psi_medium_trigger: Some("some 2000000 1000000".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());

        // Trigger strings are not checked when the monitor is disabled
        let config = Config {
            psi_medium_trigger: Some("bogus".into()),
            enable_psi_trigger: Some(false),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_ok());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("mempressure.yaml");
        fs::write(
            &path,
            "block_size_mb: 64\nprint-interval: 2\nshowInactive: true\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "mempressure",
            "-c",
            path.to_str().unwrap(),
            "--block-size",
            "16",
            "--options",
            "showReclaimable=true",
            "--disable-psi-trigger",
        ]);
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.block_size_mb, Some(16));
        assert_eq!(config.print_interval_seconds, Some(2));
        assert_eq!(config.show_inactive, Some(true));
        assert_eq!(config.show_reclaimable, Some(true));
        assert_eq!(config.enable_psi_trigger, Some(false));
        // Fields absent from the file fall back to the built-in defaults
        assert_eq!(config.allocator_options().period, Duration::from_secs(1));
    }

    #[test]
    fn test_reject_unaddressable_block_sizes() {
        let config = Config {
            block_size_mb: Some(1 << 44),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());

        let config = Config {
            initial_size_mb: Some(MAX_BLOCK_SIZE_MB + 1),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_err());

        let config = Config {
            block_size_mb: Some(MAX_BLOCK_SIZE_MB),
            ..Config::default()
        };
        assert!(validate_effective_config(&config).is_ok());
    }

    #[test]
    fn test_log_level_is_not_a_config_key() {
        let rendered = render_config(&Config::default(), &ConfigFormat::Yaml).unwrap();
        assert!(!rendered.contains("log_level"));

        // Files written for older versions still load
        let config: Config = serde_yaml::from_str("log_level: debug\nlimit_mb: 64\n").unwrap();
        assert_eq!(config.limit_mb, Some(64));
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("mempressure.json");
        fs::write(&path, r#"{"limit_mb": 512, "psi_trig_timeout_seconds": 3}"#).unwrap();

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.allocator_options().limit_mb, 512);
        assert_eq!(config.psi_trigger_options().timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_render_roundtrips_yaml() {
        let rendered = render_config(&Config::default(), &ConfigFormat::Yaml).unwrap();
        let parsed: Config = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed.print_interval_seconds, Some(DEFAULT_PRINT_INTERVAL_SECONDS));
    }
}
