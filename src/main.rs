//! mempressure - version 0.1.0
//!
//! Memory pressure monitor with tracing logging.
//! This is the main entry point that wires observers, monitors and the
//! allocator together and runs the print loop.

mod cli;
mod commands;
mod config;
mod startup_checks;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter};

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_config};
use config::{resolve_config, show_config, validate_effective_config, Config};
use mempressure::monitors::psi_trigger::PSI_TRIGGER_PATH;
use mempressure::os::{CLK_TCK, PAGE_SIZE};
use mempressure::{
    wake_channel, Allocator, CgroupsMonitor, CgroupsPaths, FileReader, MeminfoObserver,
    ObserverError, PolledObserver, PressureMonitor, PsiObserver, PsiTriggerMonitor, Reader,
    SwapObserver, Tracker,
};

/// Initializes tracing logging subsystem with configured log level.
/// Logs go to stderr; stdout carries only the metric rows.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    debug!("Logging initialized with level: {:?}", args.log_level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Runs every polled observer once and merges the results.
///
/// A failing required observer aborts the cycle; optional ones only lose
/// their metrics for this cycle.
#[instrument(skip_all, level = "debug")]
fn run_observers(observers: &mut [PolledObserver], tracker: &Tracker) -> Result<(), ObserverError> {
    for observer in observers.iter_mut() {
        match observer.observe() {
            Ok(metrics) => tracker.merge_set(metrics),
            Err(e) if observer.is_required() => {
                error!("{} observer failed: {}", observer.name(), e);
                return Err(e);
            }
            Err(e) => debug!("{} observer skipped: {}", observer.name(), e),
        }
    }
    Ok(())
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Starts every enabled pressure monitor. Failures only disable the
/// affected monitor.
fn start_monitors(config: &Config, tracker: &Arc<Tracker>, wake: &mempressure::WakeSender) {
    let mut monitors = Vec::new();
    if config.enable_cgroups_monitor.unwrap_or(true) {
        monitors.push(PressureMonitor::Cgroups(CgroupsMonitor::new(
            &CgroupsPaths::default(),
            Arc::clone(tracker),
            wake.clone(),
        )));
    } else {
        debug!("cgroups monitor disabled in configuration");
    }
    if config.enable_psi_trigger.unwrap_or(true) {
        monitors.push(PressureMonitor::PsiTrigger(PsiTriggerMonitor::new(
            PSI_TRIGGER_PATH,
            &config.psi_trigger_options(),
            Arc::clone(tracker),
            wake.clone(),
        )));
    } else {
        debug!("PSI trigger monitor disabled in configuration");
    }

    for monitor in monitors {
        let name = monitor.name();
        match monitor.start() {
            Ok(handles) if !handles.is_empty() => {
                debug!("{} monitor started with {} thread(s)", name, handles.len())
            }
            Ok(_) => {}
            Err(e) => error!("{} monitor could not be started: {}", name, e),
        }
    }
}

/// Wires everything together and runs the print loop until shutdown.
async fn run(config: &Config) -> anyhow::Result<()> {
    startup_checks::validate_requirements().context("Startup validation failed")?;

    let tracker = Arc::new(Tracker::new());
    let reader: Arc<dyn Reader> = Arc::new(FileReader::new());
    let observer_options = config.observer_options();

    let mut observers = vec![
        PolledObserver::Meminfo(MeminfoObserver::new(
            Arc::clone(&reader),
            *PAGE_SIZE,
            &observer_options,
        )),
        PolledObserver::Swap(SwapObserver::new(
            Arc::clone(&reader),
            *PAGE_SIZE,
            *CLK_TCK,
            &observer_options,
        )),
        PolledObserver::Psi(PsiObserver::new(
            Arc::clone(&reader),
            &observer_options.psi_avg_metric,
        )),
    ];
    // First pass so the schema frozen by the header includes every observer
    run_observers(&mut observers, &tracker).context("Unsupported platform")?;

    let (wake, mut wake_rx) = wake_channel();
    start_monitors(config, &tracker, &wake);

    let allocator_options = config.allocator_options();
    if allocator_options.block_size_mb == 0 {
        info!("Working in a passive mode, will not allocate memory during the test");
    }
    if allocator_options.block_size_mb > 0 || allocator_options.initial_size_mb > 0 {
        let allocator = Allocator::new(Arc::clone(&tracker), *PAGE_SIZE);
        if allocator_options.block_size_mb > 0 {
            info!(
                "Will allocate {} MB every {:?}",
                allocator_options.block_size_mb, allocator_options.period
            );
        }
        allocator
            .spawn(&allocator_options)
            .context("Initial allocation failed")?;
    }

    println!("{}", tracker.snapshot().header());

    let mut ticker = interval(config.print_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
            Some(()) = wake_rx.recv() => {
                debug!("Woken by pressure change");
            }
        }

        run_observers(&mut observers, &tracker).context("Unsupported platform")?;
        tracker.save_time();
        println!("{}", tracker.snapshot().row());
    }

    Ok(())
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    // Before config resolution so its diagnostics are not lost
    setup_logging(&args);

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    if let Some(command) = &args.command {
        return match command {
            Commands::Check => {
                let config = resolve_config(&args)?;
                command_check(&config)
            }
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),
        };
    }

    let config = load_validated_config(&args)?;

    info!("Starting mempressure");

    if let Err(e) = run(&config).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }

    info!("mempressure stopped");
    Ok(())
}
