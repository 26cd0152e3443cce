mod cli;
mod error;
mod filter;
mod output;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use cli::ColorMode;
use fanwatch_driver::{ChangeEvent, DriverResult, Listener, ListenerConfig, DRIVER_VERSION};
use filter::ExcludeFilter;
use log::info;
use output::Printer;
use std::io::{self, Write};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

fn main() -> Result<()> {
    // ========================================================================
    // Initialize Logging
    // ========================================================================

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ========================================================================
    // Parse Command-Line Arguments
    // ========================================================================

    let args = cli::parse_args();
    args.validate()?;

    let use_colors = match args.color {
        ColorMode::Auto => atty::is(atty::Stream::Stdout),
        ColorMode::Always => true,
        ColorMode::Never => false,
    };

    info!("fanwatch v{} (driver v{})", env!("CARGO_PKG_VERSION"), DRIVER_VERSION);

    // ========================================================================
    // Start Listener & Shutdown Handler
    // ========================================================================

    let config = ListenerConfig {
        root: args
            .root
            .canonicalize()
            .with_context(|| format!("Couldn't resolve {}", args.root.display()))?,
        queue_capacity: args.queue,
        ..ListenerConfig::default()
    };
    let listener = Arc::new(Listener::new(config));

    let shutdown = listener.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Shutting down...");
        shutdown.stop();
    })
    .context("Error setting Ctrl-C handler")?;

    let (tx, rx) = sync_channel(listener.config().queue_capacity);
    let worker = spawn_listener(Arc::clone(&listener), ExcludeFilter::from_args(&args), tx)?;

    // ========================================================================
    // Print Changes Until The Listener Stops
    // ========================================================================

    let printer = Printer::new(args.format, use_colors);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for event in rx {
        if args.quiet {
            continue;
        }
        writeln!(out, "{}", printer.render(&event, Local::now())?)?;
        out.flush()?;
    }

    let outcome = worker
        .join()
        .map_err(|_| anyhow!("Listener thread panicked"))?;

    let stats = listener.status().stats;
    info!(
        "Stopped: {} records, {} delivered, {} dropped, {} failures, {} overflows",
        stats.records, stats.delivered, stats.dropped, stats.failures, stats.overflows
    );

    outcome.context("Listening for filesystem changes failed")
}

#[cfg(target_os = "linux")]
fn spawn_listener(
    listener: Arc<Listener>,
    filter: ExcludeFilter,
    tx: SyncSender<ChangeEvent>,
) -> Result<JoinHandle<DriverResult<()>>> {
    let handle = thread::Builder::new()
        .name("fanwatch-listener".to_string())
        .spawn(move || listener.listen(&filter, &tx))?;
    Ok(handle)
}

#[cfg(not(target_os = "linux"))]
fn spawn_listener(
    _listener: Arc<Listener>,
    _filter: ExcludeFilter,
    _tx: SyncSender<ChangeEvent>,
) -> Result<JoinHandle<DriverResult<()>>> {
    anyhow::bail!("fanwatch requires the Linux fanotify API")
}
