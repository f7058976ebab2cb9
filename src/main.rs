//! logcoord - demonstration driver for the reconfiguration coordinator
//!
//! # Overview
//!
//! This binary wires a [`LogManager`] from settings and exercises it the way a
//! modular runtime would:
//! - Diagnostics logging (file rotation + optional console output)
//! - Tokio runtime hosting a status event listener
//! - First reload of the primary configuration
//! - A declarative configuration submitted at runtime
//! - Sample records routed through the live engine
//! - Status and metrics summary on shutdown
//!
//! # Usage
//!
//! ```text
//! logcoord [SETTINGS.yaml]
//! ```
//!
//! Settings may also come from `LOGCOORD_*` environment variables, e.g.
//! `LOGCOORD_PRIMARY_CONFIG=logging.yaml LOGCOORD_ROOT_LEVEL=DEBUG logcoord`.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use logcoord::{APP_NAME, DeclarativeConfig, Level, LogManager, Settings, StatusEvent, VERSION};
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let settings_path = std::env::args().nth(1).map(Utf8PathBuf::from);
    let settings = Settings::load(settings_path.as_deref()).context("Failed to load settings")?;

    let _guard = logcoord::logging::setup_diagnostics(&settings.diagnostics)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Status events fan out over a broadcast channel; a small runtime drains them
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("logcoord-status")
        .build()
        .context("Failed to create tokio runtime")?;

    let manager = LogManager::new(settings).context("Invalid default writer settings")?;

    let mut events = manager.subscribe();
    let listener = runtime.spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_failure() => tracing::warn!(?event, "Status"),
                Ok(event) => tracing::info!(?event, "Status"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let outcome = manager.start().context("Failed to start reload coordination")?;
    tracing::info!(?outcome, "Initial configuration applied");

    // A runtime module asks for verbose output on its own category
    let module_config =
        DeclarativeConfig::new("demo.module", ["demo.module"], Level::Debug, "CONSOLE")
            .with_additive(false);
    if let Err(e) = manager.submit(module_config) {
        tracing::warn!("Declarative configuration rejected: {}", e);
    }
    if !manager.wait_idle(IDLE_TIMEOUT) {
        tracing::warn!("Reload did not settle within {:?}", IDLE_TIMEOUT);
    }

    let samples = [
        ("demo", Level::Info, "coordinator is up"),
        ("demo.module", Level::Debug, "module detail visible after declarative merge"),
        ("demo.other", Level::Debug, "suppressed at the root level"),
        ("demo", Level::Warn, "sample warning"),
    ];
    for (category, level, message) in samples {
        let written = manager.log(category, level, message);
        tracing::debug!(category, %level, written, "Sample record routed");
    }

    print_summary(&manager);

    manager.shutdown();
    drop(manager);

    // Dropping the manager closes the status channel and ends the listener
    runtime.block_on(async {
        match tokio::time::timeout(Duration::from_secs(2), listener).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Status listener ended abnormally: {}", e),
            Err(_) => tracing::warn!("Status listener did not stop in time"),
        }
    });
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_summary(manager: &LogManager) {
    let metrics = manager.metrics();
    println!("{} v{}", APP_NAME, VERSION);
    println!(
        "reloads: {}  failures: {}  notifications: {}  coalesced: {}",
        metrics.reloads, metrics.failures, metrics.notifications, metrics.coalesced
    );

    for (name, sink) in manager.sinks(None) {
        let origin = manager
            .sink_origin(&name)
            .map(|o| o.to_string())
            .unwrap_or_default();
        println!("sink {name} ({origin}) filters={:?}", sink.filter_ids());
    }

    match manager.status().last_reload() {
        Some(StatusEvent::ReloadFailed { error, fallback, .. }) => {
            println!("last reload failed ({fallback:?}): {error}");
        }
        Some(event) => println!("last reload: {event:?}"),
        None => println!("no reload recorded"),
    }
}
