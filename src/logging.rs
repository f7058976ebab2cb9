use crate::config::DiagnosticsSettings;
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup diagnostics logging for the crate itself.
///
/// Diagnostics go to a daily rotating file in `settings.dir`, written through a
/// non-blocking worker. `RUST_LOG` overrides the level chosen by `settings.debug`.
/// This is separate from the engine the [`LogManager`](crate::LogManager)
/// reconfigures: it reports on that engine and is never reconfigured by it.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_diagnostics(
    settings: &DiagnosticsSettings,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    ensure_dir(&settings.dir)?;

    // Create daily rotating file appender
    let file_appender = rolling::daily(&settings.dir, &settings.prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if settings.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_thread_names(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = settings.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install diagnostics subscriber")?;

    tracing::info!(
        "Diagnostics initialized: dir={}, prefix={}, debug={}, console={}, json={}",
        settings.dir,
        settings.prefix,
        settings.debug,
        settings.console,
        settings.json
    );

    Ok(guard)
}

fn ensure_dir(dir: &Utf8Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_setup_diagnostics_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().join("diag")).unwrap();
        let settings = DiagnosticsSettings {
            dir: dir.clone(),
            console: false,
            ..DiagnosticsSettings::default()
        };

        // Installing the global subscriber fails if another test got there first,
        // but the directory is created before that point either way.
        let _result = setup_diagnostics(&settings);
        assert!(dir.exists());
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().join("a/b")).unwrap();
        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
