//! Process settings and the primary configuration source.
//!
//! [`Settings`] controls how a [`LogManager`](crate::LogManager) is wired: where
//! the primary configuration lives, where relative log files go, what the default
//! writer is. [`source`] holds the [`ConfigSource`] seam the coordinator rebuilds
//! the engine through, plus the YAML implementation.

pub mod source;

pub use source::{
    ConfigSource, FragmentDocument, PRIMARY_ROOT, FRAGMENT_ROOT, Rebuilt, SourceError,
    SourceWarning, YamlConfigSource,
};

use crate::models::{CONSOLE, DEFAULT_ROTATION_COUNT, Level};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// Prefix for environment overrides, e.g. `LOGCOORD_ROOT_LEVEL=DEBUG` or
/// `LOGCOORD_DIAGNOSTICS__DEBUG=true`.
pub const ENV_PREFIX: &str = "LOGCOORD";

/// Settings for the crate's own diagnostics output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    /// Directory for the diagnostics log file
    pub dir: Utf8PathBuf,
    /// File name prefix of the diagnostics log
    pub prefix: String,
    pub debug: bool,
    /// Also print diagnostics to the terminal
    pub console: bool,
    /// Write the diagnostics file as JSON lines
    pub json: bool,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from("logs"),
            prefix: "logcoord".to_string(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

/// Manager settings, layered from defaults, an optional YAML file and
/// `LOGCOORD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Primary configuration document. Without one the engine starts from an
    /// empty model at `root_level`.
    pub primary_config: Option<Utf8PathBuf>,

    /// Directory relative writer file names resolve against
    pub log_dir: Utf8PathBuf,

    /// Destination the root category writes to when no other configuration
    /// claims it: [`CONSOLE`], a file name, or `None` for no default writer.
    pub default_writer: Option<String>,

    /// Rotation count for the default writer and for implicit writers
    pub default_rotation_count: usize,

    /// Rotation spec for the default writer and for implicit writers
    pub default_rotation: String,

    pub root_level: Level,

    /// Keep a console sink on the root category while a reload runs
    pub safety_sink: bool,

    /// How many status events to retain
    pub status_capacity: usize,

    pub diagnostics: DiagnosticsSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_config: None,
            log_dir: Utf8PathBuf::from("logs"),
            default_writer: Some(CONSOLE.to_string()),
            default_rotation_count: DEFAULT_ROTATION_COUNT,
            default_rotation: "daily".to_string(),
            root_level: Level::Info,
            safety_sink: true,
            status_capacity: 256,
            diagnostics: DiagnosticsSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply for every key it would
    /// have set.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if path.exists() {
                tracing::info!("Loading settings from {}", path);
            } else {
                tracing::warn!("Settings file not found at {}, using defaults", path);
            }
            builder = builder.add_source(
                config::File::new(path.as_str(), config::FileFormat::Yaml).required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .context("Failed to assemble settings sources")?
            .try_deserialize::<Settings>()
            .context("Failed to deserialize settings")?;

        Ok(settings)
    }

    /// Write these settings as YAML.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent))?;
        }

        let yaml_string =
            serde_yaml_ng::to_string(self).context("Failed to serialize settings to YAML")?;

        fs::write(path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", path))?;

        tracing::info!("Saved settings to {}", path);
        Ok(())
    }

    /// Settings for embedding in tests: no default writer, no safety sink.
    pub fn minimal(log_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            default_writer: None,
            safety_sink: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_path(temp_dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::default();
        assert_eq!(settings.root_level, Level::Info);
        assert_eq!(settings.default_writer.as_deref(), Some(CONSOLE));
        assert!(settings.safety_sink);
        assert_eq!(settings.status_capacity, 256);
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_path(&temp_dir, "logcoord.yaml");
        fs::write(
            &path,
            "root_level: DEBUG\nlog_dir: /srv/logs\ndiagnostics:\n  debug: true\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.root_level, Level::Debug);
        assert_eq!(settings.log_dir, Utf8PathBuf::from("/srv/logs"));
        assert!(settings.diagnostics.debug);
        assert_eq!(settings.diagnostics.prefix, "logcoord");
        assert_eq!(settings.default_rotation_count, DEFAULT_ROTATION_COUNT);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_path(&temp_dir, "absent.yaml");
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.log_dir, Utf8PathBuf::from("logs"));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_path(&temp_dir, "nested/settings.yaml");

        let settings = Settings {
            default_writer: Some("app.log".to_string()),
            safety_sink: false,
            ..Settings::default()
        };
        settings.save(&path).unwrap();

        let loaded = Settings::load(Some(&path)).unwrap();
        assert_eq!(loaded.default_writer.as_deref(), Some("app.log"));
        assert!(!loaded.safety_sink);
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_path(&temp_dir, "bad.yaml");
        fs::write(&path, "root_level: LOUD\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
