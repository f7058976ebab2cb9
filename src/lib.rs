// logcoord - Live logging reconfiguration coordinator
//
// This is the library crate containing the coordination engine, registries and
// the default collaborators. The binary crate (main.rs) is a small demonstration
// driver around LogManager.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod state;
pub mod trackers;

// Re-export commonly used types for convenience
pub use config::{ConfigSource, Settings, YamlConfigSource};
pub use coordinator::{ReloadCoordinator, ReloadOutcome};
pub use engine::{LogRecord, LoggerContext, Sink, SinkRef};
pub use manager::{LogManager, LogManagerBuilder};
pub use models::{DeclarativeConfig, Level, LevelSetting, Origin, ValidationError, WriterSpec};
pub use state::{StatusEvent, StatusLog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
