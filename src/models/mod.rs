//! Data models shared by the registries, the engine and the coordinator.
//!
//! - [`Level`] / [`LevelSetting`]: severity thresholds and the "reset to default" marker
//! - [`WriterDescriptor`] / [`WriterSpec`]: resolved and submitted output destinations
//! - [`DeclarativeConfig`]: one unit of runtime-submitted category configuration
//! - [`Origin`]: provenance tag for sink-to-category attachments
//! - [`EngineModel`]: the complete output of a primary-source rebuild
//! - [`ValidationError`]: synchronous rejection of submitted configuration
//!
//! # Architecture Note
//!
//! Every model is a plain value. Registries hand out clones, never references into
//! their locked state, so a snapshot taken by the reload worker stays consistent
//! while other threads keep submitting changes.

pub mod declarative;
pub mod engine_model;
pub mod level;
pub mod origin;
pub mod writer;

pub use declarative::DeclarativeConfig;
pub use engine_model::{CategoryModel, EngineModel, SinkModel};
pub use level::{Level, LevelSetting};
pub use origin::Origin;
pub use writer::{
    CONSOLE, DEFAULT_ROTATION_COUNT, RotationSpec, WriterDescriptor, WriterSpec,
};

use thiserror::Error;

/// Name of the root category. Every other category inherits from it.
pub const ROOT_CATEGORY: &str = "root";

/// Configuration submitted by a caller was rejected before anything changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("configuration {identity} declares no categories")]
    EmptyCategorySet { identity: String },

    #[error("category {category} is already owned by configuration {owner}")]
    CategoryConflict { category: String, owner: String },

    #[error("destination {path} is already used by writer {owner}")]
    DuplicateDestination { path: String, owner: String },

    #[error("invalid level token: {0}")]
    InvalidLevel(String),

    #[error("destination {0} is reserved and cannot be configured")]
    ReservedDestination(String),

    #[error("writer {identity} does not name a destination file")]
    MissingDestination { identity: String },
}

/// Normalize a category name for lookups.
///
/// Category names are case-sensitive except for the root, which accepts any casing.
pub fn normalize_category(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case(ROOT_CATEGORY) {
        ROOT_CATEGORY.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_case_insensitive() {
        assert_eq!(normalize_category("ROOT"), "root");
        assert_eq!(normalize_category(" Root "), "root");
        assert_eq!(normalize_category("svc.Db"), "svc.Db");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::CategoryConflict {
            category: "svc.x".to_string(),
            owner: "A".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "category svc.x is already owned by configuration A"
        );
    }
}
