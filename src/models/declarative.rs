use super::{LevelSetting, normalize_category};
use std::collections::BTreeSet;

/// Category configuration submitted at runtime under a configuration identity.
///
/// Each category may be owned by at most one `DeclarativeConfig` at a time; the
/// [`DeclarativeConfigStore`](crate::registry::DeclarativeConfigStore) enforces that.
/// At reload completion the config is merged into the live engine: its categories
/// get the level/additivity below and are attached to the sink named by `writer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarativeConfig {
    pub identity: String,
    pub categories: BTreeSet<String>,
    pub level: LevelSetting,
    /// Writer reference: [`CONSOLE`](super::CONSOLE) or a destination file name
    pub writer: String,
    /// Line pattern for a writer synthesized from this config
    pub pattern: Option<String>,
    pub additive: bool,
}

impl DeclarativeConfig {
    pub fn new<I, S>(
        identity: impl Into<String>,
        categories: I,
        level: impl Into<LevelSetting>,
        writer: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            identity: identity.into(),
            categories: categories
                .into_iter()
                .map(|c| normalize_category(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
            level: level.into(),
            writer: writer.into(),
            pattern: None,
            additive: true,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_additive(mut self, additive: bool) -> Self {
        self.additive = additive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;

    #[test]
    fn test_new_normalizes_categories() {
        let config = DeclarativeConfig::new("A", ["ROOT", " svc.db ", ""], Level::Info, "CONSOLE");
        let expected: BTreeSet<String> = ["root", "svc.db"].iter().map(|s| s.to_string()).collect();
        assert_eq!(config.categories, expected);
        assert!(config.additive);
        assert_eq!(config.pattern, None);
    }

    #[test]
    fn test_builders() {
        let config = DeclarativeConfig::new("A", ["svc"], LevelSetting::Default, "app.log")
            .with_pattern("%level %msg")
            .with_additive(false);
        assert_eq!(config.pattern.as_deref(), Some("%level %msg"));
        assert!(!config.additive);
        assert_eq!(config.level, LevelSetting::Default);
    }
}
