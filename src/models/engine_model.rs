use super::{CONSOLE, Level, Origin, ROOT_CATEGORY, WriterSpec};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Level and additivity override for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryModel {
    pub level: Option<Level>,
    pub additive: Option<bool>,
}

/// A sink declared by a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkModel {
    pub name: String,
    /// [`Origin::Static`] or [`Origin::StaticFragment`]
    pub origin: Origin,
    pub writer: WriterSpec,
    pub pattern: Option<String>,
    /// Categories this sink is attached to
    pub categories: BTreeSet<String>,
}

impl SinkModel {
    pub fn console(name: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            origin,
            writer: WriterSpec::file(CONSOLE),
            pattern: None,
            categories: BTreeSet::new(),
        }
    }

    pub fn attached_to<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }
}

/// Engine state produced by one rebuild of the primary configuration.
///
/// This is what the coordinator applies to the live engine and what it keeps as
/// the safe model after a successful reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineModel {
    pub root_level: Level,
    pub categories: IndexMap<String, CategoryModel>,
    pub sinks: Vec<SinkModel>,
}

impl EngineModel {
    pub fn empty(root_level: Level) -> Self {
        Self {
            root_level,
            categories: IndexMap::new(),
            sinks: Vec::new(),
        }
    }

    /// Model used when a reload fails and no safe model exists yet: everything at
    /// `root_level` goes to the console.
    pub fn console_fallback(root_level: Level) -> Self {
        let mut model = Self::empty(root_level);
        model
            .sinks
            .push(SinkModel::console(CONSOLE, Origin::Static).attached_to([ROOT_CATEGORY]));
        model
    }

    pub fn sink(&self, name: &str) -> Option<&SinkModel> {
        self.sinks.iter().find(|s| s.name == name)
    }
}
