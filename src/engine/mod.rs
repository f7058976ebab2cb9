//! The live logging engine.
//!
//! [`LoggerContext`] holds the category tree (levels, additivity, attached sinks)
//! that records are routed through. There is no global instance: the
//! [`LogManager`](crate::LogManager) creates one and injects it into every
//! component, so independent managers can run side by side.
//!
//! Sink attach/detach is crate-private. Only the
//! [`AttachmentRegistry`](crate::registry::AttachmentRegistry) calls it, which is
//! what makes every attachment reversible.

pub mod pattern;
pub mod sink;

pub use pattern::{
    CompiledPattern, Converter, DEFAULT_PATTERN, Formatter, KeywordCompiler, PatternCompiler,
    PatternError,
};
pub use sink::{
    ConsoleWriter, FileWriter, FilterReply, HeaderProcessor, MemoryWriter, RecordWriter, Sink,
    SinkError, SinkFactory, SinkFilter, SinkRef,
};

use crate::models::{EngineModel, Level, ROOT_CATEGORY, normalize_category};
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One log event on its way to the sinks.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub category: String,
    pub level: Level,
    pub message: String,
    pub thread: String,
    pub timestamp: DateTime<Local>,
}

impl LogRecord {
    pub fn new(category: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        let current = std::thread::current();
        Self {
            category: category.into(),
            level,
            message: message.into(),
            thread: current.name().unwrap_or("unnamed").to_string(),
            timestamp: Local::now(),
        }
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }
}

#[derive(Default)]
struct CategoryState {
    level: Option<Level>,
    additive: Option<bool>,
    sinks: IndexMap<String, SinkRef>,
}

impl CategoryState {
    fn is_vacant(&self) -> bool {
        self.level.is_none() && self.additive.is_none() && self.sinks.is_empty()
    }
}

/// Read-only view of one category
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CategorySnapshot {
    pub level: Option<Level>,
    pub additive: Option<bool>,
    pub sinks: Vec<String>,
}

/// Read-only view of the whole category tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub root_level: Level,
    pub categories: BTreeMap<String, CategorySnapshot>,
}

impl EngineSnapshot {
    /// Sink names attached directly to `category`
    pub fn sinks_of(&self, category: &str) -> Vec<String> {
        self.categories
            .get(&normalize_category(category))
            .map(|c| c.sinks.clone())
            .unwrap_or_default()
    }
}

struct EngineState {
    root_level: Level,
    categories: BTreeMap<String, CategoryState>,
}

/// Explicitly passed logging context: the category tree plus the "reload in
/// progress" flag that collaborators consult before reporting missing targets.
pub struct LoggerContext {
    state: RwLock<EngineState>,
    resetting: AtomicBool,
}

impl LoggerContext {
    /// Create an empty context. It starts in the resetting state; the first
    /// completed reload clears it.
    pub fn new(root_level: Level) -> Self {
        Self {
            state: RwLock::new(EngineState {
                root_level,
                categories: BTreeMap::new(),
            }),
            resetting: AtomicBool::new(true),
        }
    }

    /// Whether a reload is currently rebuilding the engine
    pub fn is_resetting(&self) -> bool {
        self.resetting.load(Ordering::Acquire)
    }

    pub(crate) fn set_resetting(&self, resetting: bool) {
        self.resetting.store(resetting, Ordering::Release);
    }

    pub(crate) fn attach_sink(&self, category: &str, sink: SinkRef) {
        let category = normalize_category(category);
        let mut state = self.state.write();
        state
            .categories
            .entry(category)
            .or_default()
            .sinks
            .insert(sink.name().to_string(), sink);
    }

    pub(crate) fn detach_sink(&self, category: &str, sink_name: &str) -> Option<SinkRef> {
        let category = normalize_category(category);
        let mut state = self.state.write();
        let entry = state.categories.get_mut(&category)?;
        let removed = entry.sinks.shift_remove(sink_name);
        if entry.is_vacant() {
            state.categories.remove(&category);
        }
        removed
    }

    /// Set or clear an explicit level for a category
    pub fn set_level(&self, category: &str, level: Option<Level>) {
        let category = normalize_category(category);
        let mut state = self.state.write();
        // Root always keeps a level; clearing it leaves the one the last model applied.
        if category == ROOT_CATEGORY {
            if let Some(level) = level {
                state.root_level = level;
            }
            return;
        }
        let entry = state.categories.entry(category.clone()).or_default();
        entry.level = level;
        if entry.is_vacant() {
            state.categories.remove(&category);
        }
    }

    /// Set or clear an explicit additivity flag for a category
    pub fn set_additive(&self, category: &str, additive: Option<bool>) {
        let category = normalize_category(category);
        let mut state = self.state.write();
        let entry = state.categories.entry(category.clone()).or_default();
        entry.additive = additive;
        if entry.is_vacant() {
            state.categories.remove(&category);
        }
    }

    /// Replace every level and additivity override with the ones in `model`.
    ///
    /// Sink attachments are left alone; they are owned by the attachment registry.
    pub fn apply_levels(&self, model: &EngineModel) {
        let mut state = self.state.write();
        state.root_level = model.root_level;
        for category in state.categories.values_mut() {
            category.level = None;
            category.additive = None;
        }
        for (name, category) in &model.categories {
            let name = normalize_category(name);
            if name == ROOT_CATEGORY {
                if let Some(level) = category.level {
                    state.root_level = level;
                }
                continue;
            }
            let entry = state.categories.entry(name).or_default();
            entry.level = category.level;
            entry.additive = category.additive;
        }
        state.categories.retain(|_, c| !c.is_vacant());
    }

    /// The threshold that applies to `category`, inherited from the nearest
    /// ancestor with an explicit level.
    pub fn effective_level(&self, category: &str) -> Level {
        let state = self.state.read();
        for name in lineage(&normalize_category(category)) {
            if name == ROOT_CATEGORY {
                break;
            }
            if let Some(level) = state.categories.get(name).and_then(|c| c.level) {
                return level;
            }
        }
        state.root_level
    }

    pub fn is_enabled(&self, category: &str, level: Level) -> bool {
        level.passes(self.effective_level(category))
    }

    /// Route a record to the sinks of its category and, while additivity allows,
    /// its ancestors. Returns how many sinks accepted it.
    pub fn log(&self, record: &LogRecord) -> usize {
        if !self.is_enabled(&record.category, record.level) {
            return 0;
        }

        let targets: Vec<SinkRef> = {
            let state = self.state.read();
            let mut targets = Vec::new();
            for name in lineage(&normalize_category(&record.category)) {
                if let Some(category) = state.categories.get(name) {
                    targets.extend(category.sinks.values().cloned());
                    if category.additive == Some(false) {
                        break;
                    }
                }
            }
            targets
        };

        targets.iter().filter(|sink| sink.append(record)).count()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.read();
        EngineSnapshot {
            root_level: state.root_level,
            categories: state
                .categories
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        CategorySnapshot {
                            level: c.level,
                            additive: c.additive,
                            sinks: c.sinks.keys().cloned().collect(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Flush every attached sink
    pub fn flush(&self) {
        let sinks: Vec<SinkRef> = {
            let state = self.state.read();
            state
                .categories
                .values()
                .flat_map(|c| c.sinks.values().cloned())
                .collect()
        };
        for sink in sinks {
            sink.flush();
        }
    }
}

/// `a.b.c` -> `a.b.c`, `a.b`, `a`, `root`
fn lineage(category: &str) -> Vec<&str> {
    let mut names = Vec::new();
    if category != ROOT_CATEGORY && !category.is_empty() {
        let mut current = category;
        names.push(current);
        while let Some(idx) = current.rfind('.') {
            current = &current[..idx];
            names.push(current);
        }
    }
    names.push(ROOT_CATEGORY);
    names
}
