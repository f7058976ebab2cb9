use crate::models::{
    CategoryModel, EngineModel, Level, Origin, ROOT_CATEGORY, SinkModel, WriterSpec,
    normalize_category,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::io;
use thiserror::Error;

/// Root key of a primary configuration document
pub const PRIMARY_ROOT: &str = "configuration";

/// Root key of a fragment document
pub const FRAGMENT_ROOT: &str = "fragment";

/// Errors that make a rebuild fail as a whole. The coordinator recovers from
/// every one of them by falling back.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("{origin} must have a single `{expected}` root element")]
    InvalidRoot { origin: String, expected: &'static str },

    #[error("category {category} references undeclared sink {sink}")]
    UnknownSink { category: String, sink: String },
}

/// Raw document supplied by a fragment provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDocument {
    pub provider: String,
    pub bytes: Vec<u8>,
}

impl FragmentDocument {
    pub fn new(provider: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            provider: provider.into(),
            bytes: bytes.into(),
        }
    }
}

/// Problem that did not stop the rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceWarning {
    FragmentSkipped { provider: String, reason: String },
    Message(String),
}

/// Successful rebuild output
#[derive(Debug, Clone, PartialEq)]
pub struct Rebuilt {
    pub model: EngineModel,
    pub warnings: Vec<SourceWarning>,
}

/// Produces the engine model from the primary configuration plus fragments.
///
/// Called only from the reload worker, one rebuild at a time. A panic inside
/// `rebuild` is caught by the coordinator and handled like an error.
pub trait ConfigSource: Send + Sync {
    fn rebuild(&self, fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError>;

    /// Short label for diagnostics
    fn describe(&self) -> String {
        "config source".to_string()
    }
}

#[derive(Debug, Clone)]
enum Primary {
    None,
    File(Utf8PathBuf),
    Inline(String),
}

/// YAML implementation of [`ConfigSource`].
///
/// ```yaml
/// configuration:
///   level: INFO
///   sinks:
///     app:
///       file: app.log
///       count: 3
///       rotation: hourly
///       pattern: "%d %level %logger %msg"
///   categories:
///     root:
///       sinks: [app]
///     svc.db:
///       level: DEBUG
///       additive: false
/// ```
///
/// Fragments use the same body under a `fragment` root. Their sinks are tagged
/// [`Origin::StaticFragment`]; a fragment may not redefine a sink or a category
/// level the primary document already set.
pub struct YamlConfigSource {
    primary: RwLock<Primary>,
    /// Root level when no document sets one
    default_level: Level,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DocumentBody {
    level: Option<Level>,
    sinks: IndexMap<String, SinkEntry>,
    categories: IndexMap<String, CategoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SinkEntry {
    file: String,
    #[serde(default)]
    count: Option<CountValue>,
    #[serde(default)]
    rotation: Option<String>,
    #[serde(default)]
    buffered: Option<bool>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(u64),
    Text(String),
}

impl CountValue {
    fn into_text(self) -> String {
        match self {
            CountValue::Number(n) => n.to_string(),
            CountValue::Text(s) => s,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CategoryEntry {
    level: Option<Level>,
    additive: Option<bool>,
    sinks: Vec<String>,
}

impl YamlConfigSource {
    /// No primary document: every rebuild starts from an empty model.
    pub fn empty(root_level: Level) -> Self {
        Self::with_primary(Primary::None).with_default_level(root_level)
    }

    /// Read the primary document from `path` on every rebuild.
    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Self::with_primary(Primary::File(path.into()))
    }

    /// Use an in-memory primary document.
    pub fn inline(document: impl Into<String>) -> Self {
        Self::with_primary(Primary::Inline(document.into()))
    }

    fn with_primary(primary: Primary) -> Self {
        Self {
            primary: RwLock::new(primary),
            default_level: Level::Info,
        }
    }

    pub fn with_default_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Swap the in-memory document. The next rebuild uses it.
    pub fn replace_inline(&self, document: impl Into<String>) {
        *self.primary.write() = Primary::Inline(document.into());
    }

    pub fn path(&self) -> Option<Utf8PathBuf> {
        match &*self.primary.read() {
            Primary::File(path) => Some(path.clone()),
            _ => None,
        }
    }

    fn load_primary(&self) -> Result<Option<(String, String)>, SourceError> {
        let primary = self.primary.read().clone();
        match primary {
            Primary::None => Ok(None),
            Primary::File(path) => {
                let text = read_document(&path)?;
                Ok(Some((path.to_string(), text)))
            }
            Primary::Inline(text) => Ok(Some(("inline configuration".to_string(), text))),
        }
    }
}

impl ConfigSource for YamlConfigSource {
    fn rebuild(&self, fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError> {
        let mut builder = ModelBuilder::new(self.default_level);

        if let Some((origin, text)) = self.load_primary()? {
            let body = parse_body(&origin, &text, PRIMARY_ROOT)?;
            builder.merge(body, Origin::Static);
        }

        for fragment in fragments {
            match parse_fragment(fragment) {
                Ok(body) => builder.merge(body, Origin::StaticFragment),
                Err(reason) => {
                    tracing::warn!(provider = %fragment.provider, reason = %reason, "Skipping fragment");
                    builder.warnings.push(SourceWarning::FragmentSkipped {
                        provider: fragment.provider.clone(),
                        reason,
                    });
                }
            }
        }

        builder.finish()
    }

    fn describe(&self) -> String {
        match &*self.primary.read() {
            Primary::None => "no primary configuration".to_string(),
            Primary::File(path) => format!("YAML file {}", path),
            Primary::Inline(_) => "inline YAML".to_string(),
        }
    }
}

fn read_document(path: &Utf8Path) -> Result<String, SourceError> {
    std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Check the single root key and deserialize the body below it.
fn parse_body(origin: &str, text: &str, root: &'static str) -> Result<DocumentBody, SourceError> {
    let parse_error = |e: serde_yaml_ng::Error| SourceError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    };

    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(text).map_err(parse_error)?;
    let invalid_root = || SourceError::InvalidRoot {
        origin: origin.to_string(),
        expected: root,
    };

    let serde_yaml_ng::Value::Mapping(mut mapping) = value else {
        return Err(invalid_root());
    };
    if mapping.len() != 1 {
        return Err(invalid_root());
    }
    let body = mapping.remove(root).ok_or_else(invalid_root)?;
    if body.is_null() {
        return Ok(DocumentBody::default());
    }
    serde_yaml_ng::from_value(body).map_err(parse_error)
}

fn parse_fragment(fragment: &FragmentDocument) -> Result<DocumentBody, String> {
    let text = std::str::from_utf8(&fragment.bytes)
        .map_err(|e| format!("document is not UTF-8: {e}"))?;
    if text.trim().is_empty() {
        return Err("document is empty".to_string());
    }
    parse_body(&fragment.provider, text, FRAGMENT_ROOT).map_err(|e| e.to_string())
}

struct ModelBuilder {
    model: EngineModel,
    /// category -> sink names, in declaration order
    references: IndexMap<String, Vec<String>>,
    warnings: Vec<SourceWarning>,
}

impl ModelBuilder {
    fn new(root_level: Level) -> Self {
        Self {
            model: EngineModel::empty(root_level),
            references: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(SourceWarning::Message(message));
    }

    fn merge(&mut self, body: DocumentBody, origin: Origin) {
        if let Some(level) = body.level {
            if origin == Origin::Static {
                self.model.root_level = level;
            } else {
                self.warn(format!("fragment may not set the root level ({level}), ignored"));
            }
        }

        for (name, entry) in body.sinks {
            if self.model.sink(&name).is_some() {
                self.warn(format!("sink {name} is already declared, keeping the first declaration"));
                continue;
            }
            let mut writer = WriterSpec::file(entry.file);
            writer.count = entry.count.map(CountValue::into_text);
            writer.rotation = entry.rotation;
            writer.buffered = entry.buffered;
            self.model.sinks.push(SinkModel {
                name,
                origin,
                writer,
                pattern: entry.pattern,
                categories: Default::default(),
            });
        }

        for (name, entry) in body.categories {
            let name = normalize_category(&name);
            if name == ROOT_CATEGORY {
                if let Some(level) = entry.level {
                    if origin == Origin::Static {
                        self.model.root_level = level;
                    } else {
                        self.warn(format!("fragment may not set the root level ({level}), ignored"));
                    }
                }
            } else if entry.level.is_some() || entry.additive.is_some() {
                let existing = self.model.categories.entry(name.clone()).or_default();
                if origin == Origin::Static || *existing == CategoryModel::default() {
                    existing.level = entry.level.or(existing.level);
                    existing.additive = entry.additive.or(existing.additive);
                } else {
                    tracing::debug!(category = %name, "Fragment category settings shadowed by primary");
                }
            }

            let references = self.references.entry(name).or_default();
            for sink in entry.sinks {
                if !references.contains(&sink) {
                    references.push(sink);
                }
            }
        }
    }

    fn finish(mut self) -> Result<Rebuilt, SourceError> {
        for (category, sinks) in &self.references {
            for sink_name in sinks {
                let Some(sink) = self.model.sinks.iter_mut().find(|s| &s.name == sink_name) else {
                    return Err(SourceError::UnknownSink {
                        category: category.clone(),
                        sink: sink_name.clone(),
                    });
                };
                sink.categories.insert(category.clone());
            }
        }

        tracing::debug!(
            root_level = %self.model.root_level,
            sinks = self.model.sinks.len(),
            categories = self.model.categories.len(),
            warnings = self.warnings.len(),
            "Engine model rebuilt"
        );
        Ok(Rebuilt {
            model: self.model,
            warnings: self.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRIMARY: &str = r#"
configuration:
  level: WARN
  sinks:
    console:
      file: CONSOLE
      pattern: "%level %msg"
    app:
      file: app.log
      count: 3
      rotation: hourly
  categories:
    root:
      sinks: [console]
    svc.db:
      level: DEBUG
      additive: false
      sinks: [app]
"#;

    #[test]
    fn test_rebuild_primary() {
        let source = YamlConfigSource::inline(PRIMARY);
        let rebuilt = source.rebuild(&[]).unwrap();
        let model = rebuilt.model;

        assert_eq!(model.root_level, Level::Warn);
        assert_eq!(model.sinks.len(), 2);
        let app = model.sink("app").unwrap();
        assert_eq!(app.origin, Origin::Static);
        assert_eq!(app.writer.count.as_deref(), Some("3"));
        assert_eq!(app.writer.rotation.as_deref(), Some("hourly"));
        assert!(app.categories.contains("svc.db"));
        assert!(model.sink("console").unwrap().categories.contains("root"));
        assert_eq!(
            model.categories["svc.db"],
            CategoryModel {
                level: Some(Level::Debug),
                additive: Some(false)
            }
        );
        assert!(rebuilt.warnings.is_empty());
    }

    #[test]
    fn test_fragment_sinks_are_tagged() {
        let source = YamlConfigSource::inline(PRIMARY);
        let fragment = FragmentDocument::new(
            "plugin-a",
            "fragment:\n  sinks:\n    audit:\n      file: audit.log\n  categories:\n    audit:\n      sinks: [audit]\n",
        );
        let model = source.rebuild(&[fragment]).unwrap().model;

        let audit = model.sink("audit").unwrap();
        assert_eq!(audit.origin, Origin::StaticFragment);
        assert!(audit.categories.contains("audit"));
    }

    #[test]
    fn test_empty_and_wrong_root_fragments_are_skipped() {
        let source = YamlConfigSource::inline(PRIMARY);
        let fragments = [
            FragmentDocument::new("empty", ""),
            FragmentDocument::new("wrong", "configuration:\n  level: TRACE\n"),
        ];
        let rebuilt = source.rebuild(&fragments).unwrap();

        assert_eq!(rebuilt.model.root_level, Level::Warn);
        let skipped: Vec<&str> = rebuilt
            .warnings
            .iter()
            .filter_map(|w| match w {
                SourceWarning::FragmentSkipped { provider, .. } => Some(provider.as_str()),
                SourceWarning::Message(_) => None,
            })
            .collect();
        assert_eq!(skipped, vec!["empty", "wrong"]);
    }

    #[test]
    fn test_fragment_cannot_redefine_sink() {
        let source = YamlConfigSource::inline(PRIMARY);
        let fragment = FragmentDocument::new("dup", "fragment:\n  sinks:\n    app:\n      file: other.log\n");
        let rebuilt = source.rebuild(&[fragment]).unwrap();

        assert_eq!(rebuilt.model.sink("app").unwrap().writer.file.as_deref(), Some("app.log"));
        assert_eq!(rebuilt.warnings.len(), 1);
    }

    #[test]
    fn test_invalid_root() {
        let source = YamlConfigSource::inline("loggers:\n  level: INFO\n");
        assert!(matches!(
            source.rebuild(&[]),
            Err(SourceError::InvalidRoot { expected: PRIMARY_ROOT, .. })
        ));
    }

    #[test]
    fn test_unknown_sink_reference() {
        let source = YamlConfigSource::inline("configuration:\n  categories:\n    svc:\n      sinks: [ghost]\n");
        assert!(matches!(
            source.rebuild(&[]),
            Err(SourceError::UnknownSink { ref sink, .. }) if sink == "ghost"
        ));
    }

    #[test]
    fn test_parse_error() {
        let source = YamlConfigSource::inline("configuration:\n  level: [unclosed\n");
        assert!(matches!(source.rebuild(&[]), Err(SourceError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("absent.yaml")).unwrap();
        let source = YamlConfigSource::file(path.clone());
        assert!(matches!(source.rebuild(&[]), Err(SourceError::Io { .. })));
    }

    #[test]
    fn test_empty_source_uses_root_level() {
        let source = YamlConfigSource::empty(Level::Error);
        let model = source.rebuild(&[]).unwrap().model;
        assert_eq!(model, EngineModel::empty(Level::Error));
    }

    #[test]
    fn test_replace_inline() {
        let source = YamlConfigSource::inline(PRIMARY);
        source.replace_inline("configuration:\n  level: TRACE\n");
        assert_eq!(source.rebuild(&[]).unwrap().model.root_level, Level::Trace);
    }
}
