//! Line pattern compilation.
//!
//! The engine only needs a narrow contract from a pattern compiler: turn a pattern
//! string into a [`Formatter`] and report every keyword it could not resolve. A bad
//! keyword never fails the whole pattern; it compiles to [`Converter::Inert`], which
//! renders nothing, and shows up in [`CompiledPattern::errors`].

use super::LogRecord;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Pattern used when a sink does not configure one.
pub const DEFAULT_PATTERN: &str = "%d *%level* [%thread] %logger %msg";

static KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(%|[A-Za-z]+)").expect("Invalid keyword regex"));

/// Errors reported while compiling a pattern
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("unknown keyword %{keyword} at offset {offset}")]
    UnknownKeyword { keyword: String, offset: usize },
}

/// One piece of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Converter {
    Literal(String),
    Date,
    Level,
    Logger,
    Thread,
    Message,
    Newline,
    /// Placeholder for a keyword that failed to resolve
    Inert,
}

/// Renders records according to a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatter {
    converters: Vec<Converter>,
}

impl Formatter {
    pub fn new(converters: Vec<Converter>) -> Self {
        Self { converters }
    }

    pub fn converters(&self) -> &[Converter] {
        &self.converters
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let mut line = String::with_capacity(64 + record.message.len());
        for converter in &self.converters {
            match converter {
                Converter::Literal(text) => line.push_str(text),
                Converter::Date => {
                    line.push_str(&record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                }
                Converter::Level => line.push_str(record.level.as_str()),
                Converter::Logger => line.push_str(&record.category),
                Converter::Thread => line.push_str(&record.thread),
                Converter::Message => line.push_str(&record.message),
                Converter::Newline => line.push('\n'),
                Converter::Inert => {}
            }
        }
        line
    }
}

/// Output of [`PatternCompiler::compile`]
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub formatter: Formatter,
    pub errors: Vec<PatternError>,
}

/// Turns pattern strings into formatters.
pub trait PatternCompiler: Send + Sync {
    fn compile(&self, pattern: &str) -> CompiledPattern;
}

/// Default compiler: `%keyword` substitution against a keyword table.
///
/// Standard keywords: `%d`/`%date`, `%p`/`%level`, `%c`/`%logger`, `%t`/`%thread`,
/// `%m`/`%msg`/`%message`, `%n`. `%%` renders a literal percent sign.
#[derive(Debug, Clone)]
pub struct KeywordCompiler {
    keywords: HashMap<String, Converter>,
}

impl KeywordCompiler {
    pub fn new() -> Self {
        let mut keywords = HashMap::new();
        for (names, converter) in [
            (&["d", "date"][..], Converter::Date),
            (&["p", "le", "level"][..], Converter::Level),
            (&["c", "lo", "logger"][..], Converter::Logger),
            (&["t", "thread"][..], Converter::Thread),
            (&["m", "msg", "message"][..], Converter::Message),
            (&["n"][..], Converter::Newline),
        ] {
            for name in names {
                keywords.insert((*name).to_string(), converter.clone());
            }
        }
        Self { keywords }
    }

    /// Add or replace a keyword, e.g. to expose a literal tag.
    pub fn with_keyword(mut self, name: impl Into<String>, converter: Converter) -> Self {
        self.keywords.insert(name.into(), converter);
        self
    }
}

impl Default for KeywordCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternCompiler for KeywordCompiler {
    fn compile(&self, pattern: &str) -> CompiledPattern {
        let mut converters = Vec::new();
        let mut errors = Vec::new();
        let mut last = 0;

        for caps in KEYWORD.captures_iter(pattern) {
            let (Some(whole), Some(keyword)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                converters.push(Converter::Literal(pattern[last..whole.start()].to_string()));
            }
            last = whole.end();

            if keyword.as_str() == "%" {
                converters.push(Converter::Literal("%".to_string()));
                continue;
            }

            match self.keywords.get(keyword.as_str()) {
                Some(converter) => converters.push(converter.clone()),
                None => {
                    errors.push(PatternError::UnknownKeyword {
                        keyword: keyword.as_str().to_string(),
                        offset: whole.start(),
                    });
                    converters.push(Converter::Inert);
                }
            }
        }

        if last < pattern.len() {
            converters.push(Converter::Literal(pattern[last..].to_string()));
        }

        CompiledPattern {
            formatter: Formatter::new(converters),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;

    fn record() -> LogRecord {
        LogRecord::new("svc.db", Level::Warn, "disk almost full").with_thread("worker-1")
    }

    #[test]
    fn test_compile_standard_keywords() {
        let compiled = KeywordCompiler::new().compile("%level [%thread] %logger - %msg");
        assert!(compiled.errors.is_empty());
        assert_eq!(
            compiled.formatter.format(&record()),
            "WARN [worker-1] svc.db - disk almost full"
        );
    }

    #[test]
    fn test_unknown_keyword_degrades_to_inert() {
        let compiled = KeywordCompiler::new().compile("%level %bogus|%msg");
        assert_eq!(
            compiled.errors,
            vec![PatternError::UnknownKeyword {
                keyword: "bogus".to_string(),
                offset: 7,
            }]
        );
        assert_eq!(compiled.formatter.format(&record()), "WARN |disk almost full");
    }

    #[test]
    fn test_escaped_percent_and_trailing_text() {
        let compiled = KeywordCompiler::new().compile("100%% %p!");
        assert!(compiled.errors.is_empty());
        assert_eq!(compiled.formatter.format(&record()), "100% WARN!");
    }

    #[test]
    fn test_custom_keyword() {
        let compiler =
            KeywordCompiler::new().with_keyword("app", Converter::Literal("billing".to_string()));
        let compiled = compiler.compile("%app %m");
        assert_eq!(compiled.formatter.format(&record()), "billing disk almost full");
    }

    #[test]
    fn test_default_pattern_compiles_cleanly() {
        assert!(KeywordCompiler::new().compile(DEFAULT_PATTERN).errors.is_empty());
    }
}
