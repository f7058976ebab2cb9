use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Reserved destination name for standard output. Always resolvable, never stored.
pub const CONSOLE: &str = "CONSOLE";

/// Number of rotated files kept when a writer does not say otherwise.
pub const DEFAULT_ROTATION_COUNT: usize = 5;

static SIZE_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(kb|mb|gb|k|m|g|b)?$").expect("Invalid size spec regex")
});

/// When a file destination rolls over to a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationSpec {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
    /// Roll once the file grows past this many bytes
    Size(u64),
}

impl RotationSpec {
    /// Parse a rotation spec.
    ///
    /// Accepts the keywords `minutely`, `hourly`, `daily`, `never`, a size such as
    /// `10MB` or `512k`, or a date pattern such as `'.'yyyy-MM-dd-HH`. Date patterns
    /// roll at the finest field they contain. Returns `None` for anything else.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        match spec.to_ascii_lowercase().as_str() {
            "minutely" => return Some(RotationSpec::Minutely),
            "hourly" => return Some(RotationSpec::Hourly),
            "daily" => return Some(RotationSpec::Daily),
            "never" => return Some(RotationSpec::Never),
            _ => {}
        }

        if let Some(caps) = SIZE_SPEC.captures(spec) {
            let amount: u64 = caps[1].parse().ok()?;
            let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
                Some(unit) if unit.starts_with('k') => 1024,
                Some(unit) if unit.starts_with('m') => 1024 * 1024,
                Some(unit) if unit.starts_with('g') => 1024 * 1024 * 1024,
                _ => 1,
            };
            return amount.checked_mul(multiplier).map(RotationSpec::Size);
        }

        // Date patterns: `mm` is minutes, `HH` hours, `dd` days (case-sensitive, as in
        // SimpleDateFormat).
        if spec.contains("mm") {
            Some(RotationSpec::Minutely)
        } else if spec.contains("HH") {
            Some(RotationSpec::Hourly)
        } else if spec.contains("dd") {
            Some(RotationSpec::Daily)
        } else {
            None
        }
    }
}

/// Writer configuration as submitted by a caller.
///
/// Numeric fields are kept as text: submissions often come from untyped property
/// maps, and anything unparseable falls back to a default instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSpec {
    /// Destination file, relative to the log directory unless absolute
    pub file: Option<String>,
    /// Number of rotated files to keep
    pub count: Option<String>,
    /// Rotation spec, see [`RotationSpec::parse`]
    pub rotation: Option<String>,
    pub buffered: Option<bool>,
}

impl WriterSpec {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    pub fn with_count(mut self, count: impl Into<String>) -> Self {
        self.count = Some(count.into());
        self
    }

    pub fn with_rotation(mut self, rotation: impl Into<String>) -> Self {
        self.rotation = Some(rotation.into());
        self
    }

    pub fn with_buffered(mut self, buffered: bool) -> Self {
        self.buffered = Some(buffered);
        self
    }
}

/// A resolved output destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriterDescriptor {
    /// Configuration identity that owns this descriptor
    pub identity: String,
    /// Destination name as configured: [`CONSOLE`] or a file name
    pub name: String,
    /// Absolute file path; `None` for the console
    pub path: Option<Utf8PathBuf>,
    pub rotation_count: usize,
    pub rotation: RotationSpec,
    pub buffered: bool,
    /// Synthesized on lookup rather than configured explicitly
    pub implicit: bool,
}

impl WriterDescriptor {
    pub fn console() -> Self {
        Self {
            identity: CONSOLE.to_string(),
            name: CONSOLE.to_string(),
            path: None,
            rotation_count: 0,
            rotation: RotationSpec::Never,
            buffered: false,
            implicit: false,
        }
    }

    pub fn is_console(&self) -> bool {
        self.path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(RotationSpec::parse("daily"), Some(RotationSpec::Daily));
        assert_eq!(RotationSpec::parse(" Hourly "), Some(RotationSpec::Hourly));
        assert_eq!(RotationSpec::parse("never"), Some(RotationSpec::Never));
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(RotationSpec::parse("10MB"), Some(RotationSpec::Size(10 * 1024 * 1024)));
        assert_eq!(RotationSpec::parse("512k"), Some(RotationSpec::Size(512 * 1024)));
        assert_eq!(RotationSpec::parse("4096"), Some(RotationSpec::Size(4096)));
    }

    #[test]
    fn test_parse_date_patterns() {
        assert_eq!(RotationSpec::parse("'.'yyyy-MM-dd"), Some(RotationSpec::Daily));
        assert_eq!(RotationSpec::parse("'.'yyyy-MM-dd-HH"), Some(RotationSpec::Hourly));
        assert_eq!(
            RotationSpec::parse("'.'yyyy-MM-dd-HH-mm"),
            Some(RotationSpec::Minutely)
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(RotationSpec::parse(""), None);
        assert_eq!(RotationSpec::parse("sometimes"), None);
    }

    #[test]
    fn test_console_descriptor() {
        let console = WriterDescriptor::console();
        assert!(console.is_console());
        assert_eq!(console.name, CONSOLE);
    }
}
