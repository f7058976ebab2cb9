use super::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity threshold of a category or a record.
///
/// Ordered from most to least verbose. `Off` only makes sense as a threshold:
/// no record is ever emitted at `Off`, so a category set to `Off` drops everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    /// Whether a record at `self` passes a category whose threshold is `threshold`.
    pub fn passes(&self, threshold: Level) -> bool {
        *self != Level::Off && *self >= threshold
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "ALL" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "OFF" => Ok(Level::Off),
            _ => Err(ValidationError::InvalidLevel(s.to_string())),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, ValidationError> {
        value.parse()
    }
}

/// Level carried by a declarative configuration.
///
/// `Default` does not set a level: it clears any explicit level and additivity
/// override so the category falls back to whatever it inherits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelSetting {
    Level(Level),
    Default,
}

impl LevelSetting {
    pub const DEFAULT_TOKEN: &'static str = "DEFAULT";

    pub fn level(&self) -> Option<Level> {
        match self {
            LevelSetting::Level(level) => Some(*level),
            LevelSetting::Default => None,
        }
    }
}

impl From<Level> for LevelSetting {
    fn from(level: Level) -> Self {
        LevelSetting::Level(level)
    }
}

impl FromStr for LevelSetting {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(Self::DEFAULT_TOKEN) {
            Ok(LevelSetting::Default)
        } else {
            s.parse().map(LevelSetting::Level)
        }
    }
}

impl fmt::Display for LevelSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSetting::Level(level) => level.fmt(f),
            LevelSetting::Default => f.write_str(Self::DEFAULT_TOKEN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!(" Warning ".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("ALL".parse::<Level>().unwrap(), Level::Trace);
        assert!(matches!(
            "loud".parse::<Level>(),
            Err(ValidationError::InvalidLevel(token)) if token == "loud"
        ));
    }

    #[test]
    fn test_passes_threshold() {
        assert!(Level::Warn.passes(Level::Info));
        assert!(Level::Info.passes(Level::Info));
        assert!(!Level::Debug.passes(Level::Info));
        assert!(!Level::Error.passes(Level::Off));
    }

    #[test]
    fn test_level_setting_default_token() {
        assert_eq!(
            "default".parse::<LevelSetting>().unwrap(),
            LevelSetting::Default
        );
        assert_eq!(
            "debug".parse::<LevelSetting>().unwrap(),
            LevelSetting::Level(Level::Debug)
        );
        assert_eq!(LevelSetting::Default.level(), None);
    }

    #[test]
    fn test_deserialize_level_case_insensitive() {
        let level: Level = serde_yaml_ng::from_str("debug").unwrap();
        assert_eq!(level, Level::Debug);
        assert!(serde_yaml_ng::from_str::<Level>("chatty").is_err());
    }

    #[test]
    fn test_try_from_string() {
        assert_eq!(Level::try_from("error".to_string()).unwrap(), Level::Error);
        assert!(matches!(
            Level::try_from(String::new()),
            Err(ValidationError::InvalidLevel(_))
        ));
    }
}
