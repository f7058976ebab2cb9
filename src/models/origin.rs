use serde::{Deserialize, Serialize};
use std::fmt;

/// Who created a sink-to-category attachment.
///
/// Used as a partition key by the attachment registry so every attachment can be
/// reversed by the party that made it. Origins carry no priority of their own;
/// the only precedence rule (static sinks shadow declarative writers of the same
/// name) lives in the declarative merge step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Declared by the primary configuration document
    Static,
    /// Declared by a fragment document spliced into the primary configuration
    StaticFragment,
    /// Registered at runtime as a collaborator object
    Dynamic,
    /// Synthesized from declarative configuration at reload completion
    Declarative,
}

impl Origin {
    pub const ALL: [Origin; 4] = [
        Origin::Static,
        Origin::StaticFragment,
        Origin::Dynamic,
        Origin::Declarative,
    ];

    /// Stable slot index, used to address per-origin storage.
    pub fn index(&self) -> usize {
        match self {
            Origin::Static => 0,
            Origin::StaticFragment => 1,
            Origin::Dynamic => 2,
            Origin::Declarative => 3,
        }
    }

    /// Origins produced by parsing configuration documents.
    pub fn is_static(&self) -> bool {
        matches!(self, Origin::Static | Origin::StaticFragment)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::Static => "static",
            Origin::StaticFragment => "static-fragment",
            Origin::Dynamic => "dynamic",
            Origin::Declarative => "declarative",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_distinct() {
        let mut seen: Vec<usize> = Origin::ALL.iter().map(Origin::index).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_static_origins() {
        assert!(Origin::Static.is_static());
        assert!(Origin::StaticFragment.is_static());
        assert!(!Origin::Dynamic.is_static());
        assert!(!Origin::Declarative.is_static());
    }
}
