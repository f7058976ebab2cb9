use crate::models::{
    CONSOLE, DEFAULT_ROTATION_COUNT, RotationSpec, ValidationError, WriterDescriptor, WriterSpec,
};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct WriterIndex {
    by_identity: IndexMap<String, WriterDescriptor>,
    /// Resolved absolute path -> owning identity
    by_path: HashMap<Utf8PathBuf, String>,
}

/// Maps writer configuration identities to resolved output destinations.
///
/// Destinations are keyed by resolved absolute path, so `logs/app.log` and
/// `./logs/../logs/app.log` are the same destination and only one identity may
/// own it. [`CONSOLE`] is reserved: it always resolves and is never stored.
pub struct WriterRegistry {
    log_dir: Utf8PathBuf,
    default_identity: String,
    inner: RwLock<WriterIndex>,
}

impl WriterRegistry {
    /// Create a registry resolving relative file names against `log_dir`.
    ///
    /// `default_identity` names the writer whose rotation settings implicit
    /// descriptors inherit.
    pub fn new(log_dir: impl AsRef<Utf8Path>, default_identity: impl Into<String>) -> Self {
        Self {
            log_dir: absolutize(log_dir.as_ref()),
            default_identity: default_identity.into(),
            inner: RwLock::new(WriterIndex::default()),
        }
    }

    pub fn log_dir(&self) -> &Utf8Path {
        &self.log_dir
    }

    pub fn default_identity(&self) -> &str {
        &self.default_identity
    }

    /// Resolve a file name to the absolute path it will be written to.
    pub fn resolve_path(&self, file: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(file.trim());
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.log_dir.join(path))
        }
    }

    /// Build a descriptor from a spec without storing it.
    ///
    /// Used for sinks declared by configuration documents, which are owned by the
    /// engine model rather than by this registry. Unlike [`upsert`](Self::upsert),
    /// a [`CONSOLE`] destination is accepted here.
    pub fn describe(&self, identity: &str, spec: &WriterSpec) -> Result<WriterDescriptor, ValidationError> {
        let file = spec
            .file
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ValidationError::MissingDestination {
                identity: identity.to_string(),
            })?;

        if file.eq_ignore_ascii_case(CONSOLE) {
            return Ok(WriterDescriptor {
                identity: identity.to_string(),
                ..WriterDescriptor::console()
            });
        }

        Ok(WriterDescriptor {
            identity: identity.to_string(),
            name: file.to_string(),
            path: Some(self.resolve_path(file)),
            rotation_count: parse_count(identity, spec.count.as_deref()),
            rotation: parse_rotation(identity, spec.rotation.as_deref()),
            buffered: spec.buffered.unwrap_or(false),
            implicit: false,
        })
    }

    /// Add or replace the writer owned by `identity`.
    ///
    /// Fails with [`ValidationError::DuplicateDestination`] if a different identity
    /// already owns the resolved path. Replacing an identity's writer with a new
    /// path releases the old one.
    pub fn upsert(&self, identity: &str, spec: &WriterSpec) -> Result<WriterDescriptor, ValidationError> {
        if spec
            .file
            .as_deref()
            .is_some_and(|f| f.trim().eq_ignore_ascii_case(CONSOLE))
        {
            return Err(ValidationError::ReservedDestination(CONSOLE.to_string()));
        }
        let descriptor = self.describe(identity, spec)?;
        let Some(path) = descriptor.path.clone() else {
            return Err(ValidationError::ReservedDestination(CONSOLE.to_string()));
        };

        let mut index = self.inner.write();
        if let Some(owner) = index.by_path.get(&path) {
            if owner != identity {
                return Err(ValidationError::DuplicateDestination {
                    path: path.to_string(),
                    owner: owner.clone(),
                });
            }
        }

        if let Some(previous) = index.by_identity.get(identity) {
            if let Some(old_path) = previous.path.clone() {
                index.by_path.remove(&old_path);
            }
        }
        index.by_path.insert(path, identity.to_string());
        index
            .by_identity
            .insert(identity.to_string(), descriptor.clone());

        tracing::debug!(
            identity,
            destination = %descriptor.name,
            rotation = ?descriptor.rotation,
            count = descriptor.rotation_count,
            "Writer configured"
        );
        Ok(descriptor)
    }

    /// Remove the writer owned by `identity`. Unknown identities are ignored.
    pub fn remove(&self, identity: &str) -> Option<WriterDescriptor> {
        let mut index = self.inner.write();
        let removed = index.by_identity.shift_remove(identity)?;
        if let Some(path) = &removed.path {
            index.by_path.remove(path);
        }
        tracing::debug!(identity, "Writer removed");
        Some(removed)
    }

    /// Look up the descriptor for a destination name.
    ///
    /// Unknown file names yield an implicit descriptor that inherits rotation from
    /// the default identity's writer, so categories may reference a destination
    /// before anyone configures it.
    pub fn resolve(&self, name: &str) -> WriterDescriptor {
        let name = name.trim();
        if name.eq_ignore_ascii_case(CONSOLE) || name.is_empty() {
            return WriterDescriptor::console();
        }

        let path = self.resolve_path(name);
        let index = self.inner.read();
        if let Some(descriptor) = index
            .by_path
            .get(&path)
            .and_then(|identity| index.by_identity.get(identity))
        {
            return descriptor.clone();
        }

        let (rotation_count, rotation, buffered) = index
            .by_identity
            .get(&self.default_identity)
            .map(|d| (d.rotation_count, d.rotation, d.buffered))
            .unwrap_or((DEFAULT_ROTATION_COUNT, RotationSpec::default(), false));

        WriterDescriptor {
            identity: format!("implicit:{name}"),
            name: name.to_string(),
            path: Some(path),
            rotation_count,
            rotation,
            buffered,
            implicit: true,
        }
    }

    pub fn by_identity(&self, identity: &str) -> Option<WriterDescriptor> {
        self.inner.read().by_identity.get(identity).cloned()
    }

    /// All explicitly configured writers, in configuration order
    pub fn all(&self) -> Vec<WriterDescriptor> {
        self.inner.read().by_identity.values().cloned().collect()
    }
}

fn parse_count(identity: &str, count: Option<&str>) -> usize {
    match count.map(str::trim) {
        None | Some("") => DEFAULT_ROTATION_COUNT,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::debug!(identity, count = raw, "Unparseable rotation count, using default");
            DEFAULT_ROTATION_COUNT
        }),
    }
}

fn parse_rotation(identity: &str, rotation: Option<&str>) -> RotationSpec {
    match rotation {
        None => RotationSpec::default(),
        Some(raw) => RotationSpec::parse(raw).unwrap_or_else(|| {
            tracing::debug!(identity, rotation = raw, "Unparseable rotation spec, using default");
            RotationSpec::default()
        }),
    }
}

fn absolutize(path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir()
        .ok()
        .and_then(|cwd| Utf8PathBuf::try_from(cwd).ok())
    {
        Some(cwd) => normalize(&cwd.join(path)),
        None => normalize(path),
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_str()),
        }
    }
    out
}
