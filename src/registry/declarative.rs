use crate::models::{DeclarativeConfig, ValidationError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct StoreInner {
    configs: IndexMap<String, DeclarativeConfig>,
    /// category -> owning identity
    owners: HashMap<String, String>,
}

/// Declarative configurations keyed by identity, with single ownership of
/// every category.
#[derive(Default)]
pub struct DeclarativeConfigStore {
    inner: RwLock<StoreInner>,
}

impl DeclarativeConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the configuration for `config.identity`.
    ///
    /// Validation happens before anything changes, so a rejected submission leaves
    /// every stored configuration untouched. Categories the identity owned before
    /// but no longer lists are released first, which lets one call both shrink and
    /// grow an identity's category set.
    pub fn upsert(&self, config: DeclarativeConfig) -> Result<(), ValidationError> {
        if config.categories.is_empty() {
            return Err(ValidationError::EmptyCategorySet {
                identity: config.identity,
            });
        }

        let mut inner = self.inner.write();
        for category in &config.categories {
            if let Some(owner) = inner.owners.get(category) {
                if owner != &config.identity {
                    return Err(ValidationError::CategoryConflict {
                        category: category.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }

        if let Some(previous) = inner.configs.get(&config.identity) {
            let released: Vec<String> = previous
                .categories
                .difference(&config.categories)
                .cloned()
                .collect();
            for category in released {
                inner.owners.remove(&category);
            }
        }

        for category in &config.categories {
            inner
                .owners
                .insert(category.clone(), config.identity.clone());
        }

        tracing::debug!(
            identity = %config.identity,
            categories = ?config.categories,
            level = %config.level,
            writer = %config.writer,
            "Declarative configuration stored"
        );
        inner.configs.insert(config.identity.clone(), config);
        Ok(())
    }

    /// Remove the configuration for `identity`, releasing its categories.
    /// Unknown identities are a no-op.
    pub fn remove(&self, identity: &str) -> Option<DeclarativeConfig> {
        let mut inner = self.inner.write();
        let removed = inner.configs.shift_remove(identity)?;
        for category in &removed.categories {
            inner.owners.remove(category);
        }
        tracing::debug!(identity, "Declarative configuration removed");
        Some(removed)
    }

    /// Snapshot of every configuration, in submission order
    pub fn all(&self) -> Vec<DeclarativeConfig> {
        self.inner.read().configs.values().cloned().collect()
    }

    pub fn get(&self, identity: &str) -> Option<DeclarativeConfig> {
        self.inner.read().configs.get(identity).cloned()
    }

    /// Identity owning `category`, if any
    pub fn owner_of(&self, category: &str) -> Option<String> {
        self.inner.read().owners.get(category).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().configs.is_empty()
    }
}
