//! Tracking of collaborator objects registered at runtime.
//!
//! The runtime's service directory tells a [`Tracker`] when a collaborator
//! appears, changes or goes away; the tracker never polls. One generic tracker
//! is instantiated per [`CollaboratorKind`]:
//!
//! - [`SinkKind`]: sinks attached to categories under [`Origin::Dynamic`](crate::models::Origin::Dynamic)
//! - [`FilterKind`]: filters attached to named sinks
//! - [`HeaderKind`]: header processors attached to named sinks
//! - [`FragmentKind`]: fragment document providers, which attach nothing
//!
//! Attachment is best effort against the sinks that exist right now. Every
//! reload re-runs it through [`Tracker::reconcile`] once the new sinks exist.

pub mod kinds;

pub use kinds::{FilterKind, FragmentKind, FragmentProvider, HeaderKind, SinkKind};

use crate::coordinator::ResetListener;
use crate::engine::{LoggerContext, SinkRef};
use crate::registry::AttachmentRegistry;
use crate::state::{StatusEvent, StatusLog};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Target meaning "every sink"
pub const APPLY_TO_ALL: &str = "*";

/// Adapter describing how one kind of collaborator is attached and detached.
pub trait CollaboratorKind: Send + Sync + 'static {
    type Object: ?Sized + Send + Sync + 'static;

    /// Label used in diagnostics and status events
    const NAME: &'static str;

    /// Targets used when a collaborator registers without any
    const DEFAULT_TARGETS: &'static [&'static str] = &[];

    /// Attach to whatever targets exist right now.
    fn attach(info: &CollaboratorInfo<Self::Object>, registry: &AttachmentRegistry) -> Attached;

    /// Undo an attachment on the sinks it reached. `reached` may hold sinks that
    /// are no longer attached anywhere.
    fn detach(
        info: &CollaboratorInfo<Self::Object>,
        reached: &[SinkRef],
        registry: &AttachmentRegistry,
    );

    fn start(_object: &Self::Object) {}

    fn stop(_object: &Self::Object) {}
}

/// Result of one [`CollaboratorKind::attach`] pass
#[derive(Debug, Default)]
pub struct Attached {
    /// Sinks the collaborator now sits on
    pub reached: Vec<SinkRef>,
    /// Targets that did not exist
    pub missing: Vec<String>,
}

/// A tracked collaborator and where it should be attached
pub struct CollaboratorInfo<T: ?Sized> {
    pub id: String,
    pub object: Arc<T>,
    /// Target names, never containing [`APPLY_TO_ALL`]
    pub targets: BTreeSet<String>,
    pub apply_to_all: bool,
}

// Manual Clone so T itself need not be Clone
impl<T: ?Sized> Clone for CollaboratorInfo<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            object: self.object.clone(),
            targets: self.targets.clone(),
            apply_to_all: self.apply_to_all,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for CollaboratorInfo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorInfo")
            .field("id", &self.id)
            .field("targets", &self.targets)
            .field("apply_to_all", &self.apply_to_all)
            .finish()
    }
}

impl<T: ?Sized> CollaboratorInfo<T> {
    pub fn new<I, S>(id: impl Into<String>, object: Arc<T>, targets: I, defaults: &[&str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut apply_to_all = false;
        let mut names = BTreeSet::new();
        for target in targets {
            let target = target.as_ref().trim();
            if target == APPLY_TO_ALL {
                apply_to_all = true;
            } else if !target.is_empty() {
                names.insert(target.to_string());
            }
        }
        if names.is_empty() && !apply_to_all {
            names.extend(defaults.iter().map(|d| d.to_string()));
        }

        Self {
            id: id.into(),
            object,
            targets: names,
            apply_to_all,
        }
    }
}

struct Tracked<T: ?Sized> {
    info: CollaboratorInfo<T>,
    reached: Vec<SinkRef>,
}

/// Tracks collaborators of one kind and keeps them attached.
///
/// Every mutation holds the write lock across its attach and detach calls, so a
/// withdrawal can never interleave with a re-attach of the same collaborator.
pub struct Tracker<K: CollaboratorKind> {
    name: String,
    tracked: RwLock<IndexMap<String, Tracked<K::Object>>>,
    registry: Arc<AttachmentRegistry>,
    context: Arc<LoggerContext>,
    status: Arc<StatusLog>,
    _kind: PhantomData<K>,
}

impl<K: CollaboratorKind> Tracker<K> {
    pub fn new(
        registry: Arc<AttachmentRegistry>,
        context: Arc<LoggerContext>,
        status: Arc<StatusLog>,
    ) -> Self {
        Self {
            name: format!("{} tracker", K::NAME),
            tracked: RwLock::new(IndexMap::new()),
            registry,
            context,
            status,
            _kind: PhantomData,
        }
    }

    /// A collaborator was registered. Re-registering a known id acts as
    /// [`changed`](Self::changed).
    pub fn appeared<I, S>(&self, id: &str, object: Arc<K::Object>, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.upsert(id, object, targets, "Collaborator appeared");
    }

    /// A collaborator's object or targets changed: detach, rebuild, re-attach.
    pub fn changed<I, S>(&self, id: &str, object: Arc<K::Object>, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.upsert(id, object, targets, "Collaborator changed");
    }

    fn upsert<I, S>(&self, id: &str, object: Arc<K::Object>, targets: I, message: &str)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let info = CollaboratorInfo::new(id, object, targets, K::DEFAULT_TARGETS);
        let mut tracked = self.tracked.write();

        match tracked.get(id) {
            Some(previous) => {
                K::detach(&previous.info, &previous.reached, &self.registry);
                if !Arc::ptr_eq(&previous.info.object, &info.object) {
                    K::stop(&previous.info.object);
                    K::start(&info.object);
                }
            }
            None => K::start(&info.object),
        }
        tracing::debug!(kind = K::NAME, id, targets = ?info.targets, all = info.apply_to_all, "{}", message);

        let attached = K::attach(&info, &self.registry);
        if !self.context.is_resetting() {
            self.report_missing(&info.id, attached.missing);
        }
        // A known id keeps its registration position.
        tracked.insert(
            id.to_string(),
            Tracked {
                info,
                reached: attached.reached,
            },
        );
    }

    /// A collaborator was withdrawn: detach, stop and forget it.
    pub fn disappeared(&self, id: &str) -> bool {
        let mut tracked = self.tracked.write();
        let Some(entry) = tracked.shift_remove(id) else {
            return false;
        };
        K::detach(&entry.info, &entry.reached, &self.registry);
        K::stop(&entry.info.object);
        tracing::debug!(kind = K::NAME, id, "Collaborator disappeared");
        true
    }

    /// Re-attach every tracked collaborator and report targets still missing.
    ///
    /// Runs at reload completion, when the sinks a collaborator can attach to
    /// are final, so missing targets are reported even though the reload has
    /// not yet been marked finished.
    pub fn reconcile(&self) {
        self.reattach_all(true);
    }

    /// Re-attach every tracked collaborator, e.g. after a new sink appeared.
    /// Missing targets are only reported outside a reload.
    pub fn refresh(&self) {
        self.reattach_all(!self.context.is_resetting());
    }

    fn reattach_all(&self, report: bool) {
        let mut tracked = self.tracked.write();
        for entry in tracked.values_mut() {
            let attached = K::attach(&entry.info, &self.registry);
            // Sinks dropped out of reach keep nothing of this collaborator.
            let stale: Vec<SinkRef> = entry
                .reached
                .drain(..)
                .filter(|old| !attached.reached.iter().any(|new| Arc::ptr_eq(old, new)))
                .collect();
            if !stale.is_empty() {
                K::detach(&entry.info, &stale, &self.registry);
            }
            entry.reached = attached.reached;
            if report {
                self.report_missing(&entry.info.id, attached.missing);
            }
        }
    }

    /// Snapshot of the tracked collaborators, in registration order
    pub fn infos(&self) -> Vec<CollaboratorInfo<K::Object>> {
        self.tracked
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<CollaboratorInfo<K::Object>> {
        self.tracked.read().get(id).map(|entry| entry.info.clone())
    }

    /// Names of the sinks a collaborator currently sits on
    pub fn reached(&self, id: &str) -> Vec<String> {
        self.tracked
            .read()
            .get(id)
            .map(|entry| entry.reached.iter().map(|sink| sink.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tracked.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.read().is_empty()
    }

    pub(crate) fn status(&self) -> &StatusLog {
        &self.status
    }

    fn report_missing(&self, id: &str, missing: Vec<String>) {
        for target in missing {
            tracing::warn!(kind = K::NAME, collaborator = id, target = %target, "Attachment target does not exist");
            self.status.record(StatusEvent::AttachmentTargetMissing {
                kind: K::NAME,
                collaborator: id.to_string(),
                target,
            });
        }
    }
}

impl<K: CollaboratorKind> ResetListener for Tracker<K> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_reset_complete(&self) {
        self.reconcile();
    }
}
