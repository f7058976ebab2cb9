use crate::engine::{LoggerContext, SinkRef};
use crate::models::{Origin, ROOT_CATEGORY, normalize_category};
use crate::state::{StatusEvent, StatusLog};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A sink and the categories one origin attached it to
#[derive(Debug, Clone)]
pub struct AttachmentEntry {
    pub sink: SinkRef,
    pub categories: BTreeSet<String>,
}

type OriginRecord = IndexMap<String, AttachmentEntry>;

/// Records, per origin, which sink is attached to which categories.
///
/// This is the only component that attaches or detaches sinks on the
/// [`LoggerContext`]. Because every engine-level attachment goes through here
/// with its origin, clearing an origin undoes exactly what that origin did.
///
/// Each origin has its own lock and engine calls for that origin happen while it
/// is held, so two parties can never interleave attachments for the same origin.
pub struct AttachmentRegistry {
    context: Arc<LoggerContext>,
    status: Arc<StatusLog>,
    records: [Mutex<OriginRecord>; 4],
    safety: Mutex<Option<SinkRef>>,
}

impl AttachmentRegistry {
    pub fn new(context: Arc<LoggerContext>, status: Arc<StatusLog>) -> Self {
        Self {
            context,
            status,
            records: Default::default(),
            safety: Mutex::new(None),
        }
    }

    fn record(&self, origin: Origin) -> &Mutex<OriginRecord> {
        &self.records[origin.index()]
    }

    /// Attach `sink` to `categories` on behalf of `origin`.
    ///
    /// Any previous attachment of the same sink name by the same origin is undone
    /// first, so re-attaching is idempotent and replaces the category set.
    pub fn attach<I, S>(&self, origin: Origin, sink: SinkRef, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = sink.name().to_string();
        let categories: BTreeSet<String> = categories
            .into_iter()
            .map(|c| normalize_category(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();

        // Checked before taking our own lock; holding two origin locks could deadlock.
        for other in Origin::ALL.into_iter().filter(|o| *o != origin) {
            if self.record(other).lock().contains_key(&name) {
                tracing::warn!(
                    sink = %name,
                    existing = %other,
                    incoming = %origin,
                    "Sink name already attached by another origin"
                );
                self.status.record(StatusEvent::SinkNameCollision {
                    sink: name.clone(),
                    existing: other,
                    incoming: origin,
                });
            }
        }

        let mut released = Vec::new();
        {
            let mut record = self.record(origin).lock();
            if let Some(previous) = record.shift_remove(&name) {
                for category in previous.categories.difference(&categories) {
                    self.context.detach_sink(category, &name);
                    released.push((category.clone(), name.clone()));
                }
            }

            // An empty set still records the sink so it stays known by name.
            for category in &categories {
                self.context.attach_sink(category, sink.clone());
            }
            tracing::trace!(sink = %name, origin = %origin, categories = ?categories, "Sink attached");
            record.insert(name, AttachmentEntry { sink, categories });
        }
        self.restore_shadowed(origin, released);
    }

    /// Detach one category from a sink. The sink entry disappears with its last
    /// category.
    pub fn detach(&self, origin: Origin, sink_name: &str, category: &str) -> bool {
        let category = normalize_category(category);
        {
            let mut record = self.record(origin).lock();
            let Some(entry) = record.get_mut(sink_name) else {
                return false;
            };
            if !entry.categories.remove(&category) {
                return false;
            }
            self.context.detach_sink(&category, sink_name);
            if entry.categories.is_empty() {
                record.shift_remove(sink_name);
            }
        }
        self.restore_shadowed(origin, vec![(category, sink_name.to_string())]);
        true
    }

    /// Detach a sink from every category `origin` attached it to.
    pub fn detach_sink(&self, origin: Origin, sink_name: &str) -> Option<AttachmentEntry> {
        let entry = {
            let mut record = self.record(origin).lock();
            let entry = record.shift_remove(sink_name)?;
            for category in &entry.categories {
                self.context.detach_sink(category, sink_name);
            }
            entry
        };
        let released = entry
            .categories
            .iter()
            .map(|category| (category.clone(), sink_name.to_string()))
            .collect();
        self.restore_shadowed(origin, released);
        Some(entry)
    }

    /// Undo every attachment made by `origin`. Returns how many sinks were detached.
    pub fn clear(&self, origin: Origin) -> usize {
        let mut released = Vec::new();
        let count = {
            let mut record = self.record(origin).lock();
            let count = record.len();
            for (name, entry) in record.drain(..) {
                for category in entry.categories {
                    self.context.detach_sink(&category, &name);
                    released.push((category, name.clone()));
                }
            }
            count
        };
        self.restore_shadowed(origin, released);
        count
    }

    /// The engine holds one sink per name and category, so when two origins
    /// record the same name on a category the later attach shadows the earlier
    /// one. Once `origin` lets go of such a pair, put back the sink still
    /// recorded by another origin.
    ///
    /// Runs after `origin`'s lock is released; holding two origin locks could
    /// deadlock.
    fn restore_shadowed(&self, origin: Origin, released: Vec<(String, String)>) {
        for (category, name) in released {
            for other in Origin::ALL.into_iter().filter(|o| *o != origin) {
                let record = self.record(other).lock();
                let Some(entry) = record.get(&name) else {
                    continue;
                };
                if entry.categories.contains(&category) {
                    tracing::debug!(sink = %name, category = %category, origin = %other, "Shadowed sink restored");
                    self.context.attach_sink(&category, entry.sink.clone());
                    break;
                }
            }
        }
    }

    /// Undo every attachment made by any origin
    pub fn clear_all(&self) -> usize {
        Origin::ALL.into_iter().map(|origin| self.clear(origin)).sum()
    }

    /// Sinks attached by `origin`, or by any origin when `None`.
    ///
    /// When several origins hold the same name, the first in [`Origin::ALL`]
    /// order wins.
    pub fn known_sinks(&self, origin: Option<Origin>) -> IndexMap<String, SinkRef> {
        let origins: Vec<Origin> = match origin {
            Some(origin) => vec![origin],
            None => Origin::ALL.to_vec(),
        };
        let mut sinks = IndexMap::new();
        for origin in origins {
            for (name, entry) in self.record(origin).lock().iter() {
                sinks
                    .entry(name.clone())
                    .or_insert_with(|| entry.sink.clone());
            }
        }
        sinks
    }

    pub fn categories_for(&self, origin: Origin, sink_name: &str) -> BTreeSet<String> {
        self.record(origin)
            .lock()
            .get(sink_name)
            .map(|entry| entry.categories.clone())
            .unwrap_or_default()
    }

    /// First origin holding `sink_name`, in [`Origin::ALL`] order
    pub fn origin_of(&self, sink_name: &str) -> Option<Origin> {
        Origin::ALL
            .into_iter()
            .find(|origin| self.record(*origin).lock().contains_key(sink_name))
    }

    /// Sink name -> categories, per origin. Origins with nothing attached are omitted.
    pub fn snapshot(&self) -> BTreeMap<Origin, IndexMap<String, BTreeSet<String>>> {
        Origin::ALL
            .into_iter()
            .filter_map(|origin| {
                let record = self.record(origin).lock();
                if record.is_empty() {
                    return None;
                }
                let sinks = record
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.categories.clone()))
                    .collect();
                Some((origin, sinks))
            })
            .collect()
    }

    /// Attach the temporary safety sink to the root category.
    ///
    /// The safety sink belongs to no origin, so clearing origins never removes it;
    /// only [`detach_safety`](Self::detach_safety) does.
    pub fn attach_safety(&self, sink: SinkRef) {
        let mut safety = self.safety.lock();
        if let Some(previous) = safety.take() {
            self.context.detach_sink(ROOT_CATEGORY, previous.name());
        }
        self.context.attach_sink(ROOT_CATEGORY, sink.clone());
        *safety = Some(sink);
    }

    pub fn detach_safety(&self) -> bool {
        let mut safety = self.safety.lock();
        match safety.take() {
            Some(sink) => {
                sink.flush();
                self.context.detach_sink(ROOT_CATEGORY, sink.name());
                true
            }
            None => false,
        }
    }

    pub fn has_safety(&self) -> bool {
        self.safety.lock().is_some()
    }
}
