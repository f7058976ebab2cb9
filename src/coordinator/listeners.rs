use super::panic_message;
use crate::engine::{LoggerContext, SinkFactory, SinkRef};
use crate::models::{LevelSetting, Origin, ROOT_CATEGORY};
use crate::registry::{AttachmentRegistry, DeclarativeConfigStore, WriterRegistry};
use crate::state::{StatusEvent, StatusLog};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Name of the temporary sink that keeps root output alive during a reload
pub const SAFETY_SINK: &str = "__safety__";

/// Receives the two reload phase broadcasts.
///
/// Both hooks run on the reload worker. Start hooks run before the config source
/// is rebuilt; complete hooks run after the new (or fallback) model is applied.
pub trait ResetListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_reset_start(&self) {}

    fn on_reset_complete(&self) {}
}

#[derive(Clone, Copy)]
enum Phase {
    Start,
    Complete,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Complete => "complete",
        }
    }
}

/// Ordered list of reset listeners.
///
/// Both phases visit listeners in registration order. A panicking listener is
/// logged and recorded; the rest of the chain still runs.
pub struct ResetListenerChain {
    listeners: RwLock<Vec<Arc<dyn ResetListener>>>,
    status: Arc<StatusLog>,
}

impl ResetListenerChain {
    pub fn new(status: Arc<StatusLog>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            status,
        }
    }

    pub fn add(&self, listener: Arc<dyn ResetListener>) {
        tracing::debug!(listener = listener.name(), "Reset listener registered");
        self.listeners.write().push(listener);
    }

    pub fn names(&self) -> Vec<String> {
        self.listeners
            .read()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    pub fn fire_start(&self) {
        self.fire(Phase::Start);
    }

    pub fn fire_complete(&self) {
        self.fire(Phase::Complete);
    }

    fn fire(&self, phase: Phase) {
        // Snapshot so a listener may register another without deadlocking.
        let listeners: Vec<Arc<dyn ResetListener>> = self.listeners.read().clone();

        for listener in listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| match phase {
                Phase::Start => listener.on_reset_start(),
                Phase::Complete => listener.on_reset_complete(),
            }));

            if let Err(payload) = result {
                tracing::error!(
                    listener = listener.name(),
                    phase = phase.as_str(),
                    panic = %panic_message(payload.as_ref()),
                    "Reset listener panicked, continuing with the next one"
                );
                self.status.record(StatusEvent::ListenerPanicked {
                    listener: listener.name().to_string(),
                    phase: phase.as_str(),
                });
            }
        }
    }
}

/// First listener: clears every origin's attachments and, when configured,
/// keeps a safety sink on root so output never stops mid-reload.
pub struct SafetySinkInstaller {
    registry: Arc<AttachmentRegistry>,
    safety: Option<SinkRef>,
}

impl SafetySinkInstaller {
    pub fn new(registry: Arc<AttachmentRegistry>, safety: Option<SinkRef>) -> Self {
        Self { registry, safety }
    }
}

impl ResetListener for SafetySinkInstaller {
    fn name(&self) -> &str {
        "safety sink installer"
    }

    fn on_reset_start(&self) {
        if let Some(sink) = &self.safety {
            self.registry.attach_safety(sink.clone());
        }
        let cleared = self.registry.clear_all();
        tracing::debug!(cleared, "Attachments cleared for reload");
    }
}

/// Last listener: removes the safety sink once every other listener has
/// re-attached its sinks.
pub struct SafetySinkRemover {
    registry: Arc<AttachmentRegistry>,
}

impl SafetySinkRemover {
    pub fn new(registry: Arc<AttachmentRegistry>) -> Self {
        Self { registry }
    }
}

impl ResetListener for SafetySinkRemover {
    fn name(&self) -> &str {
        "safety sink remover"
    }

    fn on_reset_complete(&self) {
        if self.registry.detach_safety() {
            tracing::debug!("Safety sink removed");
        }
    }
}

/// Merges declarative configuration into the freshly applied engine model.
///
/// Levels and additivity always come from the owning configuration. For the
/// writer, a sink of the same name declared by a configuration document wins:
/// the categories are attached to it under its own origin. Otherwise one sink per
/// writer name is synthesized and recorded as [`Origin::Declarative`].
pub struct DeclarativeMerge {
    store: Arc<DeclarativeConfigStore>,
    writers: Arc<WriterRegistry>,
    registry: Arc<AttachmentRegistry>,
    context: Arc<LoggerContext>,
    factory: Arc<SinkFactory>,
}

impl DeclarativeMerge {
    pub fn new(
        store: Arc<DeclarativeConfigStore>,
        writers: Arc<WriterRegistry>,
        registry: Arc<AttachmentRegistry>,
        context: Arc<LoggerContext>,
        factory: Arc<SinkFactory>,
    ) -> Self {
        Self {
            store,
            writers,
            registry,
            context,
            factory,
        }
    }

    fn static_sink(&self, name: &str) -> Option<(Origin, SinkRef)> {
        [Origin::Static, Origin::StaticFragment]
            .into_iter()
            .find_map(|origin| {
                self.registry
                    .known_sinks(Some(origin))
                    .shift_remove(name)
                    .map(|sink| (origin, sink))
            })
    }
}

impl ResetListener for DeclarativeMerge {
    fn name(&self) -> &str {
        "declarative merge"
    }

    fn on_reset_complete(&self) {
        let configs = self.store.all();
        for config in &configs {
            for category in &config.categories {
                match config.level {
                    LevelSetting::Level(level) => {
                        self.context.set_level(category, Some(level));
                        if category != ROOT_CATEGORY {
                            self.context.set_additive(category, Some(config.additive));
                        }
                    }
                    LevelSetting::Default => {
                        self.context.set_level(category, None);
                        self.context.set_additive(category, None);
                    }
                }
            }

            let (origin, sink) = match self.static_sink(&config.writer) {
                Some(found) => found,
                None => match self
                    .registry
                    .known_sinks(Some(Origin::Declarative))
                    .shift_remove(&config.writer)
                {
                    Some(sink) => (Origin::Declarative, sink),
                    None => {
                        let descriptor = self.writers.resolve(&config.writer);
                        let sink = self.factory.build(
                            &config.writer,
                            &descriptor,
                            config.pattern.as_deref(),
                        );
                        (Origin::Declarative, sink)
                    }
                },
            };

            let mut categories = self.registry.categories_for(origin, &config.writer);
            categories.extend(config.categories.iter().cloned());
            tracing::debug!(
                identity = %config.identity,
                writer = %config.writer,
                origin = %origin,
                "Declarative configuration merged"
            );
            self.registry.attach(origin, sink, categories);
        }

        if !configs.is_empty() {
            tracing::info!(configs = configs.len(), "Declarative configuration applied");
        }
    }
}
