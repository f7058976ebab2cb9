use crate::engine::{LoggerContext, SinkFactory};
use crate::models::{EngineModel, Origin};
use crate::registry::{AttachmentRegistry, WriterRegistry};
use crate::state::{StatusEvent, StatusLog};
use std::sync::Arc;

/// Pushes an [`EngineModel`] into the live engine.
///
/// Levels go straight to the context; sinks are built from their writer specs and
/// attached through the attachment registry under the origin the model gives them.
pub struct ModelApplier {
    context: Arc<LoggerContext>,
    registry: Arc<AttachmentRegistry>,
    writers: Arc<WriterRegistry>,
    factory: Arc<SinkFactory>,
    status: Arc<StatusLog>,
}

impl ModelApplier {
    pub fn new(
        context: Arc<LoggerContext>,
        registry: Arc<AttachmentRegistry>,
        writers: Arc<WriterRegistry>,
        factory: Arc<SinkFactory>,
        status: Arc<StatusLog>,
    ) -> Self {
        Self {
            context,
            registry,
            writers,
            factory,
            status,
        }
    }

    /// Replace the statically declared part of the engine with `model`.
    /// Returns how many sinks were attached.
    pub fn apply(&self, model: &EngineModel) -> usize {
        self.context.apply_levels(model);
        self.registry.clear(Origin::Static);
        self.registry.clear(Origin::StaticFragment);

        let mut attached = 0;
        for sink_model in &model.sinks {
            let descriptor = match self.writers.describe(&sink_model.name, &sink_model.writer) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::error!(sink = %sink_model.name, error = %e, "Sink has no usable destination");
                    self.status.record(StatusEvent::SinkUnavailable {
                        sink: sink_model.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let sink = self
                .factory
                .build(&sink_model.name, &descriptor, sink_model.pattern.as_deref());
            self.registry
                .attach(sink_model.origin, sink, &sink_model.categories);
            attached += 1;
        }

        tracing::debug!(
            root_level = %model.root_level,
            categories = model.categories.len(),
            sinks = attached,
            "Engine model applied"
        );
        attached
    }
}
