use super::{Attached, CollaboratorInfo, CollaboratorKind, Tracker};
use crate::config::FragmentDocument;
use crate::coordinator::FragmentSupplier;
use crate::engine::{HeaderProcessor, Sink, SinkFilter, SinkRef};
use crate::models::{Origin, ROOT_CATEGORY};
use crate::registry::AttachmentRegistry;
use crate::state::StatusEvent;
use std::collections::BTreeSet;
use std::io;

/// Supplies a configuration fragment spliced into the primary document on every
/// rebuild.
pub trait FragmentProvider: Send + Sync {
    fn config_document(&self) -> io::Result<Vec<u8>>;
}

/// Sinks registered at runtime. Targets are category names, root by default.
pub struct SinkKind;

impl CollaboratorKind for SinkKind {
    type Object = Sink;

    const NAME: &'static str = "sink";
    const DEFAULT_TARGETS: &'static [&'static str] = &[ROOT_CATEGORY];

    fn attach(info: &CollaboratorInfo<Sink>, registry: &AttachmentRegistry) -> Attached {
        let mut categories = info.targets.clone();
        if info.apply_to_all {
            categories.insert(ROOT_CATEGORY.to_string());
        }
        registry.attach(Origin::Dynamic, info.object.clone(), categories);
        Attached {
            reached: vec![info.object.clone()],
            missing: Vec::new(),
        }
    }

    /// Filters and headers go with the sink; the trackers that own them put
    /// them back when it is registered again.
    fn detach(info: &CollaboratorInfo<Sink>, _reached: &[SinkRef], registry: &AttachmentRegistry) {
        registry.detach_sink(Origin::Dynamic, info.object.name());
        info.object.clear_collaborators();
    }
}

/// Attach `add` to every known sink the info targets.
fn attach_to_sinks(
    targets: &BTreeSet<String>,
    apply_to_all: bool,
    registry: &AttachmentRegistry,
    add: impl Fn(&SinkRef),
) -> Attached {
    let sinks = registry.known_sinks(None);
    if apply_to_all {
        sinks.values().for_each(&add);
        return Attached {
            reached: sinks.into_values().collect(),
            missing: Vec::new(),
        };
    }

    let mut attached = Attached::default();
    for target in targets {
        match sinks.get(target) {
            Some(sink) => {
                add(sink);
                attached.reached.push(sink.clone());
            }
            None => attached.missing.push(target.clone()),
        }
    }
    attached
}

/// Filters registered at runtime. Targets are sink names.
pub struct FilterKind;

impl CollaboratorKind for FilterKind {
    type Object = dyn SinkFilter;

    const NAME: &'static str = "filter";

    fn attach(info: &CollaboratorInfo<dyn SinkFilter>, registry: &AttachmentRegistry) -> Attached {
        attach_to_sinks(&info.targets, info.apply_to_all, registry, |sink| {
            sink.add_filter(&info.id, info.object.clone())
        })
    }

    fn detach(info: &CollaboratorInfo<dyn SinkFilter>, reached: &[SinkRef], _registry: &AttachmentRegistry) {
        for sink in reached {
            sink.remove_filter(&info.id);
        }
    }

    fn start(object: &dyn SinkFilter) {
        object.start();
    }

    fn stop(object: &dyn SinkFilter) {
        object.stop();
    }
}

/// Header processors registered at runtime. Targets are sink names.
pub struct HeaderKind;

impl CollaboratorKind for HeaderKind {
    type Object = dyn HeaderProcessor;

    const NAME: &'static str = "header";

    fn attach(info: &CollaboratorInfo<dyn HeaderProcessor>, registry: &AttachmentRegistry) -> Attached {
        attach_to_sinks(&info.targets, info.apply_to_all, registry, |sink| {
            sink.add_header(&info.id, info.object.clone())
        })
    }

    fn detach(
        info: &CollaboratorInfo<dyn HeaderProcessor>,
        reached: &[SinkRef],
        _registry: &AttachmentRegistry,
    ) {
        for sink in reached {
            sink.remove_header(&info.id);
        }
    }

    fn start(object: &dyn HeaderProcessor) {
        object.start();
    }

    fn stop(object: &dyn HeaderProcessor) {
        object.stop();
    }
}

/// Fragment providers. They attach nothing; their documents are read by the
/// coordinator during a rebuild.
pub struct FragmentKind;

impl CollaboratorKind for FragmentKind {
    type Object = dyn FragmentProvider;

    const NAME: &'static str = "fragment";

    fn attach(_info: &CollaboratorInfo<dyn FragmentProvider>, _registry: &AttachmentRegistry) -> Attached {
        Attached::default()
    }

    fn detach(
        _info: &CollaboratorInfo<dyn FragmentProvider>,
        _reached: &[SinkRef],
        _registry: &AttachmentRegistry,
    ) {
    }
}

impl FragmentSupplier for Tracker<FragmentKind> {
    fn fragments(&self) -> Vec<FragmentDocument> {
        self.infos()
            .into_iter()
            .filter_map(|info| match info.object.config_document() {
                Ok(bytes) => Some(FragmentDocument::new(info.id, bytes)),
                Err(e) => {
                    tracing::warn!(provider = %info.id, error = %e, "Fragment document unavailable");
                    self.status().record(StatusEvent::FragmentSkipped {
                        provider: info.id,
                        reason: e.to_string(),
                    });
                    None
                }
            })
            .collect()
    }
}
