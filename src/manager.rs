//! `LogManager` - the facade wiring every component together.
//!
//! The manager owns one [`LoggerContext`] and everything that reconfigures it.
//! Mutators validate synchronously, store the change, and ask the coordinator for
//! a reload; the reload itself happens on the worker thread.
//!
//! # Listener order
//!
//! 1. safety sink installer (start: clear attachments, attach safety sink)
//! 2. declarative merge
//! 3. sink tracker reconcile
//! 4. filter tracker reconcile
//! 5. header tracker reconcile
//! 6. safety sink remover
//!
//! Dynamic sinks reconcile before filters and headers so those find every sink.

use crate::config::{ConfigSource, Settings, YamlConfigSource};
use crate::coordinator::{
    CoordinatorParts, DeclarativeMerge, FragmentSupplier, ModelApplier, ReloadCoordinator,
    ReloadOutcome, ResetListenerChain, SAFETY_SINK, SafetySinkInstaller, SafetySinkRemover,
};
use crate::engine::{
    ConsoleWriter, EngineSnapshot, HeaderProcessor, KeywordCompiler, LogRecord, LoggerContext,
    PatternCompiler, RecordWriter, Sink, SinkFactory, SinkFilter, SinkRef,
};
use crate::metrics::{MetricsSnapshot, ReloadMetrics};
use crate::models::{
    CONSOLE, DeclarativeConfig, Level, LevelSetting, Origin, ROOT_CATEGORY, ValidationError,
    WriterDescriptor, WriterSpec,
};
use crate::registry::{AttachmentRegistry, DeclarativeConfigStore, WriterRegistry};
use crate::state::{StatusEntry, StatusEvent, StatusLog};
use crate::trackers::{FilterKind, FragmentKind, FragmentProvider, HeaderKind, SinkKind, Tracker};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Identity of the writer and declarative configuration created from
/// [`Settings::default_writer`]
pub const DEFAULT_IDENTITY: &str = "logcoord.default";

/// Pattern used by the safety sink
const SAFETY_PATTERN: &str = "%d %level [%thread] %logger %msg";

/// Builder for [`LogManager`]
pub struct LogManagerBuilder {
    settings: Settings,
    source: Option<Arc<dyn ConfigSource>>,
    compiler: Option<Arc<dyn PatternCompiler>>,
    safety_writer: Option<Box<dyn RecordWriter>>,
}

impl LogManagerBuilder {
    /// Use a custom primary configuration source instead of the YAML file named
    /// in the settings.
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn PatternCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Where the safety sink writes during reloads. Defaults to the console.
    pub fn with_safety_writer(mut self, writer: impl RecordWriter + 'static) -> Self {
        self.safety_writer = Some(Box::new(writer));
        self
    }

    pub fn build(self) -> Result<LogManager, ValidationError> {
        let settings = self.settings;
        let context = Arc::new(LoggerContext::new(settings.root_level));
        let status = Arc::new(StatusLog::new(settings.status_capacity));
        let metrics = Arc::new(ReloadMetrics::new());

        let writers = Arc::new(WriterRegistry::new(&settings.log_dir, DEFAULT_IDENTITY));
        let declarative = Arc::new(DeclarativeConfigStore::new());
        let registry = Arc::new(AttachmentRegistry::new(context.clone(), status.clone()));

        let compiler = self
            .compiler
            .unwrap_or_else(|| Arc::new(KeywordCompiler::new()));
        let factory = Arc::new(SinkFactory::new(compiler.clone(), status.clone()));

        let source: Arc<dyn ConfigSource> = match self.source {
            Some(source) => source,
            None => match &settings.primary_config {
                Some(path) => Arc::new(
                    YamlConfigSource::file(path.clone()).with_default_level(settings.root_level),
                ),
                None => Arc::new(YamlConfigSource::empty(settings.root_level)),
            },
        };

        let sinks = Arc::new(Tracker::<SinkKind>::new(
            registry.clone(),
            context.clone(),
            status.clone(),
        ));
        let filters = Arc::new(Tracker::<FilterKind>::new(
            registry.clone(),
            context.clone(),
            status.clone(),
        ));
        let headers = Arc::new(Tracker::<HeaderKind>::new(
            registry.clone(),
            context.clone(),
            status.clone(),
        ));
        let fragments = Arc::new(Tracker::<FragmentKind>::new(
            registry.clone(),
            context.clone(),
            status.clone(),
        ));

        let safety = settings.safety_sink.then(|| {
            let writer = self
                .safety_writer
                .unwrap_or_else(|| Box::new(ConsoleWriter));
            let formatter = compiler.compile(SAFETY_PATTERN).formatter;
            Arc::new(Sink::with_boxed_writer(SAFETY_SINK, writer, formatter))
        });

        let listeners = Arc::new(ResetListenerChain::new(status.clone()));
        listeners.add(Arc::new(SafetySinkInstaller::new(registry.clone(), safety)));
        listeners.add(Arc::new(DeclarativeMerge::new(
            declarative.clone(),
            writers.clone(),
            registry.clone(),
            context.clone(),
            factory.clone(),
        )));
        listeners.add(sinks.clone());
        listeners.add(filters.clone());
        listeners.add(headers.clone());
        listeners.add(Arc::new(SafetySinkRemover::new(registry.clone())));

        let applier = ModelApplier::new(
            context.clone(),
            registry.clone(),
            writers.clone(),
            factory,
            status.clone(),
        );
        let supplier: Arc<dyn FragmentSupplier> = fragments.clone();
        let coordinator = ReloadCoordinator::new(CoordinatorParts {
            context: context.clone(),
            source,
            fragments: Some(supplier),
            listeners,
            applier,
            status: status.clone(),
            metrics: metrics.clone(),
            fallback_level: settings.root_level,
        });

        if let Some(writer) = settings.default_writer.as_deref().map(str::trim) {
            if !writer.eq_ignore_ascii_case(CONSOLE) {
                writers.upsert(
                    DEFAULT_IDENTITY,
                    &WriterSpec::file(writer)
                        .with_count(settings.default_rotation_count.to_string())
                        .with_rotation(settings.default_rotation.clone()),
                )?;
            }
            let writer = if writer.eq_ignore_ascii_case(CONSOLE) {
                CONSOLE
            } else {
                writer
            };
            declarative.upsert(DeclarativeConfig::new(
                DEFAULT_IDENTITY,
                [ROOT_CATEGORY],
                LevelSetting::Default,
                writer,
            ))?;
        }

        tracing::debug!(
            log_dir = %writers.log_dir(),
            default_writer = ?settings.default_writer,
            safety_sink = settings.safety_sink,
            "Log manager assembled"
        );

        Ok(LogManager {
            settings,
            context,
            status,
            metrics,
            writers,
            declarative,
            registry,
            sinks,
            filters,
            headers,
            fragments,
            coordinator,
        })
    }
}

/// Live logging configuration for one component.
pub struct LogManager {
    settings: Settings,
    context: Arc<LoggerContext>,
    status: Arc<StatusLog>,
    metrics: Arc<ReloadMetrics>,
    writers: Arc<WriterRegistry>,
    declarative: Arc<DeclarativeConfigStore>,
    registry: Arc<AttachmentRegistry>,
    sinks: Arc<Tracker<SinkKind>>,
    filters: Arc<Tracker<FilterKind>>,
    headers: Arc<Tracker<HeaderKind>>,
    fragments: Arc<Tracker<FragmentKind>>,
    coordinator: ReloadCoordinator,
}

impl LogManager {
    pub fn builder(settings: Settings) -> LogManagerBuilder {
        LogManagerBuilder {
            settings,
            source: None,
            compiler: None,
            safety_writer: None,
        }
    }

    pub fn new(settings: Settings) -> Result<Self, ValidationError> {
        Self::builder(settings).build()
    }

    // ---- lifecycle ----

    /// Perform the first reload and start reacting to changes.
    pub fn start(&self) -> io::Result<ReloadOutcome> {
        self.coordinator.start()
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.context.flush();
        self.metrics.log_summary();
    }

    /// Block until no reload is running or pending
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.coordinator.wait_idle(timeout)
    }

    /// Ask for a reload, e.g. after the primary configuration file changed.
    pub fn notify_changed(&self) {
        self.coordinator.notify_changed();
    }

    pub fn is_resetting(&self) -> bool {
        self.coordinator.is_resetting()
    }

    // ---- writers ----

    pub fn configure_writer(
        &self,
        identity: &str,
        spec: &WriterSpec,
    ) -> Result<WriterDescriptor, ValidationError> {
        let descriptor = self.writers.upsert(identity, spec)?;
        self.coordinator.notify_changed();
        Ok(descriptor)
    }

    pub fn remove_writer(&self, identity: &str) -> Option<WriterDescriptor> {
        let removed = self.writers.remove(identity)?;
        self.coordinator.notify_changed();
        Some(removed)
    }

    // ---- declarative configuration ----

    pub fn submit(&self, config: DeclarativeConfig) -> Result<(), ValidationError> {
        self.declarative.upsert(config)?;
        self.coordinator.notify_changed();
        Ok(())
    }

    /// Submit a configuration whose level is given as a token such as `DEBUG`
    /// or `DEFAULT`.
    pub fn submit_tokens<I, S>(
        &self,
        identity: &str,
        categories: I,
        level: &str,
        writer: &str,
    ) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let level: LevelSetting = level.parse()?;
        self.submit(DeclarativeConfig::new(identity, categories, level, writer))
    }

    pub fn retract(&self, identity: &str) -> Option<DeclarativeConfig> {
        let removed = self.declarative.remove(identity)?;
        self.coordinator.notify_changed();
        Some(removed)
    }

    // ---- dynamic collaborators ----
    //
    // Sinks, filters and headers attach immediately and are reconciled at the
    // end of every reload, so they do not trigger one. Fragments change the
    // rebuild input and do.

    pub fn register_sink<I, S>(&self, id: &str, sink: SinkRef, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sinks.appeared(id, sink, categories);
        self.refresh_sink_collaborators();
    }

    pub fn update_sink<I, S>(&self, id: &str, sink: SinkRef, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sinks.changed(id, sink, categories);
        self.refresh_sink_collaborators();
    }

    pub fn unregister_sink(&self, id: &str) -> bool {
        self.sinks.disappeared(id)
    }

    pub fn register_filter<I, S>(&self, id: &str, filter: Arc<dyn SinkFilter>, sinks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filters.appeared(id, filter, sinks);
    }

    pub fn update_filter<I, S>(&self, id: &str, filter: Arc<dyn SinkFilter>, sinks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filters.changed(id, filter, sinks);
    }

    pub fn unregister_filter(&self, id: &str) -> bool {
        self.filters.disappeared(id)
    }

    pub fn register_header<I, S>(&self, id: &str, header: Arc<dyn HeaderProcessor>, sinks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers.appeared(id, header, sinks);
    }

    pub fn update_header<I, S>(&self, id: &str, header: Arc<dyn HeaderProcessor>, sinks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers.changed(id, header, sinks);
    }

    pub fn unregister_header(&self, id: &str) -> bool {
        self.headers.disappeared(id)
    }

    pub fn register_fragment(&self, id: &str, provider: Arc<dyn FragmentProvider>) {
        self.fragments.appeared(id, provider, std::iter::empty::<&str>());
        self.coordinator.notify_changed();
    }

    pub fn update_fragment(&self, id: &str, provider: Arc<dyn FragmentProvider>) {
        self.fragments.changed(id, provider, std::iter::empty::<&str>());
        self.coordinator.notify_changed();
    }

    pub fn unregister_fragment(&self, id: &str) -> bool {
        let removed = self.fragments.disappeared(id);
        if removed {
            self.coordinator.notify_changed();
        }
        removed
    }

    fn refresh_sink_collaborators(&self) {
        self.filters.refresh();
        self.headers.refresh();
    }

    // ---- logging ----

    /// Route one record through the engine. Returns how many sinks wrote it.
    pub fn log(&self, category: &str, level: Level, message: impl Into<String>) -> usize {
        self.context.log(&LogRecord::new(category, level, message))
    }

    pub fn is_enabled(&self, category: &str, level: Level) -> bool {
        self.context.is_enabled(category, level)
    }

    // ---- queries ----

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<LoggerContext> {
        &self.context
    }

    pub fn declarative_configs(&self) -> Vec<DeclarativeConfig> {
        self.declarative.all()
    }

    pub fn category_owner(&self, category: &str) -> Option<String> {
        self.declarative.owner_of(category)
    }

    pub fn writers(&self) -> Vec<WriterDescriptor> {
        self.writers.all()
    }

    /// Resolve a destination name the way the declarative merge will
    pub fn resolve_writer(&self, name: &str) -> WriterDescriptor {
        self.writers.resolve(name)
    }

    /// Sinks attached by `origin`, or by any origin
    pub fn sinks(&self, origin: Option<Origin>) -> IndexMap<String, SinkRef> {
        self.registry.known_sinks(origin)
    }

    pub fn sink_categories(&self, origin: Origin, sink: &str) -> BTreeSet<String> {
        self.registry.categories_for(origin, sink)
    }

    pub fn sink_origin(&self, sink: &str) -> Option<Origin> {
        self.registry.origin_of(sink)
    }

    pub fn engine_snapshot(&self) -> EngineSnapshot {
        self.context.snapshot()
    }

    pub fn status_history(&self) -> Vec<StatusEntry> {
        self.status.history()
    }

    pub fn status(&self) -> &Arc<StatusLog> {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reload_generation(&self) -> u64 {
        self.coordinator.generation()
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.coordinator.shutdown();
        self.context.flush();
    }
}
