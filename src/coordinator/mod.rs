//! Single-flight reload coordination.
//!
//! Every configuration change ends in [`ReloadCoordinator::notify_changed`]. The
//! coordinator runs at most one reload at a time on a dedicated worker thread and
//! never loses a request: a notification that arrives mid-reload sets a pending
//! flag, and the worker loops until the flag stays clear. Any number of
//! notifications during one reload therefore cost exactly one extra reload.
//!
//! ```text
//!            notify (idle)                 reload done, pending
//!   IDLE ─────────────────────▶ RESETTING ◀──────────────────┐
//!    ▲                              │                          │
//!    └──────────────────────────────┴──────────────────────────┘
//!           reload done, no pending          (loop again)
//! ```

pub mod apply;
pub mod listeners;

pub use apply::ModelApplier;
pub use listeners::{
    DeclarativeMerge, ResetListener, ResetListenerChain, SAFETY_SINK, SafetySinkInstaller,
    SafetySinkRemover,
};

use crate::config::{ConfigSource, FragmentDocument, SourceWarning};
use crate::engine::LoggerContext;
use crate::metrics::ReloadMetrics;
use crate::models::{EngineModel, Level};
use crate::state::{Fallback, StatusEvent, StatusLog};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Supplies the fragment documents current at the time of a rebuild
pub trait FragmentSupplier: Send + Sync {
    fn fragments(&self) -> Vec<FragmentDocument>;
}

/// What one reload ended up applying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The rebuilt model was applied and is the new safe model
    Applied,
    /// The rebuild failed; the previous safe model was re-applied
    RestoredSafeModel,
    /// The rebuild failed and there was no safe model; console fallback applied
    ConsoleFallback,
}

#[derive(Default)]
struct ResetState {
    /// A reload is running or about to run
    held: bool,
    /// Another reload must run after the current one
    pending: bool,
    started: bool,
    stopped: bool,
    wake: Option<mpsc::UnboundedSender<()>>,
}

/// Everything the reload body needs
pub struct CoordinatorParts {
    pub context: Arc<LoggerContext>,
    pub source: Arc<dyn ConfigSource>,
    pub fragments: Option<Arc<dyn FragmentSupplier>>,
    pub listeners: Arc<ResetListenerChain>,
    pub applier: ModelApplier,
    pub status: Arc<StatusLog>,
    pub metrics: Arc<ReloadMetrics>,
    /// Root level of the console fallback model
    pub fallback_level: Level,
}

struct Shared {
    state: Mutex<ResetState>,
    idle: Condvar,
    parts: CoordinatorParts,
    safe_model: Mutex<Option<EngineModel>>,
    generation: AtomicU64,
}

/// Serializes and coalesces reload requests.
pub struct ReloadCoordinator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReloadCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ResetState::default()),
                idle: Condvar::new(),
                parts,
                safe_model: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the reload worker and perform the first reload on the calling thread.
    ///
    /// Notifications received before this point were ignored; the first reload
    /// picks up everything submitted so far. Calling `start` again does nothing;
    /// the outcome it returns then only tells whether a safe model exists.
    ///
    /// A panic during the first reload is returned as an error; coordination
    /// still runs and later notifications reload normally.
    pub fn start(&self) -> io::Result<ReloadOutcome> {
        {
            let mut state = self.shared.state.lock();
            if state.started {
                return Ok(if self.shared.safe_model.lock().is_some() {
                    ReloadOutcome::Applied
                } else {
                    ReloadOutcome::ConsoleFallback
                });
            }

            let (wake_tx, wake_rx) = mpsc::unbounded_channel();
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name("logcoord-reload".to_string())
                .spawn(move || shared.run_worker(wake_rx))?;
            *self.worker.lock() = Some(handle);

            state.wake = Some(wake_tx);
            state.started = true;
            state.held = true;
        }

        tracing::info!(source = %self.shared.parts.source.describe(), "Starting reload coordination");
        let outcome = self.shared.guarded_reload();
        self.shared.release_or_continue(false);
        outcome.ok_or_else(|| io::Error::other("first reload panicked"))
    }

    /// Request a reload. Never blocks on the reload itself.
    pub fn notify_changed(&self) {
        let mut state = self.shared.state.lock();
        let metrics = &self.shared.parts.metrics;
        if !state.started || state.stopped {
            metrics.record_ignored();
            tracing::trace!("Change notification ignored, coordination not running");
            return;
        }

        metrics.record_notification();
        if state.held {
            if state.pending {
                metrics.record_coalesced();
            }
            state.pending = true;
            return;
        }

        state.held = true;
        let woke = state.wake.as_ref().is_some_and(|tx| tx.send(()).is_ok());
        if !woke {
            tracing::warn!("Reload worker is gone, dropping change notification");
            state.held = false;
            self.shared.idle.notify_all();
        }
    }

    /// Stop the worker after any in-flight reload. Later notifications are ignored.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            // Closing the channel ends the worker loop once queued wakeups drain.
            state.wake = None;
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Reload worker panicked during shutdown");
            }
        }
        tracing::info!("Reload coordination stopped");
    }

    /// Wait until no reload is running or pending. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.held {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.held;
            }
        }
        true
    }

    /// Whether a reload is running or about to run
    pub fn is_resetting(&self) -> bool {
        self.shared.state.lock().held
    }

    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.started && !state.stopped
    }

    /// The last successfully applied model
    pub fn safe_model(&self) -> Option<EngineModel> {
        self.shared.safe_model.lock().clone()
    }

    /// Number of reloads started so far
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }
}

impl Drop for ReloadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run_worker(&self, mut wake_rx: mpsc::UnboundedReceiver<()>) {
        tracing::debug!("Reload worker started");

        while wake_rx.blocking_recv().is_some() {
            loop {
                self.guarded_reload();
                if !self.release_or_continue(true) {
                    break;
                }
            }
        }

        tracing::debug!("Reload worker terminated");
    }

    /// Run one reload, surviving a panic outside the rebuild such as one raised
    /// by a pattern compiler while the model is applied.
    fn guarded_reload(&self) -> Option<ReloadOutcome> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.reload())) {
            Ok(outcome) => Some(outcome),
            Err(payload) => {
                tracing::error!(panic = %panic_message(payload.as_ref()), "Reload panicked outside the rebuild");
                self.parts.context.set_resetting(false);
                None
            }
        }
    }

    /// Critical section at the end of a reload: claim the pending request or go
    /// idle. Returns whether the caller must run another reload itself.
    ///
    /// Off the worker (the synchronous first reload) a pending request is handed
    /// to the worker instead.
    fn release_or_continue(&self, on_worker: bool) -> bool {
        let mut state = self.state.lock();
        if state.pending {
            state.pending = false;
            if on_worker {
                return true;
            }
            if state.wake.as_ref().is_some_and(|tx| tx.send(()).is_ok()) {
                return false;
            }
            tracing::warn!("Reload worker is gone, dropping pending reload");
        }
        state.held = false;
        self.idle.notify_all();
        false
    }

    fn reload(&self) -> ReloadOutcome {
        let parts = &self.parts;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Instant::now();

        parts.context.set_resetting(true);
        parts.status.record(StatusEvent::ReloadStarted { generation });
        tracing::info!(generation, "Reloading logging configuration");

        let safe_model = self.safe_model.lock().clone();
        parts.listeners.fire_start();

        let fragments = parts
            .fragments
            .as_ref()
            .map(|supplier| supplier.fragments())
            .unwrap_or_default();

        let rebuilt = panic::catch_unwind(AssertUnwindSafe(|| parts.source.rebuild(&fragments)));

        let (outcome, event) = match rebuilt {
            Ok(Ok(rebuilt)) => {
                for warning in rebuilt.warnings {
                    parts.status.record(match warning {
                        SourceWarning::FragmentSkipped { provider, reason } => {
                            StatusEvent::FragmentSkipped { provider, reason }
                        }
                        SourceWarning::Message(message) => StatusEvent::SourceWarning { message },
                    });
                }
                let sinks = parts.applier.apply(&rebuilt.model);
                *self.safe_model.lock() = Some(rebuilt.model);
                (
                    ReloadOutcome::Applied,
                    StatusEvent::ReloadSucceeded { generation, sinks },
                )
            }
            Ok(Err(e)) => self.fall_back(generation, safe_model, e.to_string()),
            Err(payload) => self.fall_back(
                generation,
                safe_model,
                format!("rebuild panicked: {}", panic_message(payload.as_ref())),
            ),
        };

        parts.listeners.fire_complete();
        parts.context.set_resetting(false);

        let elapsed = started.elapsed();
        parts.metrics.record_reload(elapsed);
        tracing::info!(
            generation,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Reload finished"
        );
        parts.status.record(event);
        outcome
    }

    fn fall_back(
        &self,
        generation: u64,
        safe_model: Option<EngineModel>,
        error: String,
    ) -> (ReloadOutcome, StatusEvent) {
        let parts = &self.parts;
        let (outcome, fallback, model) = match safe_model {
            Some(model) => (ReloadOutcome::RestoredSafeModel, Fallback::SafeModel, model),
            None => (
                ReloadOutcome::ConsoleFallback,
                Fallback::Console,
                EngineModel::console_fallback(parts.fallback_level),
            ),
        };

        tracing::error!(generation, error = %error, fallback = ?fallback, "Rebuild failed, applying fallback");
        parts.applier.apply(&model);
        parts
            .metrics
            .record_failure(fallback == Fallback::SafeModel);

        (
            outcome,
            StatusEvent::ReloadFailed {
                generation,
                error,
                fallback,
            },
        )
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rebuilt, SourceError};
    use crate::engine::{CompiledPattern, KeywordCompiler, PatternCompiler, SinkFactory};
    use crate::registry::{AttachmentRegistry, WriterRegistry};
    use std::sync::atomic::AtomicUsize;

    const WAIT: Duration = Duration::from_secs(5);

    /// Fails every rebuild after the first `ok` ones
    struct CountingSource {
        calls: AtomicUsize,
        ok: usize,
    }

    impl ConfigSource for CountingSource {
        fn rebuild(&self, _fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.ok {
                Ok(Rebuilt {
                    model: EngineModel::empty(Level::Debug),
                    warnings: Vec::new(),
                })
            } else {
                Err(SourceError::Parse {
                    origin: "counting".to_string(),
                    message: format!("call {call}"),
                })
            }
        }
    }

    /// Always yields the console model, so applying it compiles a pattern
    struct ConsoleSource;

    impl ConfigSource for ConsoleSource {
        fn rebuild(&self, _fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError> {
            Ok(Rebuilt {
                model: EngineModel::console_fallback(Level::Info),
                warnings: Vec::new(),
            })
        }
    }

    struct PanickingCompiler;

    impl PatternCompiler for PanickingCompiler {
        fn compile(&self, pattern: &str) -> CompiledPattern {
            panic!("cannot compile {pattern}");
        }
    }

    fn parts(
        source: Arc<dyn ConfigSource>,
        compiler: Arc<dyn PatternCompiler>,
    ) -> (CoordinatorParts, Arc<ReloadMetrics>) {
        let context = Arc::new(LoggerContext::new(Level::Info));
        let status = Arc::new(StatusLog::default());
        let metrics = Arc::new(ReloadMetrics::new());
        let registry = Arc::new(AttachmentRegistry::new(context.clone(), status.clone()));
        let writers = Arc::new(WriterRegistry::new("/tmp/logcoord-coordinator", "default"));
        let factory = Arc::new(SinkFactory::new(compiler, status.clone()));
        let parts = CoordinatorParts {
            context: context.clone(),
            source,
            fragments: None,
            listeners: Arc::new(ResetListenerChain::new(status.clone())),
            applier: ModelApplier::new(context, registry, writers, factory, status.clone()),
            status,
            metrics: metrics.clone(),
            fallback_level: Level::Warn,
        };
        (parts, metrics)
    }

    fn coordinator(ok: usize) -> (ReloadCoordinator, Arc<CountingSource>, Arc<ReloadMetrics>) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            ok,
        });
        let (parts, metrics) = parts(source.clone(), Arc::new(KeywordCompiler::new()));
        (ReloadCoordinator::new(parts), source, metrics)
    }

    #[test]
    fn test_notify_before_start_is_ignored() {
        let (coordinator, source, metrics) = coordinator(1);
        coordinator.notify_changed();

        assert_eq!(metrics.snapshot().ignored, 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_start_twice_runs_one_reload() {
        let (coordinator, source, _) = coordinator(1);
        assert_eq!(coordinator.start().unwrap(), ReloadOutcome::Applied);
        assert_eq!(coordinator.start().unwrap(), ReloadOutcome::Applied);

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.generation(), 1);
        assert!(coordinator.safe_model().is_some());
        assert!(coordinator.is_running());
    }

    #[test]
    fn test_failure_keeps_safe_model() {
        let (coordinator, _, metrics) = coordinator(1);
        coordinator.start().unwrap();
        let safe = coordinator.safe_model();

        coordinator.notify_changed();
        assert!(coordinator.wait_idle(WAIT));

        assert_eq!(coordinator.safe_model(), safe);
        assert_eq!(coordinator.generation(), 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.safe_model_restores, 1);
    }

    #[test]
    fn test_console_fallback_is_not_stored() {
        let (coordinator, _, _) = coordinator(0);
        assert_eq!(coordinator.start().unwrap(), ReloadOutcome::ConsoleFallback);
        assert!(coordinator.safe_model().is_none());
    }

    #[test]
    fn test_shutdown_stops_worker() {
        let (coordinator, source, metrics) = coordinator(1);
        coordinator.start().unwrap();
        coordinator.shutdown();
        coordinator.shutdown();

        coordinator.notify_changed();
        assert!(coordinator.wait_idle(WAIT));
        assert!(!coordinator.is_running());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().ignored, 1);
    }

    #[test]
    fn test_panic_in_first_reload_releases_coordination() {
        let (parts, metrics) = parts(Arc::new(ConsoleSource), Arc::new(PanickingCompiler));
        let context = parts.context.clone();
        let coordinator = ReloadCoordinator::new(parts);

        assert!(coordinator.start().is_err());
        assert!(!coordinator.is_resetting());
        assert!(!context.is_resetting());
        assert!(coordinator.is_running());

        coordinator.notify_changed();
        assert!(coordinator.wait_idle(WAIT));
        assert_eq!(coordinator.generation(), 2);
        assert_eq!(metrics.snapshot().ignored, 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        assert_eq!(panic_message(payload.as_ref()), "owned text");
        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
