//! Integration tests for the reload coordinator
//!
//! These tests verify that reloads:
//! - Run one at a time, with bursts of notifications coalesced into one extra reload
//! - Never lose a notification that arrives mid-reload
//! - Fall back to the safe model (or the console) when the rebuild fails or panics
//! - Keep root output alive through the safety sink while they run

use camino::Utf8PathBuf;
use logcoord::config::{ConfigSource, FragmentDocument, Rebuilt, SourceError};
use logcoord::coordinator::ReloadOutcome;
use logcoord::engine::{KeywordCompiler, MemoryWriter, PatternCompiler, Sink};
use logcoord::models::{CategoryModel, EngineModel, SinkModel};
use logcoord::state::Fallback;
use logcoord::{Level, LogManager, Origin, Settings, StatusEvent};
use mockall::{Sequence, mock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

mock! {
    pub Source {}

    impl ConfigSource for Source {
        fn rebuild(&self, fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError>;
        fn describe(&self) -> String;
    }
}

/// Source whose rebuild can be held open to simulate a slow reload
struct GatedSource {
    gated: AtomicBool,
    open: Mutex<bool>,
    open_cv: Condvar,
    entered: Mutex<usize>,
    entered_cv: Condvar,
    active: AtomicUsize,
    max_active: AtomicUsize,
    level: Mutex<Level>,
}

impl GatedSource {
    fn new() -> Self {
        Self {
            gated: AtomicBool::new(false),
            open: Mutex::new(true),
            open_cv: Condvar::new(),
            entered: Mutex::new(0),
            entered_cv: Condvar::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            level: Mutex::new(Level::Info),
        }
    }

    fn close_gate(&self) {
        *self.open.lock().unwrap() = false;
        self.gated.store(true, Ordering::SeqCst);
    }

    fn open_gate(&self) {
        *self.open.lock().unwrap() = true;
        self.open_cv.notify_all();
    }

    fn set_level(&self, level: Level) {
        *self.level.lock().unwrap() = level;
    }

    fn rebuilds(&self) -> usize {
        *self.entered.lock().unwrap()
    }

    /// Wait until `count` rebuilds have started
    fn wait_entered(&self, count: usize) -> bool {
        let entered = self.entered.lock().unwrap();
        let (entered, _) = self
            .entered_cv
            .wait_timeout_while(entered, WAIT, |n| *n < count)
            .unwrap();
        *entered >= count
    }
}

impl ConfigSource for GatedSource {
    fn rebuild(&self, _fragments: &[FragmentDocument]) -> Result<Rebuilt, SourceError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let level = *self.level.lock().unwrap();

        {
            let mut entered = self.entered.lock().unwrap();
            *entered += 1;
            self.entered_cv.notify_all();
        }

        if self.gated.load(Ordering::SeqCst) {
            let open = self.open.lock().unwrap();
            let _open = self.open_cv.wait_while(open, |open| !*open).unwrap();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Rebuilt {
            model: EngineModel::empty(level),
            warnings: Vec::new(),
        })
    }
}

fn settings(temp_dir: &TempDir) -> Settings {
    Settings::minimal(Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap())
}

fn safe_model() -> EngineModel {
    let mut model = EngineModel::empty(Level::Warn);
    model.categories.insert(
        "svc".to_string(),
        CategoryModel {
            level: Some(Level::Debug),
            additive: None,
        },
    );
    model
        .sinks
        .push(SinkModel::console("app", Origin::Static).attached_to(["root", "svc"]));
    model
}

fn parse_error() -> SourceError {
    SourceError::Parse {
        origin: "mock".to_string(),
        message: "unexpected token".to_string(),
    }
}

#[test]
fn test_burst_during_reload_runs_exactly_one_more() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource::new());
    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(source.clone())
        .build()
        .unwrap();

    assert_eq!(manager.start().unwrap(), ReloadOutcome::Applied);
    assert_eq!(source.rebuilds(), 1);

    source.close_gate();
    manager.notify_changed();
    assert!(source.wait_entered(2), "Reload worker never started the rebuild");

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| manager.notify_changed());
        }
    });
    assert!(manager.is_resetting());

    source.open_gate();
    assert!(manager.wait_idle(WAIT));

    assert_eq!(source.rebuilds(), 3, "Expected the in-flight reload plus one");
    assert_eq!(source.max_active.load(Ordering::SeqCst), 1);

    let metrics = manager.metrics();
    assert_eq!(metrics.notifications, 9);
    assert_eq!(metrics.coalesced, 7);
    assert_eq!(metrics.reloads, 3);
}

#[test]
fn test_notification_when_idle_runs_one_reload() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource::new());
    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(source.clone())
        .build()
        .unwrap();
    manager.start().unwrap();

    manager.notify_changed();
    assert!(manager.wait_idle(WAIT));
    assert_eq!(source.rebuilds(), 2);
    assert!(!manager.is_resetting());
}

#[test]
fn test_change_during_reload_is_not_lost() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource::new());
    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(source.clone())
        .build()
        .unwrap();
    manager.start().unwrap();

    source.set_level(Level::Warn);
    source.close_gate();
    manager.notify_changed();
    assert!(source.wait_entered(2));

    // The in-flight rebuild already read WARN; this change needs another reload
    source.set_level(Level::Error);
    manager.notify_changed();

    source.open_gate();
    assert!(manager.wait_idle(WAIT));
    assert_eq!(manager.engine_snapshot().root_level, Level::Error);
    assert_eq!(manager.context().effective_level("any.category"), Level::Error);
}

#[test]
fn test_failed_rebuild_restores_safe_model() {
    let temp_dir = TempDir::new().unwrap();
    let mut source = MockSource::new();
    let mut seq = Sequence::new();
    source
        .expect_describe()
        .return_const("mock source".to_string());
    source
        .expect_rebuild()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(Rebuilt {
                model: safe_model(),
                warnings: Vec::new(),
            })
        });
    source
        .expect_rebuild()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(parse_error()));

    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(Arc::new(source))
        .build()
        .unwrap();
    assert_eq!(manager.start().unwrap(), ReloadOutcome::Applied);
    let before = manager.engine_snapshot();
    assert_eq!(before.sinks_of("svc"), vec!["app".to_string()]);

    manager.notify_changed();
    assert!(manager.wait_idle(WAIT));

    assert_eq!(manager.engine_snapshot(), before);
    assert_eq!(manager.sink_origin("app"), Some(Origin::Static));
    match manager.status().last_reload() {
        Some(StatusEvent::ReloadFailed { fallback, error, .. }) => {
            assert_eq!(fallback, Fallback::SafeModel);
            assert!(error.contains("unexpected token"), "got: {}", error);
        }
        other => panic!("Expected ReloadFailed, got: {:?}", other),
    }

    let metrics = manager.metrics();
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.safe_model_restores, 1);
}

#[test]
fn test_first_rebuild_failure_uses_console_fallback() {
    let temp_dir = TempDir::new().unwrap();
    let mut source = MockSource::new();
    source
        .expect_describe()
        .return_const("mock source".to_string());
    source.expect_rebuild().returning(|_| Err(parse_error()));

    let manager = LogManager::builder(Settings {
        root_level: Level::Warn,
        ..settings(&temp_dir)
    })
    .with_source(Arc::new(source))
    .build()
    .unwrap();

    assert_eq!(manager.start().unwrap(), ReloadOutcome::ConsoleFallback);
    let snapshot = manager.engine_snapshot();
    assert_eq!(snapshot.root_level, Level::Warn);
    assert_eq!(snapshot.sinks_of("root"), vec!["CONSOLE".to_string()]);
    assert_eq!(manager.metrics().safe_model_restores, 0);
}

#[test]
fn test_panicking_rebuild_is_treated_as_failure() {
    let temp_dir = TempDir::new().unwrap();
    let mut source = MockSource::new();
    source
        .expect_describe()
        .return_const("mock source".to_string());
    source
        .expect_rebuild()
        .returning(|_| panic!("parser exploded"));

    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(Arc::new(source))
        .build()
        .unwrap();

    assert_eq!(manager.start().unwrap(), ReloadOutcome::ConsoleFallback);
    match manager.status().last_reload() {
        Some(StatusEvent::ReloadFailed { error, .. }) => {
            assert!(error.contains("parser exploded"), "got: {}", error);
        }
        other => panic!("Expected ReloadFailed, got: {:?}", other),
    }

    // Coordination keeps working after the panic
    manager.notify_changed();
    assert!(manager.wait_idle(WAIT));
    assert_eq!(manager.metrics().reloads, 2);
}

#[test]
fn test_fragment_documents_reach_rebuild() {
    struct Fragment;

    impl logcoord::trackers::FragmentProvider for Fragment {
        fn config_document(&self) -> std::io::Result<Vec<u8>> {
            Ok(b"fragment:\n  level: DEBUG\n".to_vec())
        }
    }

    let temp_dir = TempDir::new().unwrap();
    let mut source = MockSource::new();
    let mut seq = Sequence::new();
    source
        .expect_describe()
        .return_const("mock source".to_string());
    source
        .expect_rebuild()
        .withf(|fragments| fragments.is_empty())
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(Rebuilt {
                model: EngineModel::empty(Level::Info),
                warnings: Vec::new(),
            })
        });
    source
        .expect_rebuild()
        .withf(|fragments| fragments.len() == 1 && fragments[0].provider == "plugin.audit")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(Rebuilt {
                model: EngineModel::empty(Level::Info),
                warnings: Vec::new(),
            })
        });

    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(Arc::new(source))
        .build()
        .unwrap();
    manager.start().unwrap();

    manager.register_fragment("plugin.audit", Arc::new(Fragment));
    assert!(manager.wait_idle(WAIT));
    assert_eq!(manager.metrics().reloads, 2);
}

#[test]
fn test_safety_sink_carries_output_during_reload() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource::new());
    let safety = MemoryWriter::new();
    let manager = LogManager::builder(Settings {
        safety_sink: true,
        ..settings(&temp_dir)
    })
    .with_source(source.clone())
    .with_safety_writer(safety.clone())
    .build()
    .unwrap();
    manager.start().unwrap();

    let capture = MemoryWriter::new();
    let formatter = KeywordCompiler::new().compile("%msg").formatter;
    manager.register_sink("capture", Arc::new(Sink::new("capture", capture.clone(), formatter)), ["root"]);

    source.close_gate();
    manager.notify_changed();
    assert!(source.wait_entered(2));

    // Mid-reload every attachment is cleared; only the safety sink listens
    assert_eq!(manager.log("svc", Level::Error, "during reload"), 1);
    assert!(manager.sinks(None).is_empty());

    source.open_gate();
    assert!(manager.wait_idle(WAIT));

    manager.log("svc", Level::Error, "after reload");
    assert_eq!(capture.lines(), vec!["after reload".to_string()]);
    assert_eq!(safety.lines().len(), 1);
    assert!(safety.lines()[0].contains("during reload"));
    assert!(!manager.engine_snapshot().sinks_of("root").contains(&"__safety__".to_string()));
}

#[tokio::test]
async fn test_reload_events_are_broadcast() {
    use tokio::time::timeout;

    let temp_dir = TempDir::new().unwrap();
    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(Arc::new(GatedSource::new()))
        .build()
        .unwrap();
    manager.start().unwrap();

    let mut rx = manager.subscribe();
    manager.notify_changed();

    let started = timeout(WAIT, rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert!(
        matches!(started, StatusEvent::ReloadStarted { generation: 2 }),
        "Expected ReloadStarted, got: {:?}",
        started
    );

    let finished = timeout(WAIT, rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert!(
        matches!(finished, StatusEvent::ReloadSucceeded { generation: 2, .. }),
        "Expected ReloadSucceeded, got: {:?}",
        finished
    );
}

#[test]
fn test_shutdown_ignores_later_notifications() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource::new());
    let manager = LogManager::builder(settings(&temp_dir))
        .with_source(source.clone())
        .build()
        .unwrap();
    manager.start().unwrap();
    manager.shutdown();

    manager.notify_changed();
    assert!(manager.wait_idle(WAIT));
    assert_eq!(source.rebuilds(), 1);
    assert_eq!(manager.metrics().ignored, 1);
}
