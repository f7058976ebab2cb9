// Status module
//
// This module provides the StatusLog which keeps a bounded history of
// reconfiguration events and fans them out to subscribers.

use crate::models::Origin;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// What the coordinator fell back to after a failed rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// The last successfully applied model was restored
    SafeModel,
    /// No safe model existed; the built-in console model was applied
    Console,
}

/// Events recorded while configuration is being changed
///
/// These are query-only: recording an event never changes engine state and never
/// blocks the thread that records it.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    /// A reload began on the reload worker (or synchronously at start)
    ReloadStarted { generation: u64 },

    /// The primary configuration was rebuilt and applied
    ReloadSucceeded { generation: u64, sinks: usize },

    /// The rebuild failed and a fallback model was applied instead
    ReloadFailed {
        generation: u64,
        error: String,
        fallback: Fallback,
    },

    /// Non-fatal problem reported by the config source during a rebuild
    SourceWarning { message: String },

    /// A fragment provider's document could not be used
    FragmentSkipped { provider: String, reason: String },

    /// A pattern keyword could not be resolved
    PatternError { sink: String, message: String },

    /// A sink could not open its destination and writes to the console instead
    SinkUnavailable { sink: String, error: String },

    /// Two origins attached sinks with the same name
    SinkNameCollision {
        sink: String,
        existing: Origin,
        incoming: Origin,
    },

    /// A collaborator names a sink that does not exist after reload completion
    AttachmentTargetMissing {
        kind: &'static str,
        collaborator: String,
        target: String,
    },

    /// A reset listener panicked; the remaining listeners still ran
    ListenerPanicked { listener: String, phase: &'static str },
}

impl StatusEvent {
    /// Whether this event describes a failure rather than progress.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StatusEvent::ReloadFailed { .. } | StatusEvent::ListenerPanicked { .. }
        )
    }
}

/// A recorded event with its timestamp
#[derive(Clone, Debug)]
pub struct StatusEntry {
    pub at: DateTime<Local>,
    pub event: StatusEvent,
}

/// Bounded, thread-safe status history with event emission
///
/// Keeps the most recent `capacity` events for presentation layers and forwards
/// every event to broadcast subscribers. Old entries are dropped first.
pub struct StatusLog {
    history: RwLock<VecDeque<StatusEntry>>,
    capacity: usize,

    /// Broadcast channel for status events
    /// Multiple subscribers can listen; slow ones lag instead of blocking
    status_tx: broadcast::Sender<StatusEvent>,
}

impl StatusLog {
    /// Create a new StatusLog retaining up to `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let (status_tx, _) = broadcast::channel(100);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            status_tx,
        }
    }

    /// Record an event and notify subscribers
    pub fn record(&self, event: StatusEvent) {
        {
            let mut history = self.history.write();
            while history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(StatusEntry {
                at: Local::now(),
                event: event.clone(),
            });
        }

        // Ignore send errors - it's OK if no one is listening
        let _ = self.status_tx.send(event);
    }

    /// Subscribe to future status events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of the retained history, oldest first
    pub fn history(&self) -> Vec<StatusEntry> {
        self.history.read().iter().cloned().collect()
    }

    /// Retained events matching a predicate, oldest first
    pub fn events_matching<F>(&self, predicate: F) -> Vec<StatusEvent>
    where
        F: Fn(&StatusEvent) -> bool,
    {
        self.history
            .read()
            .iter()
            .filter(|entry| predicate(&entry.event))
            .map(|entry| entry.event.clone())
            .collect()
    }

    /// The most recent reload outcome, if any reload has finished
    pub fn last_reload(&self) -> Option<StatusEvent> {
        self.history
            .read()
            .iter()
            .rev()
            .find(|entry| {
                matches!(
                    entry.event,
                    StatusEvent::ReloadSucceeded { .. } | StatusEvent::ReloadFailed { .. }
                )
            })
            .map(|entry| entry.event.clone())
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_history() {
        let log = StatusLog::new(10);
        log.record(StatusEvent::ReloadStarted { generation: 1 });
        log.record(StatusEvent::ReloadSucceeded {
            generation: 1,
            sinks: 2,
        });

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event, StatusEvent::ReloadStarted { generation: 1 });
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = StatusLog::new(2);
        for generation in 1..=3 {
            log.record(StatusEvent::ReloadStarted { generation });
        }

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event, StatusEvent::ReloadStarted { generation: 2 });
        assert_eq!(history[1].event, StatusEvent::ReloadStarted { generation: 3 });
    }

    #[test]
    fn test_last_reload_skips_other_events() {
        let log = StatusLog::default();
        assert!(log.last_reload().is_none());

        log.record(StatusEvent::ReloadFailed {
            generation: 1,
            error: "bad".to_string(),
            fallback: Fallback::Console,
        });
        log.record(StatusEvent::SourceWarning {
            message: "meh".to_string(),
        });

        assert!(matches!(
            log.last_reload(),
            Some(StatusEvent::ReloadFailed { generation: 1, .. })
        ));
    }

    #[test]
    fn test_subscriber_receives_events() {
        let log = StatusLog::default();
        let mut rx = log.subscribe();
        log.record(StatusEvent::ReloadStarted { generation: 7 });
        assert_eq!(rx.try_recv().unwrap(), StatusEvent::ReloadStarted { generation: 7 });
    }

    #[test]
    fn test_record_without_subscribers() {
        let log = StatusLog::default();
        log.record(StatusEvent::ReloadStarted { generation: 1 });
        assert_eq!(log.len(), 1);
        assert!(!log.is_empty());
    }
}
