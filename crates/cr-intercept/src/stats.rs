//! Usage statistics dispatch
//!
//! Stats are fire-and-forget. The interceptor pushes events into a bounded
//! queue without waiting; a background task drains the queue into the
//! [`StatsRecorder`]. A full or closed queue drops the event.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::error::StatsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsKind {
    /// A contained tab was created
    Open,
    /// A rule decided a navigation
    Match,
    /// A contained tab was closed
    Close,
    /// A navigation stayed in its container
    Touch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEvent {
    pub container_id: String,
    pub kind: StatsKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn record(&self, event: StatsEvent) -> Result<(), StatsError>;
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Non-blocking handle onto the stats queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatsDispatcher {
    tx: mpsc::Sender<StatsEvent>,
}

impl StatsDispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatsEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create a dispatcher drained into `recorder` by a spawned task.
    ///
    /// The task ends once every dispatcher clone has been dropped.
    pub fn spawn<R>(recorder: Arc<R>, capacity: usize) -> (Self, JoinHandle<()>)
    where
        R: StatsRecorder + ?Sized + 'static,
    {
        let (dispatcher, rx) = Self::channel(capacity);
        let handle = tokio::spawn(drain(recorder, rx));
        (dispatcher, handle)
    }

    /// A dispatcher that drops everything.
    pub fn disabled() -> Self {
        Self::channel(1).0
    }

    /// True once the draining side is gone; events are dropped from then on.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn record(&self, container_id: impl Into<String>, kind: StatsKind) {
        self.send(StatsEvent {
            container_id: container_id.into(),
            kind,
            metadata: None,
        });
    }

    pub fn send(&self, event: StatsEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("Stats queue full, dropping {:?} event", event.kind);
            }
            Err(TrySendError::Closed(event)) => {
                log::debug!("Stats queue closed, dropping {:?} event", event.kind);
            }
        }
    }
}

/// Forward queued events to `recorder` until the queue closes.
pub async fn drain<R>(recorder: Arc<R>, mut rx: mpsc::Receiver<StatsEvent>)
where
    R: StatsRecorder + ?Sized,
{
    while let Some(event) = rx.recv().await {
        let kind = event.kind;
        if let Err(e) = recorder.record(event).await {
            log::debug!("Failed to record {kind:?} stats: {e}");
        }
    }
}

// =============================================================================
// Memory Recorder
// =============================================================================

/// Recorder that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryStatsRecorder {
    events: Mutex<Vec<StatsEvent>>,
}

impl MemoryStatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatsEvent> {
        self.events.lock().clone()
    }

    /// Number of `kind` events recorded for `container_id`.
    pub fn count(&self, container_id: &str, kind: StatsKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind && event.container_id == container_id)
            .count()
    }
}

#[async_trait]
impl StatsRecorder for MemoryStatsRecorder {
    async fn record(&self, event: StatsEvent) -> Result<(), StatsError> {
        self.events.lock().push(event);
        Ok(())
    }
}
