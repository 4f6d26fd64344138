//! Run options, run state, and the microstep history log.

use crate::configuration::ActiveConfiguration;
use crate::datamodel::DataStore;
use crate::eval::ExpressionEvaluator;
use crate::event::Event;
use crate::io::EventIoProcessor;
use crate::path::StatePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// Default bound on selection/microstep rounds per run, a backstop
/// against charts that never stabilize.
pub const DEFAULT_STEP_LIMIT: usize = 10_000;

/// What a [`HistoryEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    /// The startup entry set has been mounted.
    Startup,
    /// One microstep (exit set → transition actions → entry set) ran.
    Microstep,
}

/// One entry of the ordered microstep log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic sequence number within the run.
    pub id: u64,
    /// What this entry records.
    pub kind: HistoryKind,
    /// Active-configuration snapshot after the step, shallowest-first.
    pub configuration: Vec<String>,
    /// The event that drove the step, if any.
    pub event: Option<Event>,
    /// Wall-clock timestamp of the step.
    pub at: DateTime<Utc>,
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionReason {
    /// A top-level final state was entered.
    Final,
    /// The host signalled cancellation.
    Cancelled,
    /// The configured deadline passed before stability.
    TimedOut,
}

/// The result of driving a chart to termination.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Why the run ended.
    pub reason: CompletionReason,
    /// Final active configuration, snapshotted before the orderly
    /// unmount.
    pub configuration: Vec<String>,
    /// Final contents of the data store.
    pub data: Value,
    /// The ordered microstep log.
    pub history: Vec<HistoryEntry>,
}

/// Cooperative cancellation signal shared between host and loop.
///
/// Clonable and thread-safe; the host keeps one clone and calls
/// [`CancelHandle::cancel`], the loop awaits [`CancelHandle::cancelled`]
/// at its suspension points.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    /// A fresh, un-cancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Options for one run of a chart.
#[derive(Default)]
pub struct RunOptions {
    /// Deadline for the whole run; reached before stability, the run ends
    /// with [`CompletionReason::TimedOut`].
    pub timeout: Option<Duration>,
    /// Cancellation signal shared with the host.
    pub cancel: Option<CancelHandle>,
    /// Observer channel receiving every history entry as it is recorded.
    pub event_sink: Option<UnboundedSender<HistoryEntry>>,
    /// Delivery capability for externally targeted sends.
    pub io_processor: Option<Arc<dyn EventIoProcessor>>,
    /// Expression evaluator override; defaults to the evaluator implied
    /// by the chart's datamodel kind.
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    /// Override for the selection/microstep round backstop.
    pub step_limit: Option<usize>,
}

impl RunOptions {
    /// Options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation handle.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach a history observer.
    pub fn with_event_sink(mut self, sink: UnboundedSender<HistoryEntry>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Attach an I/O processor for external sends.
    pub fn with_io_processor(mut self, io: Arc<dyn EventIoProcessor>) -> Self {
        self.io_processor = Some(io);
        self
    }

    /// Override the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
}

/// The loop-owned mutable state of one run.
#[derive(Debug, Default)]
pub struct RunState {
    /// The data store.
    pub store: DataStore,
    /// The active configuration.
    pub configuration: ActiveConfiguration,
    /// The internal event queue, drained before any external event.
    pub internal: VecDeque<Event>,
    /// Per-history-pseudo-state configuration snapshots.
    pub history_values: HashMap<StatePath, Vec<StatePath>>,
}
