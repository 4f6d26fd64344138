//! Delayed-send scheduling.
//!
//! `<send delay=…>` does not leave the loop immediately: the send is
//! parked here with its deadline and delivered when the loop's suspension
//! point observes the deadline pass. `<cancel sendid=…>` removes parked
//! sends before they fire. The scheduler is loop-owned and needs no
//! synchronization.

use crate::event::Event;
use tokio::time::Instant;

/// A parked `<send>` with its delivery deadline.
#[derive(Debug, Clone)]
pub struct ScheduledSend {
    /// Send id, the cancellation key.
    pub sendid: String,
    /// Delivery target; `None` addresses the session's external queue.
    pub target: Option<String>,
    /// The event to deliver.
    pub event: Event,
    /// When to deliver.
    pub deadline: Instant,
}

/// Deadline-ordered store of parked sends.
#[derive(Debug, Default)]
pub struct SendScheduler {
    pending: Vec<ScheduledSend>,
}

impl SendScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a send until `deadline`.
    pub fn schedule(
        &mut self,
        sendid: String,
        target: Option<String>,
        event: Event,
        deadline: Instant,
    ) {
        self.pending.push(ScheduledSend {
            sendid,
            target,
            event,
            deadline,
        });
    }

    /// Remove every parked send with the given id. Returns whether any
    /// was removed.
    pub fn cancel(&mut self, sendid: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|s| s.sendid != sendid);
        self.pending.len() != before
    }

    /// The earliest pending deadline, if any send is parked.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|s| s.deadline).min()
    }

    /// Remove and return every send due at `now`, ordered by deadline
    /// (ties keep scheduling order).
    pub fn take_due(&mut self, now: Instant) -> Vec<ScheduledSend> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].deadline <= now {
                due.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|s| s.deadline);
        due
    }

    /// Number of parked sends.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
