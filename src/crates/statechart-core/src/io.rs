//! The event I/O processor seam for `<send>` delivery.
//!
//! The interpreter core generates and schedules outbound events but never
//! delivers them to external systems itself. A send whose target is
//! neither the internal queue (`#_internal`) nor the session's own
//! external queue (absent target) is handed to the run's
//! [`EventIoProcessor`], if one was configured. Delivery failures — no
//! processor, unknown target, transport error — are trapped into
//! `error.send.delivery-failed` platform events on the internal queue.

use crate::event::Event;
use async_trait::async_trait;
use thiserror::Error;

/// Send target addressing the session's own internal queue.
pub const TARGET_INTERNAL: &str = "#_internal";

/// Delivery failure reported by an I/O processor.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The processor does not handle the given target.
    #[error("no route to target '{0}'")]
    UnknownTarget(String),
    /// The processor handled the target but delivery failed.
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Pluggable delivery capability for externally targeted sends.
#[async_trait]
pub trait EventIoProcessor: Send + Sync {
    /// Deliver `event` to `target`.
    async fn deliver(&self, target: &str, event: Event) -> Result<(), DeliveryError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records delivered events for assertions.
    #[derive(Default)]
    pub struct RecordingIoProcessor {
        pub delivered: Mutex<Vec<(String, Event)>>,
        pub fail_targets: Vec<String>,
    }

    #[async_trait]
    impl EventIoProcessor for RecordingIoProcessor {
        async fn deliver(&self, target: &str, event: Event) -> Result<(), DeliveryError> {
            if self.fail_targets.iter().any(|t| t == target) {
                return Err(DeliveryError::Failed(format!("target '{target}' unreachable")));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((target.to_string(), event));
            Ok(())
        }
    }
}
