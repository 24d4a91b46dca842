//! Bounded event queue between sessions and the forwarder.

use super::TelemetryEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Producer handle. Cheap to clone, one per session.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<TelemetryEvent>,
}

/// Create a queue holding at most `capacity` events.
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rules that out.
pub fn channel(capacity: usize) -> (EventQueue, mpsc::Receiver<TelemetryEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventQueue { tx }, rx)
}

impl EventQueue {
    /// Hand `event` to the forwarder without waiting.
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// the forwarder has gone away.
    pub fn enqueue(&self, event: TelemetryEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!("queued telemetry event");
                true
            }
            Err(TrySendError::Full(event)) => {
                warn!(
                    source_ip = %event.source_ip,
                    source_port = event.source_port,
                    "telemetry queue full, discarding event - check hpfeeds connectivity"
                );
                debug!(discarded = %hex::encode(&event.packet), "discarded window");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("telemetry forwarder stopped, event dropped");
                false
            }
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}
