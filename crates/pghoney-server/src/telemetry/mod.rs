//! Telemetry pipeline: captured windows flow from sessions to an external
//! collector without ever blocking a session.
//!
//! # Submodule Architecture
//!
//! - **[`queue`]**: the bounded multi-producer queue. Sessions hold an
//!   [`EventQueue`] and enqueue with `try_send`; a full queue drops the new
//!   event and logs a warning.
//! - **[`forwarder`]**: the single consumer. [`TelemetryForwarder`] keeps a
//!   [`FeedSink`] connected, publishes events in FIFO order, and reconnects
//!   with a [`LinearBackoff`] on failure.
//! - **[`backoff`]**: the reconnect delay schedule.
//! - **[`hpfeeds`]**: [`HpfeedsSink`], the concrete sink speaking the
//!   hpfeeds broker protocol.
//!
//! # Data Flow
//!
//! ```text
//! connection loop
//!   → TelemetryEvent::capture
//!   → EventQueue::enqueue (never blocks)
//!     → TelemetryForwarder::run
//!       → FeedSink::publish(channel, json)
//! ```

pub mod backoff;
pub mod forwarder;
pub mod hpfeeds;
pub mod queue;

pub use backoff::LinearBackoff;
pub use forwarder::{FeedSink, TelemetryForwarder};
pub use hpfeeds::HpfeedsSink;
pub use queue::EventQueue;

use base64::Engine;
use serde::{Serialize, Serializer};
use std::net::{IpAddr, SocketAddr};

/// One inbound window and the endpoints it travelled between.
///
/// Serializes to the collector's document shape: packet as standard base64,
/// addresses and ports as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    #[serde(serialize_with = "as_base64")]
    pub packet: Vec<u8>,
    pub source_ip: IpAddr,
    #[serde(serialize_with = "as_string")]
    pub source_port: u16,
    pub dest_ip: IpAddr,
    #[serde(serialize_with = "as_string")]
    pub dest_port: u16,
}

impl TelemetryEvent {
    /// Copy `window` into a new event.
    pub fn capture(window: &[u8], source: SocketAddr, dest: SocketAddr) -> Self {
        Self {
            packet: window.to_vec(),
            source_ip: source.ip(),
            source_port: source.port(),
            dest_ip: dest.ip(),
            dest_port: dest.port(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn as_string<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(port)
}
