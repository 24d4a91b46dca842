//! Single-consumer publisher: drains the event queue into a [`FeedSink`],
//! reconnecting with linear backoff whenever the link fails.
//!
//! Events are not retried. A publish failure drops that event and tears the
//! link down; whatever piles up while reconnecting stays in the bounded queue
//! (or is dropped by the producers once it fills).

use super::backoff::LinearBackoff;
use super::TelemetryEvent;
use pghoney_core::HoneyResult;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Resolves once an established link has dropped. A dropped sender counts
/// as a disconnect too.
pub type Disconnected = oneshot::Receiver<()>;

/// An external collector.
#[allow(async_fn_in_trait)]
pub trait FeedSink: Send {
    /// Establish a link. The returned signal fires when it goes away.
    async fn connect(&mut self) -> HoneyResult<Disconnected>;

    /// Publish one payload on `channel` over the current link.
    async fn publish(&mut self, channel: &str, payload: &[u8]) -> HoneyResult<()>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// Why a connected pump stopped.
enum PumpExit {
    LinkLost,
    QueueClosed,
}

pub struct TelemetryForwarder<S> {
    sink: S,
    channel: String,
    events: mpsc::Receiver<TelemetryEvent>,
    backoff: LinearBackoff,
}

impl<S: FeedSink> TelemetryForwarder<S> {
    pub fn new(
        sink: S,
        channel: impl Into<String>,
        events: mpsc::Receiver<TelemetryEvent>,
        backoff: LinearBackoff,
    ) -> Self {
        Self {
            sink,
            channel: channel.into(),
            events,
            backoff,
        }
    }

    /// Run until every [`EventQueue`](super::EventQueue) is dropped or
    /// shutdown is signalled while waiting to reconnect.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(endpoint = %self.sink.endpoint(), "connecting to telemetry feed");
        loop {
            match self.sink.connect().await {
                Ok(disconnected) => {
                    info!(endpoint = %self.sink.endpoint(), "connected to telemetry feed");
                    self.backoff.reset();
                    match self.pump(disconnected).await {
                        PumpExit::QueueClosed => {
                            info!("telemetry queue closed, forwarder stopping");
                            return;
                        }
                        PumpExit::LinkLost => {
                            info!(
                                endpoint = %self.sink.endpoint(),
                                "lost connection to telemetry feed"
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.sink.endpoint(),
                        error = %e,
                        "telemetry feed connect failed"
                    );
                }
            }

            let delay = self.backoff.next_delay();
            info!(
                endpoint = %self.sink.endpoint(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting to telemetry feed"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, forwarder stopping");
                    return;
                }
            }
        }
    }

    async fn pump(&mut self, mut disconnected: Disconnected) -> PumpExit {
        loop {
            tokio::select! {
                biased;
                _ = &mut disconnected => return PumpExit::LinkLost,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return PumpExit::QueueClosed;
                    };
                    let payload = match event.to_json() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize telemetry event");
                            continue;
                        }
                    };
                    if let Err(e) = self.sink.publish(&self.channel, &payload).await {
                        warn!(error = %e, "telemetry publish failed, event dropped");
                        return PumpExit::LinkLost;
                    }
                    debug!(
                        channel = %self.channel,
                        bytes = payload.len(),
                        "published telemetry event"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::queue;
    use pghoney_core::HoneyError;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Record {
        connects: usize,
        published: Vec<(String, Vec<u8>)>,
        disconnect: Option<oneshot::Sender<()>>,
    }

    /// Fails the first `fail_connects` connects and, optionally, the publish
    /// with the given index.
    struct MockSink {
        fail_connects: usize,
        fail_publish_at: Option<usize>,
        record: Arc<Mutex<Record>>,
    }

    impl FeedSink for MockSink {
        async fn connect(&mut self) -> HoneyResult<Disconnected> {
            let mut record = self.record.lock().unwrap();
            record.connects += 1;
            if record.connects <= self.fail_connects {
                return Err(HoneyError::Feed("connection refused".into()));
            }
            let (tx, rx) = oneshot::channel();
            record.disconnect = Some(tx);
            Ok(rx)
        }

        async fn publish(&mut self, channel: &str, payload: &[u8]) -> HoneyResult<()> {
            let mut record = self.record.lock().unwrap();
            let attempt = record.published.len();
            if self.fail_publish_at == Some(attempt) {
                self.fail_publish_at = None;
                return Err(HoneyError::Feed("broken pipe".into()));
            }
            record.published.push((channel.to_string(), payload.to_vec()));
            Ok(())
        }

        fn endpoint(&self) -> String {
            "mock".to_string()
        }
    }

    fn event(port: u16) -> TelemetryEvent {
        TelemetryEvent::capture(
            b"hello",
            format!("198.51.100.1:{port}").parse().unwrap(),
            "198.51.100.2:5432".parse().unwrap(),
        )
    }

    fn source_port(payload: &[u8]) -> String {
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        value["source_port"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn reconnects_then_delivers_in_order() {
        let record = Arc::new(Mutex::new(Record::default()));
        let sink = MockSink {
            fail_connects: 3,
            fail_publish_at: None,
            record: record.clone(),
        };
        let (queue, rx) = queue::channel(8);
        for port in 1..=3 {
            assert!(queue.enqueue(event(port)));
        }
        drop(queue);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = TelemetryForwarder::new(
            sink,
            "pghoney.events",
            rx,
            LinearBackoff::new(Duration::from_millis(1)),
        );
        tokio::time::timeout(Duration::from_secs(5), forwarder.run(shutdown_rx))
            .await
            .expect("forwarder should stop once the queue is closed");

        let record = record.lock().unwrap();
        assert_eq!(record.connects, 4);
        let ports: Vec<String> = record.published.iter().map(|(_, p)| source_port(p)).collect();
        assert_eq!(ports, vec!["1", "2", "3"]);
        assert!(record.published.iter().all(|(c, _)| c == "pghoney.events"));
    }

    #[tokio::test]
    async fn failed_publish_drops_event_and_reconnects() {
        let record = Arc::new(Mutex::new(Record::default()));
        let sink = MockSink {
            fail_connects: 0,
            fail_publish_at: Some(1),
            record: record.clone(),
        };
        let (queue, rx) = queue::channel(8);
        for port in 1..=3 {
            queue.enqueue(event(port));
        }
        drop(queue);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = TelemetryForwarder::new(
            sink,
            "ch",
            rx,
            LinearBackoff::new(Duration::from_millis(1)),
        );
        tokio::time::timeout(Duration::from_secs(5), forwarder.run(shutdown_rx))
            .await
            .unwrap();

        let record = record.lock().unwrap();
        assert_eq!(record.connects, 2);
        let ports: Vec<String> = record.published.iter().map(|(_, p)| source_port(p)).collect();
        assert_eq!(ports, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn disconnect_signal_triggers_reconnect() {
        let record = Arc::new(Mutex::new(Record::default()));
        let sink = MockSink {
            fail_connects: 0,
            fail_publish_at: None,
            record: record.clone(),
        };
        let (queue, rx) = queue::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = TelemetryForwarder::new(
            sink,
            "ch",
            rx,
            LinearBackoff::new(Duration::from_millis(1)),
        );
        let handle = tokio::spawn(forwarder.run(shutdown_rx));

        wait_for(|| record.lock().unwrap().connects == 1).await;
        let tx = record.lock().unwrap().disconnect.take().unwrap();
        tx.send(()).unwrap();
        wait_for(|| record.lock().unwrap().connects == 2).await;

        queue.enqueue(event(9));
        wait_for(|| record.lock().unwrap().published.len() == 1).await;

        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let record = Arc::new(Mutex::new(Record::default()));
        let sink = MockSink {
            fail_connects: usize::MAX,
            fail_publish_at: None,
            record: record.clone(),
        };
        let (_queue, rx) = queue::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = TelemetryForwarder::new(
            sink,
            "ch",
            rx,
            LinearBackoff::new(Duration::from_secs(60)),
        );
        let handle = tokio::spawn(forwarder.run(shutdown_rx));

        wait_for(|| record.lock().unwrap().connects == 1).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
