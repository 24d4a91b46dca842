//! Connection supervisor: owns the listener, spawns one task per accepted
//! socket and drains them on shutdown.

use crate::config::ServerConfig;
use crate::connection::{handle_connection, SessionContext};
use crate::telemetry::EventQueue;
use pghoney_core::{HoneyResult, UserRegistry};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Live connection count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn acquire(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            counter: self.active.clone(),
        }
    }

    /// Approximate under concurrent acquire/release. For logs and tests.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// RAII guard that decrements the counter when dropped.
///
/// Owns an `Arc<AtomicUsize>` so it can move into the connection task.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The decoy listener.
pub struct DecoyServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    connection_timeout: Duration,
    shutdown_grace: Option<Duration>,
    tracker: ConnectionTracker,
}

impl DecoyServer {
    /// Bind the listening socket. This is the only fatal step.
    pub async fn bind(
        config: &ServerConfig,
        registry: Arc<UserRegistry>,
        events: Option<EventQueue>,
    ) -> HoneyResult<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(
            addr = %listener.local_addr()?,
            users = registry.len(),
            auth_mode = %config.auth_mode,
            telemetry = events.is_some(),
            "decoy listening"
        );
        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext {
                registry,
                mode: config.auth_mode,
                events,
            }),
            connection_timeout: config.connection_timeout,
            shutdown_grace: config.shutdown_grace,
            tracker: ConnectionTracker::default(),
        })
    }

    pub fn local_addr(&self) -> HoneyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the live connection count that outlives [`run`](Self::run).
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` flips to `true` (or its sender is dropped),
    /// then drain in-flight connections.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let deadline = Instant::now() + self.connection_timeout;
                        let guard = self.tracker.acquire();
                        let ctx = self.ctx.clone();
                        let span = info_span!(
                            "session",
                            source_ip = %peer.ip(),
                            source_port = peer.port()
                        );
                        tasks.spawn(
                            async move {
                                let _guard = guard;
                                debug!("accepted connection");
                                handle_connection(stream, peer, deadline, ctx).await;
                                debug!("connection closed");
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        info!(in_flight = tasks.len(), "stopped accepting, draining connections");

        match self.shutdown_grace {
            None => {
                while let Some(joined) = tasks.join_next().await {
                    reap(joined);
                }
            }
            Some(grace) => {
                let drained = tokio::time::timeout(grace, async {
                    while let Some(joined) = tasks.join_next().await {
                        reap(joined);
                    }
                })
                .await;
                if drained.is_err() {
                    warn!(remaining = tasks.len(), "shutdown grace expired, aborting connections");
                    tasks.shutdown().await;
                }
            }
        }
        info!("all connections closed");
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!(error = %e, "connection task panicked");
        }
    }
}
