//! Per-connection I/O loop.
//!
//! Each accepted socket runs [`handle_connection`] in its own task. The loop
//! reads one zero-padded window at a time, mirrors it to telemetry, feeds it
//! to the [`Handshake`] and writes the reply. Every read and write is bounded
//! by the single deadline fixed at accept time.

use crate::telemetry::{EventQueue, TelemetryEvent};
use pghoney_core::{AuthMode, Handshake, SessionEvent, UserRegistry, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Read-only state shared by every connection.
#[derive(Debug)]
pub struct SessionContext {
    pub registry: Arc<UserRegistry>,
    pub mode: AuthMode,
    /// `None` when telemetry is disabled.
    pub events: Option<EventQueue>,
}

/// Drive one connection until the handshake closes, the peer hangs up,
/// the deadline passes, or the socket fails.
///
/// Expected to run inside the caller's `session` span.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    deadline: Instant,
    ctx: Arc<SessionContext>,
) {
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, "could not read local address");
            return;
        }
    };

    let mut handshake = Handshake::new(ctx.registry.clone(), ctx.mode, rand::random());
    let mut window = [0u8; MAX_PACKET_SIZE];

    loop {
        window.fill(0);
        let n = match timeout_at(deadline, stream.read(&mut window)).await {
            Err(_) => {
                info!("connection deadline reached");
                break;
            }
            Ok(Ok(0)) => {
                debug!("peer closed connection");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        debug!(bytes = n, packet = %hex::encode(&window[..n]), "received");

        if let Some(events) = &ctx.events {
            events.enqueue(TelemetryEvent::capture(&window, peer, local));
        }

        let step = handshake.handle_frame(&window);
        log_event(&step.event);

        if !step.reply.is_empty() {
            match timeout_at(deadline, stream.write_all(&step.reply)).await {
                Err(_) => {
                    info!("connection deadline reached");
                    break;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "write failed");
                    break;
                }
                Ok(Ok(())) => debug!(bytes = step.reply.len(), "replied"),
            }
        }

        if handshake.is_closed() {
            debug!("handshake closed");
            break;
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::SslDenied => info!("refused SSL request"),
        SessionEvent::LengthMismatch { claimed, inferred } => {
            info!(claimed, inferred, "startup length mismatch")
        }
        SessionEvent::Malformed(e) => info!(error = %e, "malformed message"),
        SessionEvent::UnknownUser { user } => info!(user = %user, "rejected unknown user"),
        SessionEvent::Challenged { user, mode, params } => info!(
            user = %user,
            auth_mode = %mode,
            database = params.get("database").unwrap_or_default(),
            application_name = params.get("application_name").unwrap_or_default(),
            "sent auth challenge"
        ),
        SessionEvent::CredentialCaptured { user, credential } => info!(
            user = %user,
            credential_kind = credential.kind(),
            credential = credential.value(),
            "captured credential"
        ),
        SessionEvent::Ignored { tag } => debug!(tag = %char::from(*tag), "ignored message"),
    }
}
