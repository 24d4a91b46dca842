//! Per-connection handshake state machine.
//!
//! The machine is sans-io: the caller reads a window off the socket, hands it
//! to [`Handshake::handle_frame`], writes back [`Step::reply`] and logs
//! [`Step::event`]. Flow:
//!
//! 1. `AwaitingInitial`: an SSLRequest is refused with `N` and the state is
//!    kept; anything else is treated as a StartupMessage. Known users get an
//!    auth challenge, everyone else an error and the door.
//! 2. `AwaitingPassword`: a PasswordMessage is captured and answered with
//!    "Auth failed". Other messages are ignored.
//! 3. `Closed`: terminal.
//!
//! No path leads to a successful login.

use std::fmt;
use std::sync::Arc;

use crate::codec::FrameReader;
use crate::error::{HoneyError, HoneyResult};
use crate::protocol::{MD5_MARKER, MSG_PASSWORD, SSL_REQUEST};
use crate::registry::UserRegistry;
use crate::response;
use crate::startup::{parse_startup, StartupParameters};

/// Handshake phase. Ordered: a session only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    AwaitingInitial,
    AwaitingPassword,
    Closed,
}

impl SessionState {
    /// Transition table. Staying put is allowed, going back is not.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (AwaitingInitial, AwaitingInitial)
                | (AwaitingInitial, AwaitingPassword)
                | (AwaitingInitial, Closed)
                | (AwaitingPassword, AwaitingPassword)
                | (AwaitingPassword, Closed)
                | (Closed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

/// Which challenge known users receive. Chosen by configuration, never
/// negotiated with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Cleartext,
    Md5,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Cleartext => f.write_str("cleartext"),
            AuthMode::Md5 => f.write_str("md5"),
        }
    }
}

/// A password offered by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Cleartext(String),
    /// Hex digest following the `md5` marker.
    Md5Hash(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Cleartext(_) => "cleartext",
            Credential::Md5Hash(_) => "md5",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Credential::Cleartext(s) | Credential::Md5Hash(s) => s,
        }
    }
}

/// What a frame did to the session.
#[derive(Debug)]
pub enum SessionEvent {
    SslDenied,
    LengthMismatch { claimed: i32, inferred: usize },
    Malformed(HoneyError),
    UnknownUser { user: String },
    Challenged {
        user: String,
        mode: AuthMode,
        params: StartupParameters,
    },
    CredentialCaptured { user: String, credential: Credential },
    Ignored { tag: u8 },
}

/// Outcome of one frame: bytes to send back (possibly none) and the event.
#[derive(Debug)]
pub struct Step {
    pub reply: Vec<u8>,
    pub event: SessionEvent,
}

impl Step {
    fn reply(reply: Vec<u8>, event: SessionEvent) -> Self {
        Self { reply, event }
    }

    fn silent(event: SessionEvent) -> Self {
        Self {
            reply: Vec::new(),
            event,
        }
    }
}

/// `true` if the window opens with the 8-byte SSLRequest.
pub fn is_ssl_request(frame: &[u8]) -> bool {
    frame.len() >= SSL_REQUEST.len() && frame[..SSL_REQUEST.len()] == SSL_REQUEST
}

/// One connection's handshake.
#[derive(Debug)]
pub struct Handshake {
    state: SessionState,
    mode: AuthMode,
    salt: [u8; 4],
    registry: Arc<UserRegistry>,
    user: Option<String>,
}

impl Handshake {
    /// `salt` is only sent in [`AuthMode::Md5`].
    pub fn new(registry: Arc<UserRegistry>, mode: AuthMode, salt: [u8; 4]) -> Self {
        Self {
            state: SessionState::AwaitingInitial,
            mode,
            salt,
            registry,
            user: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    /// User named in an accepted startup message.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Consume one inbound window.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Step {
        match self.state {
            SessionState::AwaitingInitial => self.on_initial(frame),
            SessionState::AwaitingPassword => self.on_password(frame),
            SessionState::Closed => Step::silent(SessionEvent::Ignored {
                tag: frame.first().copied().unwrap_or(0),
            }),
        }
    }

    fn on_initial(&mut self, frame: &[u8]) -> Step {
        if is_ssl_request(frame) {
            return Step::reply(response::ssl_deny(), SessionEvent::SslDenied);
        }

        let packet = match parse_startup(frame) {
            Ok(packet) => packet,
            Err(HoneyError::LengthMismatch { claimed, inferred }) => {
                self.transition(SessionState::Closed);
                return Step::reply(
                    response::handshake_error(),
                    SessionEvent::LengthMismatch { claimed, inferred },
                );
            }
            Err(e) => {
                self.transition(SessionState::Closed);
                return Step::reply(response::handshake_error(), SessionEvent::Malformed(e));
            }
        };

        let user = packet.params.user().unwrap_or_default().to_string();
        if !self.registry.contains(&user) {
            self.transition(SessionState::Closed);
            return Step::reply(
                response::unknown_user_error(&user),
                SessionEvent::UnknownUser { user },
            );
        }

        self.transition(SessionState::AwaitingPassword);
        self.user = Some(user.clone());
        let challenge = match self.mode {
            AuthMode::Cleartext => response::cleartext_auth_challenge(),
            AuthMode::Md5 => response::md5_auth_challenge(self.salt),
        };
        Step::reply(
            challenge,
            SessionEvent::Challenged {
                user,
                mode: self.mode,
                params: packet.params,
            },
        )
    }

    fn on_password(&mut self, frame: &[u8]) -> Step {
        let mut r = FrameReader::new(frame);
        let tag = match r.read_byte() {
            Ok(tag) => tag,
            Err(e) => {
                self.transition(SessionState::Closed);
                return Step::silent(SessionEvent::Malformed(e));
            }
        };
        if tag != MSG_PASSWORD {
            return Step::silent(SessionEvent::Ignored { tag });
        }

        let credential = self.read_credential(&mut r);
        self.transition(SessionState::Closed);
        match credential {
            Ok(credential) => Step::reply(
                response::auth_failed_error(),
                SessionEvent::CredentialCaptured {
                    user: self.user.clone().unwrap_or_default(),
                    credential,
                },
            ),
            Err(e) => Step::silent(SessionEvent::Malformed(e)),
        }
    }

    fn read_credential(&self, r: &mut FrameReader<'_>) -> HoneyResult<Credential> {
        r.read_i32()?;
        match self.mode {
            AuthMode::Cleartext => Ok(Credential::Cleartext(r.read_string()?)),
            AuthMode::Md5 => {
                r.read_bytes(MD5_MARKER.len())?;
                Ok(Credential::Md5Hash(r.read_string()?))
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }
}
