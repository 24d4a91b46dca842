//! pghoney-core: protocol library for the PostgreSQL decoy.
//!
//! Provides the wire codec, protocol constants, byte-exact reply frames,
//! startup packet parsing, the user registry, and the per-connection
//! handshake state machine. Nothing here touches a socket.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod response;
pub mod session;
pub mod startup;

// Re-export commonly used items at crate root.
pub use codec::{FrameReader, FrameWriter};
pub use error::{HoneyError, HoneyResult};
pub use protocol::MAX_PACKET_SIZE;
pub use registry::UserRegistry;
pub use session::{AuthMode, Credential, Handshake, SessionEvent, SessionState, Step};
pub use startup::{inferred_length, StartupParameters};
