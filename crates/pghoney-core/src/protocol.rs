//! PostgreSQL v3 wire constants used by the decoy.
//!
//! The magic values and error texts below were captured from real server
//! traffic. Changing any byte makes the decoy fingerprintable.

/// Size of the receive window. Each read cycle inspects exactly this many
/// bytes, zero padded past whatever the peer sent.
pub const MAX_PACKET_SIZE: usize = 512;

/// SSLRequest: length 8 followed by request code 80877103 (`0x04D2162F`).
pub const SSL_REQUEST: [u8; 8] = [0x00, 0x00, 0x00, 0x08, 0x04, 0xD2, 0x16, 0x2F];

/// Single-byte answer refusing TLS.
pub const SSL_DENY: u8 = b'N';

// Message tags
pub const MSG_AUTH_REQUEST: u8 = b'R';
pub const MSG_ERROR_RESPONSE: u8 = b'E';
pub const MSG_PASSWORD: u8 = b'p';

// Authentication request codes (body of an 'R' frame)
pub const AUTH_CLEARTEXT_PASSWORD: i32 = 3;
pub const AUTH_MD5_PASSWORD: i32 = 5;

/// Marker prefixed to the hex digest in an MD5 password message.
pub const MD5_MARKER: &[u8; 3] = b"md5";

// Error field tags
pub const FIELD_SEVERITY: u8 = b'S';
pub const FIELD_CODE: u8 = b'C';
pub const FIELD_MESSAGE: u8 = b'M';
pub const FIELD_FILE: u8 = b'F';
pub const FIELD_LINE: u8 = b'L';
pub const FIELD_ROUTINE: u8 = b'R';

pub const SEVERITY_ERROR: &str = "ERROR";

/// SQLSTATE `protocol_violation`, used for both auth rejections.
pub const SQLSTATE_PROTOCOL_VIOLATION: &str = "08P01";
/// SQLSTATE `feature_not_supported`, used for the startup version error.
pub const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";

/// Protocol-version error as sent by a real postmaster to an nmap probe.
pub const HANDSHAKE_ERROR_MESSAGE: &str =
    "unsupported frontend protocol 65363.19778: server supports 1.0 to 3.0";
pub const HANDSHAKE_ERROR_FILE: &str = "postmaster.c";
pub const HANDSHAKE_ERROR_LINE: &str = "2005";
pub const HANDSHAKE_ERROR_ROUTINE: &str = "ProcessStartupPacket";

pub const AUTH_FAILED_MESSAGE: &str = "Auth failed";
pub const UNKNOWN_USER_PREFIX: &str = "No such user: ";

/// Startup parameter that names the connecting role.
pub const PARAM_USER: &str = "user";
