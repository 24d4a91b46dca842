//! Reply frames, byte-for-byte what a real server sends at this stage of the
//! handshake.
//!
//! Reference: <https://www.postgresql.org/docs/current/protocol-error-fields.html>

use crate::codec::FrameWriter;
use crate::protocol::*;

/// Refuse an SSLRequest. Unframed single byte.
pub fn ssl_deny() -> Vec<u8> {
    vec![SSL_DENY]
}

/// AuthenticationCleartextPassword.
pub fn cleartext_auth_challenge() -> Vec<u8> {
    let mut w = FrameWriter::new();
    let mark = w.begin_frame(MSG_AUTH_REQUEST);
    w.write_i32(AUTH_CLEARTEXT_PASSWORD);
    w.end_frame(mark);
    w.into_bytes()
}

/// AuthenticationMD5Password carrying the salt the client must hash with.
pub fn md5_auth_challenge(salt: [u8; 4]) -> Vec<u8> {
    let mut w = FrameWriter::new();
    let mark = w.begin_frame(MSG_AUTH_REQUEST);
    w.write_i32(AUTH_MD5_PASSWORD);
    w.write_bytes(&salt);
    w.end_frame(mark);
    w.into_bytes()
}

/// ErrorResponse with the given `(field tag, text)` pairs, in order.
pub fn error_response(fields: &[(u8, &str)]) -> Vec<u8> {
    let mut w = FrameWriter::new();
    let mark = w.begin_frame(MSG_ERROR_RESPONSE);
    for (tag, text) in fields {
        w.write_byte(*tag);
        w.write_string(text);
    }
    w.write_byte(0);
    w.end_frame(mark);
    w.into_bytes()
}

/// Answer to a startup packet whose length doesn't check out.
pub fn handshake_error() -> Vec<u8> {
    error_response(&[
        (FIELD_SEVERITY, SEVERITY_ERROR),
        (FIELD_CODE, SQLSTATE_FEATURE_NOT_SUPPORTED),
        (FIELD_MESSAGE, HANDSHAKE_ERROR_MESSAGE),
        (FIELD_FILE, HANDSHAKE_ERROR_FILE),
        (FIELD_LINE, HANDSHAKE_ERROR_LINE),
        (FIELD_ROUTINE, HANDSHAKE_ERROR_ROUTINE),
    ])
}

pub fn unknown_user_error(user: &str) -> Vec<u8> {
    let message = format!("{UNKNOWN_USER_PREFIX}{user}");
    auth_error(&message)
}

pub fn auth_failed_error() -> Vec<u8> {
    auth_error(AUTH_FAILED_MESSAGE)
}

fn auth_error(message: &str) -> Vec<u8> {
    error_response(&[
        (FIELD_SEVERITY, SEVERITY_ERROR),
        (FIELD_CODE, SQLSTATE_PROTOCOL_VIOLATION),
        (FIELD_MESSAGE, message),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameReader;

    fn framed(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    /// Split an ErrorResponse back into its fields.
    fn parse_error(frame: &[u8]) -> (i32, Vec<(u8, String)>) {
        let mut r = FrameReader::new(frame);
        assert_eq!(r.read_byte().unwrap(), MSG_ERROR_RESPONSE);
        let len = r.read_i32().unwrap();
        let mut fields = Vec::new();
        loop {
            let tag = r.read_byte().unwrap();
            if tag == 0 {
                break;
            }
            fields.push((tag, r.read_string().unwrap()));
        }
        assert_eq!(r.remaining(), 0);
        (len, fields)
    }

    #[test]
    fn ssl_deny_is_a_bare_n() {
        assert_eq!(ssl_deny(), b"N");
    }

    #[test]
    fn cleartext_challenge_bytes() {
        assert_eq!(
            cleartext_auth_challenge(),
            vec![b'R', 0, 0, 0, 8, 0, 0, 0, 3]
        );
    }

    #[test]
    fn md5_challenge_bytes() {
        assert_eq!(
            md5_auth_challenge([0x33, 0x6f, 0xbf, 0xd2]),
            vec![b'R', 0, 0, 0, 12, 0, 0, 0, 5, 0x33, 0x6f, 0xbf, 0xd2]
        );
    }

    #[test]
    fn handshake_error_matches_capture() {
        let body: &[u8] = b"SERROR\0\
C0A000\0\
Munsupported frontend protocol 65363.19778: server supports 1.0 to 3.0\0\
Fpostmaster.c\0\
L2005\0\
RProcessStartupPacket\0\
\0";
        assert_eq!(handshake_error(), framed(b'E', body));
    }

    #[test]
    fn auth_failed_matches_capture() {
        let body: &[u8] = b"SERROR\0C08P01\0MAuth failed\0\0";
        assert_eq!(auth_failed_error(), framed(b'E', body));
        assert_eq!(auth_failed_error().len(), 1 + 4 + body.len());
    }

    #[test]
    fn unknown_user_names_the_user() {
        let body: &[u8] = b"SERROR\0C08P01\0MNo such user: mallory\0\0";
        assert_eq!(unknown_user_error("mallory"), framed(b'E', body));
    }

    #[test]
    fn error_response_parses_back_in_order() {
        let fields = [
            (b'S', "FATAL"),
            (b'C', "28P01"),
            (b'M', "password authentication failed"),
            (b'H', ""),
        ];
        let frame = error_response(&fields);
        let (len, parsed) = parse_error(&frame);
        assert_eq!(len as usize, frame.len() - 1);
        let expected: Vec<(u8, String)> =
            fields.iter().map(|(t, s)| (*t, s.to_string())).collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn handshake_error_parses_back() {
        let frame = handshake_error();
        let (len, fields) = parse_error(&frame);
        assert_eq!(len as usize, frame.len() - 1);
        let tags: Vec<u8> = fields.iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, b"SCMFLR".to_vec());
        assert_eq!(fields[5].1, "ProcessStartupPacket");
    }
}
