//! hpfeeds publisher.
//!
//! Wire format: `[4-byte big-endian total length][1-byte opcode][payload]`,
//! where the length covers the header too. Short strings inside payloads are
//! prefixed with a one-byte length.
//!
//! Client flow: connect, read the broker's INFO (name + nonce), answer with
//! AUTH (`ident`, `SHA-1(nonce || secret)`), then PUBLISH freely. The broker
//! only speaks again to report an ERROR, after which it drops the link.

use super::forwarder::Disconnected;
use super::FeedSink;
use pghoney_core::{FrameReader, HoneyError, HoneyResult};
use sha1::{Digest, Sha1};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const OP_ERROR: u8 = 0;
pub const OP_INFO: u8 = 1;
pub const OP_AUTH: u8 = 2;
pub const OP_PUBLISH: u8 = 3;

const HEADER_LEN: usize = 5;

/// Largest inbound message accepted from a broker (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// How long connect + INFO may take before the attempt counts as failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long one publish may wait on a broker that has stopped reading.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame `payload` under `op`.
pub fn encode_message(op: u8, payload: &[u8]) -> Vec<u8> {
    let len = (HEADER_LEN + payload.len()) as u32;
    let mut msg = Vec::with_capacity(HEADER_LEN + payload.len());
    msg.extend_from_slice(&len.to_be_bytes());
    msg.push(op);
    msg.extend_from_slice(payload);
    msg
}

fn push_short(buf: &mut Vec<u8>, field: &'static str, value: &[u8]) -> HoneyResult<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| HoneyError::Feed(format!("{field} longer than 255 bytes")))?;
    buf.push(len);
    buf.extend_from_slice(value);
    Ok(())
}

/// AUTH message answering the broker's `nonce`.
pub fn encode_auth(ident: &str, nonce: &[u8], secret: &str) -> HoneyResult<Vec<u8>> {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();

    let mut payload = Vec::with_capacity(1 + ident.len() + digest.len());
    push_short(&mut payload, "ident", ident.as_bytes())?;
    payload.extend_from_slice(&digest);
    Ok(encode_message(OP_AUTH, &payload))
}

pub fn encode_publish(ident: &str, channel: &str, data: &[u8]) -> HoneyResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(2 + ident.len() + channel.len() + data.len());
    push_short(&mut payload, "ident", ident.as_bytes())?;
    push_short(&mut payload, "channel", channel.as_bytes())?;
    payload.extend_from_slice(data);
    Ok(encode_message(OP_PUBLISH, &payload))
}

/// Broker greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub nonce: Vec<u8>,
}

pub fn decode_info(payload: &[u8]) -> HoneyResult<Info> {
    let mut r = FrameReader::new(payload);
    let name_len = r.read_byte()? as usize;
    let name = String::from_utf8_lossy(r.read_bytes(name_len)?).into_owned();
    let nonce = r.read_bytes(r.remaining())?.to_vec();
    Ok(Info { name, nonce })
}

/// Read one message, returning its opcode and payload.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> HoneyResult<(u8, Vec<u8>)> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if !(HEADER_LEN..=MAX_MESSAGE_SIZE).contains(&len) {
        return Err(HoneyError::Feed(format!("bad hpfeeds message length {len}")));
    }
    let mut payload = vec![0u8; len - HEADER_LEN];
    reader.read_exact(&mut payload).await?;
    Ok((header[4], payload))
}

/// [`FeedSink`] backed by an hpfeeds broker.
pub struct HpfeedsSink {
    host: String,
    port: u16,
    ident: String,
    secret: String,
    publish_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
}

impl HpfeedsSink {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        ident: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            ident: ident.into(),
            secret: secret.into(),
            publish_timeout: PUBLISH_TIMEOUT,
            writer: None,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    async fn handshake(&self) -> HoneyResult<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (mut reader, mut writer) = stream.into_split();

        let (op, payload) = read_message(&mut reader).await?;
        match op {
            OP_INFO => {}
            OP_ERROR => {
                return Err(HoneyError::Feed(format!(
                    "broker error: {}",
                    String::from_utf8_lossy(&payload)
                )))
            }
            other => {
                return Err(HoneyError::Feed(format!(
                    "expected INFO from broker, got opcode {other}"
                )))
            }
        }
        let info = decode_info(&payload)?;
        debug!(broker = %info.name, "received hpfeeds info");

        writer
            .write_all(&encode_auth(&self.ident, &info.nonce, &self.secret)?)
            .await?;
        Ok((reader, writer))
    }
}

impl FeedSink for HpfeedsSink {
    async fn connect(&mut self) -> HoneyResult<Disconnected> {
        self.writer = None;
        let (reader, writer) = tokio::time::timeout(CONNECT_TIMEOUT, self.handshake())
            .await
            .map_err(|_| HoneyError::Timeout)??;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(watch_link(reader, tx));
        self.writer = Some(writer);
        Ok(rx)
    }

    async fn publish(&mut self, channel: &str, payload: &[u8]) -> HoneyResult<()> {
        let msg = encode_publish(&self.ident, channel, payload)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| HoneyError::Feed("not connected".into()))?;
        let written = tokio::time::timeout(self.publish_timeout, writer.write_all(&msg)).await;
        match written {
            Ok(Ok(())) => Ok(()),
            // a partial message may be on the wire; the link is unusable either way
            Ok(Err(e)) => {
                self.writer = None;
                Err(e.into())
            }
            Err(_) => {
                self.writer = None;
                Err(HoneyError::Timeout)
            }
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read from the broker until it errors or hangs up, then fire the signal.
async fn watch_link(mut reader: OwnedReadHalf, mut tx: oneshot::Sender<()>) {
    loop {
        tokio::select! {
            msg = read_message(&mut reader) => match msg {
                Ok((OP_ERROR, payload)) => {
                    warn!(
                        error = %String::from_utf8_lossy(&payload),
                        "hpfeeds broker reported an error"
                    );
                    break;
                }
                Ok((op, _)) => debug!(op, "ignoring hpfeeds message"),
                Err(e) => {
                    debug!(error = %e, "hpfeeds link closed");
                    break;
                }
            },
            _ = tx.closed() => return,
        }
    }
    let _ = tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn message_length_includes_header() {
        assert_eq!(encode_message(OP_ERROR, b"no"), vec![0, 0, 0, 7, 0, b'n', b'o']);
    }

    #[test]
    fn auth_hashes_nonce_then_secret() {
        let msg = encode_auth("id", b"ab", "c").unwrap();
        // SHA-1("abc")
        let digest = hex::decode("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap();
        let mut expected = vec![0, 0, 0, 28, OP_AUTH, 2, b'i', b'd'];
        expected.extend_from_slice(&digest);
        assert_eq!(msg, expected);
    }

    #[test]
    fn publish_layout() {
        let msg = encode_publish("pg", "ch", b"{}").unwrap();
        assert_eq!(
            msg,
            vec![0, 0, 0, 13, OP_PUBLISH, 2, b'p', b'g', 2, b'c', b'h', b'{', b'}']
        );
    }

    #[test]
    fn oversized_channel_is_rejected() {
        let channel = "c".repeat(256);
        assert!(matches!(
            encode_publish("pg", &channel, b""),
            Err(HoneyError::Feed(_))
        ));
    }

    #[test]
    fn info_round_trip() {
        let info = decode_info(&[6, b'b', b'r', b'o', b'k', b'e', b'r', 1, 2, 3, 4]).unwrap();
        assert_eq!(info.name, "broker");
        assert_eq!(info.nonce, vec![1, 2, 3, 4]);
        assert!(decode_info(&[9, b'x']).is_err());
    }

    #[tokio::test]
    async fn rejects_bad_lengths() {
        let mut short: &[u8] = &[0, 0, 0, 2, OP_INFO];
        assert!(read_message(&mut short).await.is_err());
        let mut huge: &[u8] = &[0xff, 0, 0, 0, OP_INFO];
        assert!(read_message(&mut huge).await.is_err());
    }

    #[tokio::test]
    async fn authenticates_publishes_and_notices_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut info = vec![6];
            info.extend_from_slice(b"broker");
            info.extend_from_slice(&[9, 8, 7, 6]);
            sock.write_all(&encode_message(OP_INFO, &info)).await.unwrap();

            let auth = read_message(&mut sock).await.unwrap();
            let publish = read_message(&mut sock).await.unwrap();
            (auth, publish)
            // sock dropped here: the client must notice
        });

        let mut sink = HpfeedsSink::new("127.0.0.1", port, "sensor", "secret");
        let disconnected = sink.connect().await.unwrap();
        sink.publish("pghoney.events", b"{\"k\":1}").await.unwrap();

        let ((auth_op, auth), (pub_op, publish)) = broker.await.unwrap();
        assert_eq!(auth_op, OP_AUTH);
        let expected_auth = encode_auth("sensor", &[9, 8, 7, 6], "secret").unwrap();
        assert_eq!(auth, expected_auth[HEADER_LEN..].to_vec());

        assert_eq!(pub_op, OP_PUBLISH);
        let expected_pub = encode_publish("sensor", "pghoney.events", b"{\"k\":1}").unwrap();
        assert_eq!(publish, expected_pub[HEADER_LEN..].to_vec());

        tokio::time::timeout(Duration::from_secs(5), disconnected)
            .await
            .expect("hangup should be signalled")
            .unwrap();
    }

    #[tokio::test]
    async fn stalled_broker_times_out_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut info = vec![1, b'b'];
            info.extend_from_slice(&[1, 2, 3, 4]);
            sock.write_all(&encode_message(OP_INFO, &info)).await.unwrap();
            read_message(&mut sock).await.unwrap();
            // keep the socket open without reading until the test is done
            let _ = stop_rx.await;
        });

        let mut sink = HpfeedsSink::new("127.0.0.1", port, "sensor", "secret")
            .with_publish_timeout(Duration::from_millis(200));
        sink.connect().await.unwrap();

        let payload = vec![b'a'; 64 * 1024];
        let outcome = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Err(e) = sink.publish("ch", &payload).await {
                    return e;
                }
            }
        })
        .await
        .expect("publish should give up on a stalled broker");
        assert!(matches!(outcome, HoneyError::Timeout));
        assert!(sink.publish("ch", b"x").await.is_err());
        let _ = stop_tx.send(());
    }

    #[tokio::test]
    async fn broker_error_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&encode_message(OP_ERROR, b"go away")).await.unwrap();
        });

        let mut sink = HpfeedsSink::new("127.0.0.1", port, "sensor", "secret");
        let err = sink.connect().await.unwrap_err();
        assert!(err.to_string().contains("go away"));
        assert!(sink.publish("ch", b"x").await.is_err());
    }
}
