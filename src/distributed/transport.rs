//! Frame transport over a byte stream
//!
//! The handshake protocol is self-delimiting (byte 0 carries the frame length),
//! so reading is a matter of buffering until a whole frame is present. The
//! reader only ever calls `read()` on the underlying stream and keeps partial
//! frames in its own buffer, which makes [`FrameReader::read_message`] safe to
//! race inside `tokio::select!`.

use super::protocol::{self, HandshakeMessage, ProtocolError, HEADER_LEN, MIN_FRAME_LEN};
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffered, cancel-safe frame reader
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(256),
        }
    }

    /// Read the next complete message
    ///
    /// End of stream and malformed frames are errors; neither is recoverable.
    pub async fn read_message(&mut self) -> Result<HandshakeMessage> {
        loop {
            if let Some(msg) = self.take_frame()? {
                return Ok(msg);
            }

            let mut chunk = [0u8; 256];
            let n = self
                .inner
                .read(&mut chunk)
                .await
                .context("Failed to read from peer")?;
            if n == 0 {
                if self.buf.is_empty() {
                    anyhow::bail!("Peer closed the connection");
                }
                anyhow::bail!(
                    "Peer closed the connection mid-frame ({} bytes buffered)",
                    self.buf.len()
                );
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Decode one frame from the buffer if a whole one is present
    fn take_frame(&mut self) -> Result<Option<HandshakeMessage>, ProtocolError> {
        let Some(&declared) = self.buf.first() else {
            return Ok(None);
        };
        let declared = declared as usize;
        if declared < MIN_FRAME_LEN {
            // Not a length any valid frame can carry; wait for the header so the
            // error names what we saw
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            return Err(ProtocolError::InvalidLength { declared });
        }
        if self.buf.len() < declared {
            return Ok(None);
        }

        let msg = protocol::decode(&self.buf[..declared])?;
        self.buf.drain(..declared);
        Ok(Some(msg))
    }
}

/// Encode and write one message, flushing immediately
pub async fn send_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &HandshakeMessage,
) -> Result<()> {
    let frame = protocol::encode(msg).context("Failed to encode message")?;

    writer
        .write_all(&frame)
        .await
        .context("Failed to write message")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TestStatus;
    use crate::distributed::protocol::MessageBody;

    #[tokio::test]
    async fn test_reads_back_to_back_frames() {
        let (client, server) = tokio::io::duplex(64);
        let (_, mut writer) = tokio::io::split(client);
        let (reader, _) = tokio::io::split(server);
        let mut reader = FrameReader::new(reader);

        send_message(&mut writer, &HandshakeMessage::new(1, MessageBody::Hello)).await.unwrap();
        send_message(&mut writer, &HandshakeMessage::new(1, MessageBody::SuiteName("S1".into())))
            .await
            .unwrap();
        send_message(&mut writer, &HandshakeMessage::new(1, MessageBody::Status(TestStatus::Found)))
            .await
            .unwrap();

        assert_eq!(reader.read_message().await.unwrap().body, MessageBody::Hello);
        assert_eq!(reader.read_message().await.unwrap().body, MessageBody::SuiteName("S1".into()));
        assert_eq!(
            reader.read_message().await.unwrap().body,
            MessageBody::Status(TestStatus::Found)
        );
    }

    #[tokio::test]
    async fn test_split_frame_is_reassembled() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let msg = HandshakeMessage::new(3, MessageBody::CaseName("CASE".into()));
        let frame = protocol::encode(&msg).unwrap();
        let (a, b) = frame.split_at(4);
        client.write_all(a).await.unwrap();
        client.flush().await.unwrap();

        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_message())
                .await;
        assert!(pending.is_err(), "partial frame must not decode");

        client.write_all(b).await.unwrap();
        let msg = reader.read_message().await.unwrap();
        assert_eq!(msg.peer_id, 3);
        assert_eq!(msg.body, MessageBody::CaseName("CASE".into()));
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_fatal() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let mut frame = protocol::encode(&HandshakeMessage::new(1, MessageBody::Ack)).unwrap();
        frame[1] ^= 0xFF;
        client.write_all(&frame).await.unwrap();

        let err = reader.read_message().await.unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[tokio::test]
    async fn test_eof_is_fatal() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);
        drop(client);
        assert!(reader.read_message().await.is_err());
    }
}
