//! Packet I/O over async byte streams
//!
//! Wraps the read and write halves of a broker connection so both the
//! arbiter and the console speak whole packets instead of bytes.

use crate::codec::{self, CodecError, FrameDecoder, Packet};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection closed by peer")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Reads whole packets from a byte stream
pub struct PacketReader<R> {
    inner: R,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next packet. Cancel-safe: partial data stays buffered.
    pub async fn read_packet(&mut self) -> Result<Packet, StreamError> {
        loop {
            if let Some(packet) = self.decoder.decode_next()? {
                return Ok(packet);
            }
            let n = self.inner.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(StreamError::Closed);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

/// Writes packets to a byte stream
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), StreamError> {
        let encoded = codec::encode(packet)?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write side of the stream
    pub async fn close(&mut self) -> Result<(), StreamError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Publish;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_packets_cross_the_stream() {
        let (client, server) = duplex(64);
        let mut writer = PacketWriter::new(client);
        let mut reader = PacketReader::new(server);

        let publish = Packet::Publish(Publish::new("robot/manual_command", &b"left"[..]));
        writer.send(&publish).await.unwrap();
        writer.send(&Packet::PingReq).await.unwrap();

        assert_eq!(reader.read_packet().await.unwrap(), publish);
        assert_eq!(reader.read_packet().await.unwrap(), Packet::PingReq);
    }

    #[tokio::test]
    async fn test_closed_stream_fails_read() {
        let (client, server) = duplex(64);
        drop(server);
        let mut reader = PacketReader::new(client);
        assert!(matches!(reader.read_packet().await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn test_unsupported_packet_is_skipped() {
        let (mut client, server) = duplex(64);
        // UNSUBACK followed by PINGRESP
        client.write_all(&[0xB0, 2, 0, 1, 0xD0, 0]).await.unwrap();
        let mut reader = PacketReader::new(server);
        assert_eq!(reader.read_packet().await.unwrap(), Packet::PingResp);
    }
}
