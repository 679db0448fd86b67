//! Packet transport used by the LOCAL INFILE handler.
//!
//! `PacketIo` is the seam between the handler and the connection: the
//! handler hands over payloads that start with `HEADER_SIZE` reserved bytes
//! and the transport fills in length and sequence id. `PacketStream` is the
//! default implementation over any async byte stream (TCP, TLS, Unix).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::DEFAULT_MAX_ALLOWED_PACKET;
use crate::error::{InfileError, InfileResult};
use crate::protocol::{HEADER_SIZE, MAX_PAYLOAD_SIZE, OkPacket, parse_completion};

/// Framed packet I/O against the server.
#[async_trait]
pub trait PacketIo: Send {
    /// Send one packet. `packet[..HEADER_SIZE]` is reserved for the header.
    async fn write_packet(&mut self, packet: &mut [u8]) -> InfileResult<()>;

    /// Read one packet payload.
    async fn read_packet(&mut self) -> InfileResult<Vec<u8>>;

    /// Start a new command (sequence id back to 0).
    fn reset_sequence(&mut self);

    /// Adopt the server's `max_allowed_packet` for outgoing packets.
    fn set_max_allowed_packet(&mut self, _size: usize) {}

    /// Send a command packet from a bare payload.
    async fn write_command(&mut self, payload: &[u8]) -> InfileResult<()> {
        self.reset_sequence();
        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&[0; HEADER_SIZE]);
        packet.extend_from_slice(payload);
        self.write_packet(&mut packet).await
    }

    /// Read the server's completion: OK packet or ERR as `InfileError::Server`.
    async fn read_result_ok(&mut self) -> InfileResult<OkPacket> {
        let packet = self.read_packet().await?;
        parse_completion(&packet)
    }

    /// Read and discard the next packet.
    async fn drain_packet(&mut self) -> InfileResult<()> {
        self.read_packet().await.map(|_| ())
    }
}

/// MySQL packet framing over an async stream.
pub struct PacketStream<S> {
    stream: S,
    sequence_id: u8,
    max_allowed_packet: usize,
    read_buf: Vec<u8>,
}

impl<S> PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence_id: 0,
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            read_buf: Vec::with_capacity(65536),
        }
    }

    /// Reject outgoing packets larger than the server accepts.
    pub fn with_max_allowed_packet(mut self, size: usize) -> Self {
        self.max_allowed_packet = size;
        self
    }

    pub fn max_allowed_packet(&self) -> usize {
        self.max_allowed_packet
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn read_frame(&mut self) -> InfileResult<usize> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;

        let packet_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        if header[3] != self.sequence_id {
            return Err(InfileError::Protocol(format!(
                "commands out of sync: expected sequence {}, got {}",
                self.sequence_id, header[3]
            )));
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);

        let start = self.read_buf.len();
        self.read_buf.resize(start + packet_len, 0);
        self.stream.read_exact(&mut self.read_buf[start..]).await?;

        Ok(packet_len)
    }
}

#[async_trait]
impl<S> PacketIo for PacketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_packet(&mut self, packet: &mut [u8]) -> InfileResult<()> {
        if packet.len() < HEADER_SIZE {
            return Err(InfileError::Protocol("packet missing header space".into()));
        }
        let total = packet.len() - HEADER_SIZE;
        if total >= self.max_allowed_packet {
            return Err(InfileError::PacketTooLarge {
                size: total,
                max: self.max_allowed_packet.saturating_sub(1),
            });
        }

        // payloads of MAX_PAYLOAD_SIZE or more go out as full frames followed
        // by a shorter (possibly empty) one
        let mut offset = HEADER_SIZE;
        loop {
            let len = (packet.len() - offset).min(MAX_PAYLOAD_SIZE);
            let header = [
                (len & 0xff) as u8,
                ((len >> 8) & 0xff) as u8,
                ((len >> 16) & 0xff) as u8,
                self.sequence_id,
            ];

            if offset == HEADER_SIZE {
                packet[..HEADER_SIZE].copy_from_slice(&header);
                self.stream
                    .write_all(&packet[..HEADER_SIZE + len])
                    .await
                    .map_err(InfileError::Send)?;
            } else {
                self.stream
                    .write_all(&header)
                    .await
                    .map_err(InfileError::Send)?;
                self.stream
                    .write_all(&packet[offset..offset + len])
                    .await
                    .map_err(InfileError::Send)?;
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);
            offset += len;

            if len < MAX_PAYLOAD_SIZE {
                break;
            }
        }

        self.stream.flush().await.map_err(InfileError::Send)
    }

    async fn read_packet(&mut self) -> InfileResult<Vec<u8>> {
        self.read_buf.clear();
        // payloads of exactly MAX_PAYLOAD_SIZE continue in the next frame
        while self.read_frame().await? == MAX_PAYLOAD_SIZE {}
        Ok(self.read_buf.clone())
    }

    fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    fn set_max_allowed_packet(&mut self, size: usize) {
        self.max_allowed_packet = size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_write_fills_header() {
        let (client, mut server) = duplex(1024);
        let mut io = PacketStream::new(client);

        let mut packet = vec![0, 0, 0, 0, b'a', b'b', b'c'];
        io.write_packet(&mut packet).await.unwrap();
        let mut empty = [0u8; HEADER_SIZE];
        io.write_packet(&mut empty).await.unwrap();

        let mut wire = [0u8; 11];
        server.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [3, 0, 0, 0, b'a', b'b', b'c', 0, 0, 0, 1]);
        assert_eq!(io.sequence_id(), 2);
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_packet() {
        let (client, _server) = duplex(64);
        let mut io = PacketStream::new(client).with_max_allowed_packet(8);

        let mut packet = vec![0u8; HEADER_SIZE + 8];
        let err = io.write_packet(&mut packet).await.unwrap_err();
        assert!(matches!(err, InfileError::PacketTooLarge { size: 8, max: 7 }));
    }

    #[tokio::test]
    async fn test_write_splits_large_payload() {
        let (client, mut server) = duplex(HEADER_SIZE * 2 + MAX_PAYLOAD_SIZE + 10);
        let mut io = PacketStream::new(client);

        let mut packet = vec![b'x'; HEADER_SIZE + MAX_PAYLOAD_SIZE + 10];
        io.write_packet(&mut packet).await.unwrap();
        assert_eq!(io.sequence_id(), 2);

        let mut header = [0u8; HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(header, [0xff, 0xff, 0xff, 0]);
        let mut body = vec![0u8; MAX_PAYLOAD_SIZE];
        server.read_exact(&mut body).await.unwrap();
        assert!(body.iter().all(|&b| b == b'x'));

        let mut tail = [0u8; HEADER_SIZE + 10];
        server.read_exact(&mut tail).await.unwrap();
        assert_eq!(&tail[..HEADER_SIZE], &[10, 0, 0, 1]);
        assert_eq!(&tail[HEADER_SIZE..], &[b'x'; 10]);
    }

    #[tokio::test]
    async fn test_write_exact_frame_size_ends_with_empty_frame() {
        let (client, mut server) = duplex(HEADER_SIZE * 2 + MAX_PAYLOAD_SIZE);
        let mut io = PacketStream::new(client);

        let mut packet = vec![0u8; HEADER_SIZE + MAX_PAYLOAD_SIZE];
        io.write_packet(&mut packet).await.unwrap();

        let mut wire = vec![0u8; HEADER_SIZE * 2 + MAX_PAYLOAD_SIZE];
        server.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[..HEADER_SIZE], &[0xff, 0xff, 0xff, 0]);
        assert_eq!(&wire[HEADER_SIZE + MAX_PAYLOAD_SIZE..], &[0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_set_max_allowed_packet() {
        let (client, _server) = duplex(64);
        let mut io = PacketStream::new(client);
        io.set_max_allowed_packet(4096);
        assert_eq!(io.max_allowed_packet(), 4096);

        let mut packet = vec![0u8; HEADER_SIZE + 4096];
        let err = io.write_packet(&mut packet).await.unwrap_err();
        assert!(matches!(err, InfileError::PacketTooLarge { size: 4096, max: 4095 }));
    }

    #[tokio::test]
    async fn test_read_checks_sequence() {
        let (client, mut server) = duplex(1024);
        let mut io = PacketStream::new(client);

        server.write_all(&[1, 0, 0, 0, 0x00]).await.unwrap();
        assert_eq!(io.read_packet().await.unwrap(), vec![0x00]);

        server.write_all(&[1, 0, 0, 7, 0x00]).await.unwrap();
        let err = io.read_packet().await.unwrap_err();
        assert!(matches!(err, InfileError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_result_ok_surfaces_server_error() {
        let (client, mut server) = duplex(1024);
        let mut io = PacketStream::new(client);

        let mut packet = vec![0xff, 0x7c, 0x04, b'#'];
        packet.extend_from_slice(b"42000denied");
        let mut frame = vec![packet.len() as u8, 0, 0, 0];
        frame.extend_from_slice(&packet);
        server.write_all(&frame).await.unwrap();

        match io.read_result_ok().await {
            Err(InfileError::Server { code, message, .. }) => {
                assert_eq!(code, 1148);
                assert_eq!(message, "denied");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_command_resets_sequence() {
        let (client, mut server) = duplex(1024);
        let mut io = PacketStream::new(client);

        let mut packet = vec![0u8; HEADER_SIZE];
        io.write_packet(&mut packet).await.unwrap();
        io.write_command(b"\x03SELECT 1").await.unwrap();

        let mut wire = [0u8; 4 + 4 + 9];
        server.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[4..8], &[9, 0, 0, 0]);
        assert_eq!(&wire[8..], b"\x03SELECT 1");
    }
}
