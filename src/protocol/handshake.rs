//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Only the simple handshake is spoken. Servers that offer the digest variant
//! fall back to it for clients that send a zero version field in C1.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Client side of the handshake
#[derive(Debug, Default)]
pub struct ClientHandshake {
    c1: Option<[u8; HANDSHAKE_SIZE]>,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// C0 + C1
    pub fn c0c1(&mut self) -> Bytes {
        let c1 = generate_packet();
        self.c1 = Some(c1);

        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&c1);
        buf.freeze()
    }

    /// Validate S0 + S1 + S2 and produce C2
    ///
    /// S2 is not compared with C1; several servers do not echo it faithfully.
    pub fn c2(&self, s0s1s2: &[u8]) -> std::result::Result<Bytes, HandshakeError> {
        if s0s1s2.len() < 1 + HANDSHAKE_SIZE * 2 {
            return Err(HandshakeError::UnexpectedEof);
        }
        let version = s0s1s2[0];
        if version < RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version));
        }

        let mut s1 = [0u8; HANDSHAKE_SIZE];
        s1.copy_from_slice(&s0s1s2[1..1 + HANDSHAKE_SIZE]);
        Ok(Bytes::copy_from_slice(&generate_echo(&s1)))
    }

    /// Run the whole exchange over `io`
    pub async fn perform<S>(mut self, io: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        io.write_all(&self.c0c1()).await?;
        io.flush().await?;

        let mut response = vec![0u8; 1 + HANDSHAKE_SIZE * 2];
        io.read_exact(&mut response).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                HandshakeError::UnexpectedEof.into()
            } else {
                crate::Error::Io(e)
            }
        })?;

        let c2 = self.c2(&response)?;
        io.write_all(&c2).await?;
        io.flush().await?;

        tracing::trace!("RTMP handshake complete");
        Ok(())
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1: timestamp, four zero bytes, pseudo-random filler
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Filler does not need to be cryptographically random
    let mut seed = (timestamp as u64) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    packet
}

/// C2: peer packet with our read time in bytes 4..8
fn generate_echo(peer: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(version: u8) -> Vec<u8> {
        let mut reply = vec![version];
        reply.extend((0..HANDSHAKE_SIZE).map(|i| (i % 251) as u8));
        reply.extend(std::iter::repeat(0xAB).take(HANDSHAKE_SIZE));
        reply
    }

    #[test]
    fn test_c0c1_layout() {
        let mut hs = ClientHandshake::new();
        let c0c1 = hs.c0c1();

        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert_eq!(&c0c1[5..9], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_c2_echoes_s1_random_bytes() {
        let hs = ClientHandshake::new();
        let reply = server_reply(3);

        let c2 = hs.c2(&reply).unwrap();
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert_eq!(&c2[0..4], &reply[1..5]);
        assert_eq!(&c2[8..], &reply[9..1 + HANDSHAKE_SIZE]);
    }

    #[test]
    fn test_rejects_old_version() {
        let hs = ClientHandshake::new();
        assert_eq!(
            hs.c2(&server_reply(2)),
            Err(HandshakeError::InvalidVersion(2))
        );
        assert_eq!(hs.c2(&[3, 0, 0]), Err(HandshakeError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_perform_against_fake_server() {
        let (mut client, mut server) = tokio::io::duplex(16 * 1024);

        let server_task = tokio::spawn(async move {
            let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
            server.read_exact(&mut c0c1).await.unwrap();
            server.write_all(&server_reply(3)).await.unwrap();
            let mut c2 = vec![0u8; HANDSHAKE_SIZE];
            server.read_exact(&mut c2).await.unwrap();
            c2
        });

        ClientHandshake::new().perform(&mut client).await.unwrap();
        let c2 = server_task.await.unwrap();
        assert_eq!(&c2[8..16], &server_reply(3)[9..17]);
    }

    #[tokio::test]
    async fn test_perform_fails_when_server_hangs_up() {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        drop(server);

        let err = ClientHandshake::new().perform(&mut client).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Handshake(HandshakeError::UnexpectedEof) | crate::Error::Io(_)
        ));
    }
}
